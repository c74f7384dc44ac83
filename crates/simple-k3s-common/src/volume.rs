//! Block device descriptors

use crate::error::{DescriptorError, Result};
use serde::{Deserialize, Serialize};

/// EBS volume type; left to the engine's default (gp2) when unset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EbsVolumeType {
    Gp2,
    Gp3,
    Io1,
    St1,
}

impl EbsVolumeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EbsVolumeType::Gp2 => "gp2",
            EbsVolumeType::Gp3 => "gp3",
            EbsVolumeType::Io1 => "io1",
            EbsVolumeType::St1 => "st1",
        }
    }
}

/// An EBS volume mapped to a device name on the instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub device_name: String,
    pub size_gib: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<EbsVolumeType>,
}

impl VolumeSpec {
    pub fn ebs(device_name: impl Into<String>, size_gib: u32) -> Result<Self> {
        let device_name = device_name.into();
        if device_name.is_empty() {
            return Err(DescriptorError::EmptyName("device name"));
        }
        if size_gib == 0 {
            return Err(DescriptorError::InvalidVolumeSize {
                device: device_name,
            });
        }
        Ok(Self {
            device_name,
            size_gib,
            volume_type: None,
        })
    }

    pub fn with_volume_type(mut self, volume_type: EbsVolumeType) -> Self {
        self.volume_type = Some(volume_type);
        self
    }
}
