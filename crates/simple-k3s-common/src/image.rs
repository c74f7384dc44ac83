//! Machine image selection
//!
//! An [`ImageSelector`] never names an AMI id. It names the public SSM
//! parameter that tracks the latest matching Amazon Linux image, and the
//! engine resolves that parameter when the stack is deployed. The same
//! selector can therefore resolve to different AMIs on different days.

use serde::{Deserialize, Serialize};

/// Prefix of the public SSM parameters tracking the latest Amazon Linux AMIs
pub const AMAZON_LINUX_SSM_PREFIX: &str = "/aws/service/ami-amazon-linux-latest/";

/// Amazon Linux generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmazonLinuxGeneration {
    AmazonLinux,
    #[default]
    AmazonLinux2,
}

impl AmazonLinuxGeneration {
    fn as_str(&self) -> &'static str {
        match self {
            AmazonLinuxGeneration::AmazonLinux => "amzn",
            AmazonLinuxGeneration::AmazonLinux2 => "amzn2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmazonLinuxEdition {
    #[default]
    Standard,
    Minimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmazonLinuxVirt {
    #[default]
    Hvm,
    Pv,
}

impl AmazonLinuxVirt {
    fn as_str(&self) -> &'static str {
        match self {
            AmazonLinuxVirt::Hvm => "hvm",
            AmazonLinuxVirt::Pv => "pv",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmazonLinuxStorage {
    Ebs,
    #[default]
    GeneralPurpose,
    S3,
}

impl AmazonLinuxStorage {
    fn as_str(&self) -> &'static str {
        match self {
            AmazonLinuxStorage::Ebs => "ebs",
            AmazonLinuxStorage::GeneralPurpose => "gp2",
            AmazonLinuxStorage::S3 => "s3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmazonLinuxCpuType {
    #[default]
    X86_64,
    Arm64,
}

impl AmazonLinuxCpuType {
    fn as_str(&self) -> &'static str {
        match self {
            AmazonLinuxCpuType::X86_64 => "x86_64",
            AmazonLinuxCpuType::Arm64 => "arm64",
        }
    }
}

/// Reference to the latest Amazon Linux image matching these properties
///
/// No combination is validated locally; an unpublished combination fails
/// only when the engine tries to resolve the parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ImageSelector {
    pub generation: AmazonLinuxGeneration,
    pub edition: AmazonLinuxEdition,
    pub virtualization: AmazonLinuxVirt,
    pub storage: AmazonLinuxStorage,
    pub cpu: AmazonLinuxCpuType,
}

impl ImageSelector {
    pub fn latest_amazon_linux(
        generation: AmazonLinuxGeneration,
        edition: AmazonLinuxEdition,
        virtualization: AmazonLinuxVirt,
        storage: AmazonLinuxStorage,
        cpu: AmazonLinuxCpuType,
    ) -> Self {
        Self {
            generation,
            edition,
            virtualization,
            storage,
            cpu,
        }
    }

    /// SSM parameter the engine resolves to a concrete AMI id
    pub fn ssm_parameter(&self) -> String {
        let mut parts = vec![self.generation.as_str(), "ami"];
        if self.edition == AmazonLinuxEdition::Minimal {
            parts.push("minimal");
        }
        parts.extend([
            self.virtualization.as_str(),
            self.cpu.as_str(),
            self.storage.as_str(),
        ]);
        format!("{AMAZON_LINUX_SSM_PREFIX}{}", parts.join("-"))
    }
}
