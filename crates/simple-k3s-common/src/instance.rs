//! EC2 instance descriptor and its assembler

use crate::bootstrap::{CloudFormationInit, InitOptions, UserData};
use crate::error::{DescriptorError, Result};
use crate::image::ImageSelector;
use crate::network::NetworkSpec;
use crate::security::SecurityPolicy;
use crate::volume::VolumeSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Instance family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceClass {
    T2,
    T3,
    T3a,
    T4g,
    M5,
    M6i,
    M7i,
    C5,
    C6i,
    C7i,
    R5,
}

impl InstanceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceClass::T2 => "t2",
            InstanceClass::T3 => "t3",
            InstanceClass::T3a => "t3a",
            InstanceClass::T4g => "t4g",
            InstanceClass::M5 => "m5",
            InstanceClass::M6i => "m6i",
            InstanceClass::M7i => "m7i",
            InstanceClass::C5 => "c5",
            InstanceClass::C6i => "c6i",
            InstanceClass::C7i => "c7i",
            InstanceClass::R5 => "r5",
        }
    }

    const ALL: [InstanceClass; 11] = [
        InstanceClass::T2,
        InstanceClass::T3,
        InstanceClass::T3a,
        InstanceClass::T4g,
        InstanceClass::M5,
        InstanceClass::M6i,
        InstanceClass::M7i,
        InstanceClass::C5,
        InstanceClass::C6i,
        InstanceClass::C7i,
        InstanceClass::R5,
    ];
}

/// Instance size within a family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceSize {
    Nano,
    Micro,
    Small,
    Medium,
    Large,
    Xlarge,
    Xlarge2,
    Xlarge4,
}

impl InstanceSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceSize::Nano => "nano",
            InstanceSize::Micro => "micro",
            InstanceSize::Small => "small",
            InstanceSize::Medium => "medium",
            InstanceSize::Large => "large",
            InstanceSize::Xlarge => "xlarge",
            InstanceSize::Xlarge2 => "2xlarge",
            InstanceSize::Xlarge4 => "4xlarge",
        }
    }

    const ALL: [InstanceSize; 8] = [
        InstanceSize::Nano,
        InstanceSize::Micro,
        InstanceSize::Small,
        InstanceSize::Medium,
        InstanceSize::Large,
        InstanceSize::Xlarge,
        InstanceSize::Xlarge2,
        InstanceSize::Xlarge4,
    ];
}

/// `<class>.<size>`, e.g. `t3.small`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceType {
    pub class: InstanceClass,
    pub size: InstanceSize,
}

impl InstanceType {
    pub fn of(class: InstanceClass, size: InstanceSize) -> Self {
        Self { class, size }
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class.as_str(), self.size.as_str())
    }
}

impl FromStr for InstanceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (class, size) = s
            .split_once('.')
            .ok_or_else(|| format!("Invalid instance type: {s}"))?;
        let class = InstanceClass::ALL
            .into_iter()
            .find(|c| c.as_str() == class)
            .ok_or_else(|| format!("Unknown instance class: {class}"))?;
        let size = InstanceSize::ALL
            .into_iter()
            .find(|z| z.as_str() == size)
            .ok_or_else(|| format!("Unknown instance size: {size}"))?;
        Ok(Self { class, size })
    }
}

impl TryFrom<String> for InstanceType {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InstanceType> for String {
    fn from(value: InstanceType) -> Self {
        value.to_string()
    }
}

/// A single EC2 instance, composed from the other descriptors
///
/// Network and security policy are held by `Arc` so the template can point
/// at the very same resources instead of duplicating them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceDescriptor {
    name: String,
    #[serde(skip)]
    network: Arc<NetworkSpec>,
    #[serde(skip)]
    security_policy: Arc<SecurityPolicy>,
    image: ImageSelector,
    instance_type: InstanceType,
    volumes: Vec<VolumeSpec>,
    user_data: UserData,
    init: Option<CloudFormationInit>,
    init_options: Option<InitOptions>,
}

impl InstanceDescriptor {
    pub fn builder(
        name: impl Into<String>,
        network: Arc<NetworkSpec>,
        security_policy: Arc<SecurityPolicy>,
    ) -> InstanceDescriptorBuilder {
        InstanceDescriptorBuilder {
            name: name.into(),
            network,
            security_policy,
            image: None,
            instance_type: None,
            volumes: Vec::new(),
            user_data: UserData::for_linux(),
            init: None,
            init_options: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn network(&self) -> &Arc<NetworkSpec> {
        &self.network
    }

    pub fn security_policy(&self) -> &Arc<SecurityPolicy> {
        &self.security_policy
    }

    pub fn image(&self) -> &ImageSelector {
        &self.image
    }

    pub fn instance_type(&self) -> InstanceType {
        self.instance_type
    }

    pub fn volumes(&self) -> &[VolumeSpec] {
        &self.volumes
    }

    pub fn user_data(&self) -> &UserData {
        &self.user_data
    }

    pub fn init(&self) -> Option<&CloudFormationInit> {
        self.init.as_ref()
    }

    pub fn init_options(&self) -> Option<&InitOptions> {
        self.init_options.as_ref()
    }
}

/// Builder for [`InstanceDescriptor`]
#[derive(Debug, Clone)]
pub struct InstanceDescriptorBuilder {
    name: String,
    network: Arc<NetworkSpec>,
    security_policy: Arc<SecurityPolicy>,
    image: Option<ImageSelector>,
    instance_type: Option<InstanceType>,
    volumes: Vec<VolumeSpec>,
    user_data: UserData,
    init: Option<CloudFormationInit>,
    init_options: Option<InitOptions>,
}

impl InstanceDescriptorBuilder {
    pub fn image(mut self, image: ImageSelector) -> Self {
        self.image = Some(image);
        self
    }

    pub fn instance_type(mut self, instance_type: InstanceType) -> Self {
        self.instance_type = Some(instance_type);
        self
    }

    pub fn volume(mut self, volume: VolumeSpec) -> Self {
        self.volumes.push(volume);
        self
    }

    pub fn user_data(mut self, user_data: UserData) -> Self {
        self.user_data = user_data;
        self
    }

    pub fn init(mut self, init: CloudFormationInit, options: InitOptions) -> Self {
        self.init = Some(init);
        self.init_options = Some(options);
        self
    }

    pub fn build(self) -> Result<InstanceDescriptor> {
        if self.name.is_empty() {
            return Err(DescriptorError::EmptyName("instance name"));
        }
        if !Arc::ptr_eq(self.security_policy.network(), &self.network) {
            return Err(DescriptorError::NetworkMismatch);
        }
        if !self.network.has_public_subnets() {
            return Err(DescriptorError::NoPublicSubnet);
        }
        let image = self.image.ok_or(DescriptorError::MissingField("image"))?;
        let instance_type = self
            .instance_type
            .ok_or(DescriptorError::MissingField("instance_type"))?;
        if let (Some(init), Some(options)) = (&self.init, &self.init_options) {
            options.check_against(init)?;
        }

        Ok(InstanceDescriptor {
            name: self.name,
            network: self.network,
            security_policy: self.security_policy,
            image,
            instance_type,
            volumes: self.volumes,
            user_data: self.user_data,
            init: self.init,
            init_options: self.init_options,
        })
    }
}
