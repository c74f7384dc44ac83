//! Deployment configuration
//!
//! Every field has a default describing the stock stack, so an empty JSON
//! object (or no file at all) yields the stock deployment. Validation of
//! simple bounds is done via `garde::Validate`; address and type literals are
//! checked when the descriptor graph is built.

use crate::defaults::{
    DEFAULT_INGRESS, default_init_commands, default_init_services, default_init_timeout_secs,
    default_instance_type, default_max_azs, default_root_device, default_root_volume_size_gib,
    default_stack_name, default_subnet_mask, default_user_data_commands, default_vpc_cidr,
    default_yum_packages,
};
use crate::error::DescriptorError;
use crate::security::Protocol;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

fn default_protocol() -> Protocol {
    Protocol::Tcp
}

fn default_ingress() -> Vec<IngressConfig> {
    DEFAULT_INGRESS
        .iter()
        .map(|(port, label)| IngressConfig {
            port: *port,
            protocol: Protocol::Tcp,
            source: None,
            label: label.to_string(),
        })
        .collect()
}

/// One ingress rule in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, garde::Validate)]
#[serde(deny_unknown_fields)]
pub struct IngressConfig {
    #[garde(skip)]
    pub port: u16,

    #[serde(default = "default_protocol")]
    #[garde(skip)]
    pub protocol: Protocol,

    /// Source CIDR; any IPv4 address when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(min = 1))]
    pub source: Option<String>,

    #[garde(length(min = 1, max = 255))]
    pub label: String,
}

/// Tunable values of the stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, garde::Validate)]
#[serde(deny_unknown_fields)]
pub struct DeploymentConfig {
    /// CloudFormation stack name
    #[serde(default = "default_stack_name")]
    #[garde(length(min = 1, max = 128))]
    pub stack_name: String,

    /// VPC address range
    #[serde(default = "default_vpc_cidr")]
    #[garde(length(min = 9))]
    pub vpc_cidr: String,

    /// Availability zones the VPC spans
    #[serde(default = "default_max_azs")]
    #[garde(range(min = 1, max = 16))]
    pub max_azs: u32,

    /// Prefix length of each public subnet
    #[serde(default = "default_subnet_mask")]
    #[garde(range(min = 16, max = 28))]
    pub subnet_mask: u8,

    /// Inbound allow-list; duplicates are kept
    #[serde(default = "default_ingress")]
    #[garde(dive)]
    pub ingress: Vec<IngressConfig>,

    /// EC2 instance type (e.g., "t3.small")
    #[serde(default = "default_instance_type")]
    #[garde(length(min = 1))]
    pub instance_type: String,

    #[serde(default = "default_root_device")]
    #[garde(length(min = 1))]
    pub root_device: String,

    #[serde(default = "default_root_volume_size_gib")]
    #[garde(range(min = 1, max = 16384))]
    pub root_volume_size_gib: u32,

    /// Plain user-data commands, run before cfn-init
    #[serde(default = "default_user_data_commands")]
    #[garde(skip)]
    pub user_data_commands: Vec<String>,

    /// Packages the `yumPreinstall` init config installs
    #[serde(default = "default_yum_packages")]
    #[garde(skip)]
    pub yum_packages: Vec<String>,

    /// Commands the `config` init config runs, in order
    #[serde(default = "default_init_commands")]
    #[garde(skip)]
    pub init_commands: Vec<String>,

    /// Services the `config` init config enables
    #[serde(default = "default_init_services")]
    #[garde(skip)]
    pub init_services: Vec<String>,

    /// Seconds the engine waits for the cfn-init success signal (max 12 h)
    #[serde(default = "default_init_timeout_secs")]
    #[garde(range(min = 60, max = 43200))]
    pub init_timeout_secs: u64,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            stack_name: default_stack_name(),
            vpc_cidr: default_vpc_cidr(),
            max_azs: default_max_azs(),
            subnet_mask: default_subnet_mask(),
            ingress: default_ingress(),
            instance_type: default_instance_type(),
            root_device: default_root_device(),
            root_volume_size_gib: default_root_volume_size_gib(),
            user_data_commands: default_user_data_commands(),
            yum_packages: default_yum_packages(),
            init_commands: default_init_commands(),
            init_services: default_init_services(),
            init_timeout_secs: default_init_timeout_secs(),
        }
    }
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse JSON configuration
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A bound checked by garde was violated
    #[error("Invalid config: {0}")]
    Validation(#[from] garde::Report),

    /// A literal (CIDR, instance type, ...) was rejected while building descriptors
    #[error("Invalid config: {0}")]
    Descriptor(#[from] DescriptorError),

    /// Instance type string did not parse
    #[error("Invalid config: {0}")]
    InstanceType(String),
}

impl ConfigError {
    /// Create an IO error with path context
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl DeploymentConfig {
    /// Parse and validate a JSON config string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        garde::Validate::validate(&config)?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::io(path.display().to_string(), e))?;
        Self::from_json(&content)
    }

    /// Load `path` if given, otherwise the stock configuration
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Replace the stack name, re-checking its bounds
    pub fn with_stack_name(mut self, stack_name: impl Into<String>) -> Result<Self, ConfigError> {
        self.stack_name = stack_name.into();
        garde::Validate::validate(&self)?;
        Ok(self)
    }
}
