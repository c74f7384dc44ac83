//! Descriptor construction errors
//!
//! Everything here is raised locally while building or synthesizing the
//! descriptor graph. Anything the cloud provider rejects later surfaces
//! through the deployer instead.

use thiserror::Error;

/// Errors raised while constructing descriptors or synthesizing a template
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// CIDR literal could not be parsed
    #[error("Invalid CIDR notation '{cidr}': {reason}")]
    InvalidCidr { cidr: String, reason: &'static str },

    /// VPC range is not one of the RFC 1918 private blocks
    #[error("VPC CIDR {0} is not a private (RFC 1918) range")]
    PublicCidr(String),

    /// max_azs was zero
    #[error("max_azs must be at least 1")]
    NoAvailabilityZones,

    /// Subnet prefix outside 1..=32 or wider than the VPC itself
    #[error("Subnet '{name}' has invalid prefix length /{prefix} for VPC /{vpc_prefix}")]
    InvalidSubnetPrefix {
        name: String,
        prefix: u8,
        vpc_prefix: u8,
    },

    /// Subnet layouts need more address space than the VPC range holds
    #[error("VPC {vpc} has no room left for subnet '{name}' (/{prefix}) in AZ {az_index}")]
    CidrExhausted {
        vpc: String,
        name: String,
        prefix: u8,
        az_index: u32,
    },

    /// Subnet or descriptor names must not be empty
    #[error("{0} cannot be empty")]
    EmptyName(&'static str),

    /// Root volume size was zero
    #[error("Volume size for {device} must be at least 1 GiB")]
    InvalidVolumeSize { device: String },

    /// The security policy belongs to a different network than the instance
    #[error("Security policy is scoped to a different network than the instance")]
    NetworkMismatch,

    /// Instance was placed in a network without any public subnet
    #[error("Network has no public subnet to place the instance in")]
    NoPublicSubnet,

    /// A config set names an init config that was never defined
    #[error("Config set '{config_set}' references unknown init config '{config}'")]
    UnknownInitConfig { config_set: String, config: String },

    /// Init options select a config set the init metadata does not define
    #[error("Unknown init config set '{0}'")]
    UnknownConfigSet(String),

    /// A required builder field was never set
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A Ref / GetAtt / DependsOn points at something the template does not define
    #[error("Resource '{from}' references undefined logical id '{target}'")]
    DanglingReference { from: String, target: String },

    /// Two subnet layout names reduce to the same logical id
    #[error("Subnet names '{name}' and '{other}' map to the same logical id")]
    DuplicateSubnetName { name: String, other: String },

    /// A resource or parameter logical id was defined twice
    #[error("Logical id '{0}' is defined more than once")]
    DuplicateLogicalId(String),

    /// Resource dependencies form a cycle
    #[error("Dependency cycle detected among: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),
}

pub type Result<T> = std::result::Result<T, DescriptorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            DescriptorError::NoAvailabilityZones.to_string(),
            "max_azs must be at least 1"
        );
        assert_eq!(
            DescriptorError::InvalidCidr {
                cidr: "10.0.0/21".to_string(),
                reason: "expected four octets",
            }
            .to_string(),
            "Invalid CIDR notation '10.0.0/21': expected four octets"
        );
        assert_eq!(
            DescriptorError::DependencyCycle(vec!["A".into(), "B".into()]).to_string(),
            "Dependency cycle detected among: A, B"
        );
    }
}
