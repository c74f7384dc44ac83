//! simple-k3s-common - Descriptor model and template synthesis
//!
//! This crate describes the single-instance k3s stack as plain data and
//! renders it to a CloudFormation template. It has no AWS SDK dependency;
//! deploying the template is the deployer crate's job.
//!
//! ## Modules
//!
//! - [`network`]: VPC descriptor and subnet allocation
//! - [`security`]: Security group and ingress rules
//! - [`image`]: Amazon Linux image selection via SSM parameters
//! - [`volume`]: EBS block devices
//! - [`bootstrap`]: User data and cfn-init metadata
//! - [`instance`]: Instance descriptor assembly
//! - [`stack`]: Descriptor graph construction from a [`DeploymentConfig`]
//! - [`template`]: CloudFormation rendering and reference checks
//! - [`config`]: JSON deployment configuration
//! - [`defaults`]: Stock stack values
//! - [`tags`]: Stack tag constants

pub mod bootstrap;
pub mod config;
pub mod defaults;
pub mod error;
pub mod image;
pub mod instance;
pub mod network;
pub mod security;
pub mod stack;
pub mod tags;
pub mod template;
pub mod volume;

// Re-export commonly used types
pub use config::{ConfigError, DeploymentConfig};
pub use error::DescriptorError;
pub use stack::{DescriptorGraph, build_graph};
pub use template::{Template, synthesize};
