//! AWS client modules for the deployer
//!
//! - context: SDK configuration loading (region, profile)
//! - cloudformation: stack create / update / describe / delete
//! - error: classification of SDK errors

pub mod cloudformation;
pub mod context;
pub mod error;

pub use cloudformation::{
    CloudFormationClient, StackDescription, StackOperations, StackPhase, UpdateOutcome,
};
pub use context::AwsContext;
pub use error::{AwsError, classify_anyhow_error, classify_aws_error, classify_sdk_error};

#[cfg(test)]
pub use cloudformation::MockStackOperations;
