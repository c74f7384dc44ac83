//! simple-k3s-deployer - CloudFormation deployment of the k3s stack
//!
//! This crate renders the stack described by `simple-k3s-common` and drives
//! CloudFormation to create, update, inspect and delete it.

pub mod aws;
pub mod config;
pub mod deploy;
pub mod wait;
