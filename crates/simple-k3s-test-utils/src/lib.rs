//! Test utilities for simple-k3s
//!
//! Shared helpers for the integration tests that talk to a real AWS account.

pub mod aws;

pub use aws::{get_test_region, test_run_id, test_stack_name};
