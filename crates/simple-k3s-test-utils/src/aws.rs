//! AWS test utilities
//!
//! Region detection and unique stack names for AWS integration tests.

use chrono::Utc;

/// Get the AWS region for tests.
///
/// Checks environment variables in order:
/// 1. AWS_REGION
/// 2. AWS_DEFAULT_REGION
/// 3. Falls back to us-east-1
///
/// # Example
///
/// ```
/// use simple_k3s_test_utils::aws::get_test_region;
///
/// let region = get_test_region();
/// assert!(!region.is_empty());
/// ```
pub fn get_test_region() -> String {
    std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        .unwrap_or_else(|_| "us-east-1".to_string())
}

/// Generate a unique run ID for test resources.
///
/// Format: `test-{timestamp_ms}-{counter}`, unique within the process even
/// when tests start in the same millisecond.
pub fn test_run_id() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let ts = Utc::now().timestamp_millis();
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("test-{}-{}", ts, counter)
}

/// Generate a unique CloudFormation stack name.
///
/// Format: `simple-k3s-test-{timestamp_ms}-{counter}`. Stack names must start
/// with a letter and contain only alphanumerics and hyphens.
///
/// # Example
///
/// ```
/// use simple_k3s_test_utils::aws::test_stack_name;
///
/// let name = test_stack_name();
/// assert!(name.starts_with("simple-k3s-test-"));
/// ```
pub fn test_stack_name() -> String {
    format!("simple-k3s-{}", test_run_id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_test_region_default() {
        let original_region = std::env::var("AWS_REGION").ok();
        let original_default = std::env::var("AWS_DEFAULT_REGION").ok();

        // SAFETY: Test-only code; no other test in this crate reads these vars.
        unsafe {
            std::env::remove_var("AWS_REGION");
            std::env::remove_var("AWS_DEFAULT_REGION");
        }

        let region = get_test_region();
        assert_eq!(region, "us-east-1");

        unsafe {
            if let Some(r) = original_region {
                std::env::set_var("AWS_REGION", r);
            }
            if let Some(r) = original_default {
                std::env::set_var("AWS_DEFAULT_REGION", r);
            }
        }
    }

    #[test]
    fn test_run_id_format() {
        let run_id = test_run_id();
        let parts: Vec<&str> = run_id.strip_prefix("test-").unwrap().split('-').collect();
        assert_eq!(parts.len(), 2);
        parts[0].parse::<i64>().expect("Should be valid timestamp");
        parts[1].parse::<u32>().expect("Should be valid counter");
    }

    #[test]
    fn test_stack_name_unique_and_valid() {
        let a = test_stack_name();
        let b = test_stack_name();
        assert_ne!(a, b);
        for name in [&a, &b] {
            assert!(name.len() <= 128);
            assert!(name.starts_with(|c: char| c.is_ascii_alphabetic()));
            assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
        }
    }
}
