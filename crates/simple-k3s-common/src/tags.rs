//! Tag constants for simple-k3s stacks
//!
//! Stacks are tagged at deploy time so they can be found again. CloudFormation
//! propagates stack tags to every taggable resource it creates.
//!
//! ## Tag Schema
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `simple-k3s:tool` | Static identifier ("simple-k3s") |
//! | `simple-k3s:stack` | Stack name |
//! | `simple-k3s:created-at` | RFC 3339 deploy timestamp |

/// Tag key for tool identification
pub const TAG_TOOL: &str = "simple-k3s:tool";

/// Tag value for tool identification
pub const TAG_TOOL_VALUE: &str = "simple-k3s";

/// Tag key for the owning stack name
pub const TAG_STACK: &str = "simple-k3s:stack";

/// Tag key for deploy timestamp (RFC 3339 format)
pub const TAG_CREATED_AT: &str = "simple-k3s:created-at";

/// Helper to format creation timestamp for tags
pub fn format_created_at(time: chrono::DateTime<chrono::Utc>) -> String {
    time.to_rfc3339()
}

/// Helper to parse creation timestamp from tags
pub fn parse_created_at(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

/// Standard stack tags as key/value pairs
pub fn stack_tags(
    stack_name: &str,
    created_at: chrono::DateTime<chrono::Utc>,
) -> Vec<(&'static str, String)> {
    vec![
        (TAG_TOOL, TAG_TOOL_VALUE.to_string()),
        (TAG_STACK, stack_name.to_string()),
        (TAG_CREATED_AT, format_created_at(created_at)),
    ]
}
