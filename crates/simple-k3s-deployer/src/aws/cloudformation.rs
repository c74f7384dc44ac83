//! CloudFormation stack operations
//!
//! Thin wrapper over the SDK client. Throttled requests are retried with
//! exponential backoff; everything else is classified and surfaced.

use super::context::AwsContext;
use super::error::classify_sdk_error;
use anyhow::{Context, Result};
use aws_sdk_cloudformation::Client;
use aws_sdk_cloudformation::types::{Capability, Stack, Tag};
use backon::{ExponentialBuilder, Retryable};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where a stack status sits in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPhase {
    /// The engine is still working (`*_IN_PROGRESS`)
    InProgress,
    /// A successful terminal state (`CREATE_COMPLETE`, `UPDATE_COMPLETE`, ...)
    Complete,
    /// A failed terminal state (`*_FAILED` or a completed rollback)
    Failed,
}

impl StackPhase {
    /// Classify a raw CloudFormation stack status.
    ///
    /// A completed rollback counts as a failure: the requested change was not
    /// applied. Unrecognized statuses are treated as failures too.
    pub fn of(status: &str) -> Self {
        if status.ends_with("_IN_PROGRESS") {
            StackPhase::InProgress
        } else if status.ends_with("_FAILED") || status.contains("ROLLBACK") {
            StackPhase::Failed
        } else if status.ends_with("_COMPLETE") {
            StackPhase::Complete
        } else {
            StackPhase::Failed
        }
    }
}

/// The parts of a deployed stack the deployer cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackDescription {
    pub stack_id: Option<String>,
    pub status: String,
    pub status_reason: Option<String>,
    pub outputs: BTreeMap<String, String>,
    /// Stack-level tags as currently deployed
    pub tags: BTreeMap<String, String>,
}

impl StackDescription {
    pub fn phase(&self) -> StackPhase {
        StackPhase::of(&self.status)
    }

    /// Stacks that cannot be updated, only deleted: a rolled-back creation,
    /// or a stack that only holds an unexecuted change set
    pub fn needs_replacement(&self) -> bool {
        matches!(self.status.as_str(), "ROLLBACK_COMPLETE" | "REVIEW_IN_PROGRESS")
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

impl From<&Stack> for StackDescription {
    fn from(stack: &Stack) -> Self {
        Self {
            stack_id: stack.stack_id().map(str::to_string),
            status: stack
                .stack_status()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            status_reason: stack.stack_status_reason().map(str::to_string),
            outputs: stack
                .outputs()
                .iter()
                .filter_map(|o| Some((o.output_key()?.to_string(), o.output_value()?.to_string())))
                .collect(),
            tags: stack
                .tags()
                .iter()
                .filter_map(|t| Some((t.key()?.to_string(), t.value()?.to_string())))
                .collect(),
        }
    }
}

/// Result of an update request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The engine accepted the change set; carries the stack id
    Started(String),
    /// The template matches what is deployed
    NoChanges,
}

/// Backoff used for throttled CloudFormation calls
fn throttle_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(20))
        .with_max_times(6)
        .with_jitter()
}

/// CloudFormation client for stack operations
pub struct CloudFormationClient {
    client: Client,
}

impl CloudFormationClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_context(ctx: &AwsContext) -> Self {
        Self::new(ctx.cloudformation_client())
    }

    /// Describe a stack, returning `None` if it does not exist
    pub async fn describe_stack(&self, stack_name: &str) -> Result<Option<StackDescription>> {
        let result = (|| async {
            self.client
                .describe_stacks()
                .stack_name(stack_name)
                .send()
                .await
        })
        .retry(throttle_backoff())
        .when(|e| classify_sdk_error(e).is_retryable())
        .notify(|e, delay| {
            warn!(
                operation = "DescribeStacks",
                delay = ?delay,
                error = %e,
                "CloudFormation rate limited, backing off..."
            );
        })
        .await;

        match result {
            Ok(output) => {
                let stack = output.stacks().first().map(StackDescription::from);
                debug!(
                    stack = %stack_name,
                    status = ?stack.as_ref().map(|s| s.status.as_str()),
                    "Described stack"
                );
                Ok(stack)
            }
            Err(e) if classify_sdk_error(&e).is_not_found() => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to describe stack {stack_name}")),
        }
    }

    /// Start creating a stack; returns the new stack id
    pub async fn create_stack(
        &self,
        stack_name: &str,
        template_body: &str,
        tags: &[(String, String)],
    ) -> Result<String> {
        let tags = build_tags(tags);
        let output = (|| async {
            self.client
                .create_stack()
                .stack_name(stack_name)
                .template_body(template_body)
                .capabilities(Capability::CapabilityIam)
                .set_tags(Some(tags.clone()))
                .send()
                .await
        })
        .retry(throttle_backoff())
        .when(|e| classify_sdk_error(e).is_retryable())
        .notify(|e, delay| {
            warn!(
                operation = "CreateStack",
                delay = ?delay,
                error = %e,
                "CloudFormation rate limited, backing off..."
            );
        })
        .await
        .with_context(|| format!("Failed to create stack {stack_name}"))?;

        let stack_id = output.stack_id().unwrap_or(stack_name).to_string();
        info!(stack = %stack_name, stack_id = %stack_id, "Stack creation started");
        Ok(stack_id)
    }

    /// Start updating a stack in place
    pub async fn update_stack(
        &self,
        stack_name: &str,
        template_body: &str,
        tags: &[(String, String)],
    ) -> Result<UpdateOutcome> {
        let tags = build_tags(tags);
        let result = (|| async {
            self.client
                .update_stack()
                .stack_name(stack_name)
                .template_body(template_body)
                .capabilities(Capability::CapabilityIam)
                .set_tags(Some(tags.clone()))
                .send()
                .await
        })
        .retry(throttle_backoff())
        .when(|e| classify_sdk_error(e).is_retryable())
        .notify(|e, delay| {
            warn!(
                operation = "UpdateStack",
                delay = ?delay,
                error = %e,
                "CloudFormation rate limited, backing off..."
            );
        })
        .await;

        match result {
            Ok(output) => {
                let stack_id = output.stack_id().unwrap_or(stack_name).to_string();
                info!(stack = %stack_name, stack_id = %stack_id, "Stack update started");
                Ok(UpdateOutcome::Started(stack_id))
            }
            Err(e) if classify_sdk_error(&e).is_no_updates() => {
                info!(stack = %stack_name, "Stack is already up to date");
                Ok(UpdateOutcome::NoChanges)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to update stack {stack_name}")),
        }
    }

    /// Start deleting a stack. Deleting a missing stack succeeds.
    pub async fn delete_stack(&self, stack_name: &str) -> Result<()> {
        (|| async {
            self.client
                .delete_stack()
                .stack_name(stack_name)
                .send()
                .await
        })
        .retry(throttle_backoff())
        .when(|e| classify_sdk_error(e).is_retryable())
        .notify(|e, delay| {
            warn!(
                operation = "DeleteStack",
                delay = ?delay,
                error = %e,
                "CloudFormation rate limited, backing off..."
            );
        })
        .await
        .with_context(|| format!("Failed to delete stack {stack_name}"))?;

        info!(stack = %stack_name, "Stack deletion started");
        Ok(())
    }
}

fn build_tags(tags: &[(String, String)]) -> Vec<Tag> {
    tags.iter()
        .map(|(key, value)| Tag::builder().key(key).value(value).build())
        .collect()
}

/// Trait for stack operations that can be mocked in tests.
///
/// Tags are passed owned to work around mockall lifetime limitations.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on trait are sufficient
#[cfg_attr(test, mockall::automock)]
pub trait StackOperations: Send + Sync {
    /// Describe a stack, `None` if it does not exist
    async fn describe_stack(&self, stack_name: &str) -> Result<Option<StackDescription>>;

    /// Start creating a stack
    async fn create_stack(
        &self,
        stack_name: &str,
        template_body: &str,
        tags: Vec<(String, String)>,
    ) -> Result<String>;

    /// Start updating a stack
    async fn update_stack(
        &self,
        stack_name: &str,
        template_body: &str,
        tags: Vec<(String, String)>,
    ) -> Result<UpdateOutcome>;

    /// Start deleting a stack
    async fn delete_stack(&self, stack_name: &str) -> Result<()>;
}

impl StackOperations for CloudFormationClient {
    async fn describe_stack(&self, stack_name: &str) -> Result<Option<StackDescription>> {
        CloudFormationClient::describe_stack(self, stack_name).await
    }

    async fn create_stack(
        &self,
        stack_name: &str,
        template_body: &str,
        tags: Vec<(String, String)>,
    ) -> Result<String> {
        CloudFormationClient::create_stack(self, stack_name, template_body, &tags).await
    }

    async fn update_stack(
        &self,
        stack_name: &str,
        template_body: &str,
        tags: Vec<(String, String)>,
    ) -> Result<UpdateOutcome> {
        CloudFormationClient::update_stack(self, stack_name, template_body, &tags).await
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<()> {
        CloudFormationClient::delete_stack(self, stack_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_cloudformation::primitives::DateTime;
    use aws_sdk_cloudformation::types::{Output, StackStatus};

    #[test]
    fn test_phase_classification() {
        for status in [
            "CREATE_IN_PROGRESS",
            "UPDATE_IN_PROGRESS",
            "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
            "DELETE_IN_PROGRESS",
            "ROLLBACK_IN_PROGRESS",
            "REVIEW_IN_PROGRESS",
        ] {
            assert_eq!(StackPhase::of(status), StackPhase::InProgress, "{status}");
        }
        for status in ["CREATE_COMPLETE", "UPDATE_COMPLETE", "DELETE_COMPLETE", "IMPORT_COMPLETE"] {
            assert_eq!(StackPhase::of(status), StackPhase::Complete, "{status}");
        }
        for status in [
            "CREATE_FAILED",
            "ROLLBACK_COMPLETE",
            "ROLLBACK_FAILED",
            "UPDATE_ROLLBACK_COMPLETE",
            "UPDATE_ROLLBACK_FAILED",
            "DELETE_FAILED",
            "",
        ] {
            assert_eq!(StackPhase::of(status), StackPhase::Failed, "{status}");
        }
    }

    #[test]
    fn test_description_from_sdk_stack() {
        let stack = Stack::builder()
            .stack_name("SimpleK3SEc2Stack")
            .stack_id("arn:aws:cloudformation:us-east-1:123456789012:stack/SimpleK3SEc2Stack/abc")
            .stack_status(StackStatus::CreateComplete)
            .creation_time(DateTime::from_secs(1_700_000_000))
            .outputs(
                Output::builder()
                    .output_key("EC2PublicAddress")
                    .output_value("203.0.113.10")
                    .build(),
            )
            .outputs(Output::builder().output_key("NoValue").build())
            .tags(
                Tag::builder()
                    .key("simple-k3s:created-at")
                    .value("2026-01-02T03:04:05+00:00")
                    .build(),
            )
            .build();

        let description = StackDescription::from(&stack);
        assert_eq!(description.status, "CREATE_COMPLETE");
        assert_eq!(description.phase(), StackPhase::Complete);
        assert_eq!(
            description.outputs.get("EC2PublicAddress").map(String::as_str),
            Some("203.0.113.10")
        );
        assert_eq!(description.outputs.len(), 1);
        assert_eq!(
            description.tag("simple-k3s:created-at"),
            Some("2026-01-02T03:04:05+00:00")
        );
        assert!(!description.needs_replacement());
    }

    #[test]
    fn test_description_without_status() {
        let stack = Stack::builder().stack_name("SimpleK3SEc2Stack").build();
        let description = StackDescription::from(&stack);
        assert_eq!(description.status, "");
        assert_eq!(description.phase(), StackPhase::Failed);
        assert!(description.tags.is_empty());
    }

    #[test]
    fn test_stacks_needing_replacement() {
        for status in ["ROLLBACK_COMPLETE", "REVIEW_IN_PROGRESS"] {
            let description = StackDescription {
                status: status.to_string(),
                ..Default::default()
            };
            assert!(description.needs_replacement(), "{status}");
        }
        let description = StackDescription {
            status: "UPDATE_ROLLBACK_COMPLETE".to_string(),
            ..Default::default()
        };
        assert!(!description.needs_replacement());
    }

    #[test]
    fn test_build_tags() {
        let tags = build_tags(&[("simple-k3s:tool".into(), "simple-k3s".into())]);
        assert_eq!(tags[0].key(), Some("simple-k3s:tool"));
        assert_eq!(tags[0].value(), Some("simple-k3s"));
    }
}
