//! Stack deployment orchestration
//!
//! The deployer never orders resources itself. It hands the synthesized
//! template to CloudFormation, then polls the stack status until it settles:
//!
//! 1. Describe the stack to pick create or update
//! 2. Submit the template (`CAPABILITY_IAM`, stack tags)
//! 3. Wait for a terminal status; rollbacks are reported as failures
//! 4. Read the stack outputs

use crate::aws::{StackDescription, StackOperations, StackPhase, UpdateOutcome};
use crate::wait::{WaitConfig, wait_for_resource};
use anyhow::{Context, Result};
use simple_k3s_common::tags::{TAG_CREATED_AT, parse_created_at};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// What `deploy` did to the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployAction {
    Created,
    Updated,
    Unchanged,
    /// Submitted without waiting for the engine to finish
    Submitted,
}

/// Outcome of a deploy request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub action: DeployAction,
    pub outputs: BTreeMap<String, String>,
}

/// Options shared by deploy and destroy
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Poll until the stack settles; `None` returns right after submission
    pub wait: Option<WaitConfig>,
    pub tags: Vec<(String, String)>,
}

/// Create the stack, or update it if it already exists.
#[instrument(skip_all, fields(stack = %stack_name))]
pub async fn deploy<T: StackOperations>(
    ops: &T,
    stack_name: &str,
    template_body: &str,
    options: &DeployOptions,
    cancel: Option<&CancellationToken>,
) -> Result<DeployOutcome> {
    let existing = ops.describe_stack(stack_name).await?;

    let action = match existing {
        None => {
            info!("Creating stack");
            ops.create_stack(stack_name, template_body, options.tags.clone())
                .await?;
            DeployAction::Created
        }
        Some(stack) if stack.needs_replacement() => {
            anyhow::bail!(
                "Stack {} cannot be updated ({}); run `simple-k3s destroy` before deploying again",
                stack_name,
                stack.status
            );
        }
        Some(stack) if stack.phase() == StackPhase::InProgress => {
            anyhow::bail!(
                "Stack {} is busy ({}); wait for the current operation to finish",
                stack_name,
                stack.status
            );
        }
        Some(stack) => {
            info!(status = %stack.status, "Updating existing stack");
            let tags = update_tags(&options.tags, &stack);
            match ops
                .update_stack(stack_name, template_body, tags)
                .await?
            {
                UpdateOutcome::Started(_) => DeployAction::Updated,
                UpdateOutcome::NoChanges => {
                    return Ok(DeployOutcome {
                        action: DeployAction::Unchanged,
                        outputs: stack.outputs,
                    });
                }
            }
        }
    };

    let Some(wait) = options.wait.clone() else {
        return Ok(DeployOutcome {
            action: DeployAction::Submitted,
            outputs: BTreeMap::new(),
        });
    };

    let settled = wait_for_stack(ops, stack_name, wait, cancel).await?;
    match settled {
        Some(stack) if stack.phase() == StackPhase::Complete => {
            info!(status = %stack.status, outputs = stack.outputs.len(), "Stack deployed");
            Ok(DeployOutcome {
                action,
                outputs: stack.outputs,
            })
        }
        Some(stack) => Err(stack_failure(stack_name, &stack)),
        None => anyhow::bail!("Stack {} disappeared while deploying", stack_name),
    }
}

/// Delete the stack. Deleting a stack that does not exist succeeds.
#[instrument(skip_all, fields(stack = %stack_name))]
pub async fn destroy<T: StackOperations>(
    ops: &T,
    stack_name: &str,
    wait: Option<WaitConfig>,
    cancel: Option<&CancellationToken>,
) -> Result<()> {
    if ops.describe_stack(stack_name).await?.is_none() {
        info!("Stack does not exist, nothing to delete");
        return Ok(());
    }

    ops.delete_stack(stack_name).await?;
    let Some(wait) = wait else {
        return Ok(());
    };

    match wait_for_stack(ops, stack_name, wait, cancel).await? {
        None => {
            info!("Stack deleted");
            Ok(())
        }
        Some(stack) if stack.status == "DELETE_COMPLETE" => {
            info!("Stack deleted");
            Ok(())
        }
        Some(stack) => Err(stack_failure(stack_name, &stack)),
    }
}

/// Current outputs of a deployed stack
pub async fn stack_outputs<T: StackOperations>(
    ops: &T,
    stack_name: &str,
) -> Result<BTreeMap<String, String>> {
    let stack = ops
        .describe_stack(stack_name)
        .await?
        .with_context(|| format!("Stack {stack_name} does not exist"))?;
    if stack.phase() != StackPhase::Complete {
        warn!(status = %stack.status, "Stack is not in a completed state; outputs may be stale");
    }
    Ok(stack.outputs)
}

/// Poll until the stack leaves its in-progress states.
///
/// Returns the settled description, or `None` once the stack is gone.
async fn wait_for_stack<T: StackOperations>(
    ops: &T,
    stack_name: &str,
    wait: WaitConfig,
    cancel: Option<&CancellationToken>,
) -> Result<Option<StackDescription>> {
    wait_for_resource(
        wait,
        cancel,
        move || async move {
            let settled = match ops.describe_stack(stack_name).await? {
                Some(stack) => {
                    debug!(status = %stack.status, "Stack status");
                    stack.phase() != StackPhase::InProgress
                }
                None => true,
            };
            Ok::<_, anyhow::Error>(settled)
        },
        stack_name,
    )
    .await?;
    ops.describe_stack(stack_name).await
}

/// Tags for an update. The stack keeps the creation timestamp it already
/// carries, so an unchanged template stays a no-op.
fn update_tags(tags: &[(String, String)], existing: &StackDescription) -> Vec<(String, String)> {
    let created_at = existing
        .tag(TAG_CREATED_AT)
        .filter(|value| parse_created_at(value).is_some());
    if created_at.is_none() {
        debug!("Stack has no valid creation timestamp tag; stamping a new one");
    }

    tags.iter()
        .map(|(key, value)| match created_at {
            Some(created_at) if key == TAG_CREATED_AT => (key.clone(), created_at.to_string()),
            _ => (key.clone(), value.clone()),
        })
        .collect()
}

fn stack_failure(stack_name: &str, stack: &StackDescription) -> anyhow::Error {
    match &stack.status_reason {
        Some(reason) => {
            anyhow::anyhow!("Stack {} ended in {}: {}", stack_name, stack.status, reason)
        }
        None => anyhow::anyhow!("Stack {} ended in {}", stack_name, stack.status),
    }
}
