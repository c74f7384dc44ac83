//! Configuration types for the deployer

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use simple_k3s_common::tags::stack_tags;
use simple_k3s_common::{DeploymentConfig, Template, build_graph, synthesize};
use std::path::Path;
use tracing::debug;

/// AWS connection settings
#[derive(Debug, Clone)]
pub struct AwsConfig {
    /// AWS region
    pub region: String,
    /// AWS profile name (overrides default credential resolution)
    pub aws_profile: Option<String>,
}

/// Everything a stack command needs: where to deploy and what
#[derive(Debug, Clone)]
pub struct StackConfig {
    pub aws: AwsConfig,
    pub deployment: DeploymentConfig,
}

impl StackConfig {
    /// Load the deployment config (stock values without a file) and apply
    /// the command-line stack name, which wins over the file.
    pub fn resolve(
        aws: AwsConfig,
        config_path: Option<&Path>,
        stack_name: Option<&str>,
    ) -> Result<Self> {
        let mut deployment = DeploymentConfig::load_or_default(config_path)?;
        if let Some(name) = stack_name {
            deployment = deployment
                .with_stack_name(name)
                .with_context(|| format!("Invalid stack name '{name}'"))?;
        }
        debug!(
            stack = %deployment.stack_name,
            region = %aws.region,
            config = ?config_path,
            "Resolved stack configuration"
        );
        Ok(Self { aws, deployment })
    }

    pub fn stack_name(&self) -> &str {
        &self.deployment.stack_name
    }

    /// Build the descriptor graph and render it
    pub fn template(&self) -> Result<Template> {
        let graph = build_graph(&self.deployment).context("Failed to build stack descriptors")?;
        let template = synthesize(&graph).context("Failed to synthesize template")?;
        Ok(template)
    }

    /// Stack-level tags, owned for the SDK boundary
    pub fn tags(&self, now: DateTime<Utc>) -> Vec<(String, String)> {
        stack_tags(self.stack_name(), now)
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect()
    }
}
