//! First-boot bootstrap descriptors
//!
//! Two mechanisms run on the instance's first boot:
//!
//! - [`UserData`]: an ordered shell script handed to cloud-init verbatim.
//! - [`CloudFormationInit`]: `AWS::CloudFormation::Init` metadata applied by
//!   `cfn-init`, grouped into named configs and ordered config sets.
//!
//! Neither is idempotent. Commands run once, in the order given, and their
//! outcome is only observed through the engine's creation signal.

use crate::error::{DescriptorError, Result};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::time::Duration;

/// Ordered first-boot shell commands
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
pub struct UserData {
    commands: Vec<String>,
}

impl UserData {
    pub fn for_linux() -> Self {
        Self::default()
    }

    pub fn add_commands<I, S>(&mut self, commands: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands.extend(commands.into_iter().map(Into::into));
    }

    /// Commands in insertion order
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Render as a bash script
    pub fn render(&self) -> String {
        let mut script = String::from("#!/bin/bash");
        for command in &self.commands {
            script.push('\n');
            script.push_str(command);
        }
        script
    }
}

/// Package manager for [`InitElement::Package`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Yum,
    Rpm,
    Python,
}

impl PackageManager {
    fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Yum => "yum",
            PackageManager::Rpm => "rpm",
            PackageManager::Python => "python",
        }
    }
}

/// One cfn-init action
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitElement {
    Package {
        manager: PackageManager,
        name: String,
    },
    Command {
        shell: String,
    },
    Service {
        name: String,
        enabled: bool,
        ensure_running: bool,
    },
}

impl InitElement {
    pub fn yum(name: impl Into<String>) -> Self {
        InitElement::Package {
            manager: PackageManager::Yum,
            name: name.into(),
        }
    }

    pub fn shell_command(shell: impl Into<String>) -> Self {
        InitElement::Command {
            shell: shell.into(),
        }
    }

    /// Enable a sysvinit service and keep it running
    pub fn enable_service(name: impl Into<String>) -> Self {
        InitElement::Service {
            name: name.into(),
            enabled: true,
            ensure_running: true,
        }
    }
}

/// A named group of init elements
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
pub struct InitConfig {
    elements: Vec<InitElement>,
}

impl InitConfig {
    pub fn new(elements: impl IntoIterator<Item = InitElement>) -> Self {
        Self {
            elements: elements.into_iter().collect(),
        }
    }

    pub fn elements(&self) -> &[InitElement] {
        &self.elements
    }

    /// Shell commands in insertion order
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().filter_map(|e| match e {
            InitElement::Command { shell } => Some(shell.as_str()),
            _ => None,
        })
    }

    /// Render the cfn-init config block.
    ///
    /// cfn-init runs commands in lexical key order, so keys are zero-padded
    /// positions wide enough for the command count.
    pub fn to_metadata(&self) -> Value {
        let mut packages: BTreeMap<&str, Map<String, Value>> = BTreeMap::new();
        let mut services = Map::new();
        let shells: Vec<&str> = self.commands().collect();
        let width = shells.len().saturating_sub(1).to_string().len().max(3);

        for element in &self.elements {
            match element {
                InitElement::Package { manager, name } => {
                    packages
                        .entry(manager.as_str())
                        .or_default()
                        .insert(name.clone(), json!([]));
                }
                InitElement::Service {
                    name,
                    enabled,
                    ensure_running,
                } => {
                    services.insert(
                        name.clone(),
                        json!({ "enabled": enabled, "ensureRunning": ensure_running }),
                    );
                }
                InitElement::Command { .. } => {}
            }
        }

        let mut block = Map::new();
        if !packages.is_empty() {
            let packages: Map<String, Value> = packages
                .into_iter()
                .map(|(manager, names)| (manager.to_string(), Value::Object(names)))
                .collect();
            block.insert("packages".into(), Value::Object(packages));
        }
        if !shells.is_empty() {
            let commands: Map<String, Value> = shells
                .iter()
                .enumerate()
                .map(|(i, shell)| (format!("{i:0width$}"), json!({ "command": shell })))
                .collect();
            block.insert("commands".into(), Value::Object(commands));
        }
        if !services.is_empty() {
            block.insert("services".into(), json!({ "sysvinit": services }));
        }
        Value::Object(block)
    }
}

/// `AWS::CloudFormation::Init` metadata: config sets plus the configs they run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
pub struct CloudFormationInit {
    config_sets: BTreeMap<String, Vec<String>>,
    configs: BTreeMap<String, InitConfig>,
}

impl CloudFormationInit {
    pub fn builder() -> CloudFormationInitBuilder {
        CloudFormationInitBuilder::default()
    }

    /// Config names each set runs, in order
    pub fn config_sets(&self) -> &BTreeMap<String, Vec<String>> {
        &self.config_sets
    }

    pub fn config(&self, name: &str) -> Option<&InitConfig> {
        self.configs.get(name)
    }

    /// Every shell command a config set would run, in execution order
    pub fn commands_for(&self, config_set: &str) -> Option<Vec<&str>> {
        let names = self.config_sets.get(config_set)?;
        Some(
            names
                .iter()
                .filter_map(|name| self.configs.get(name))
                .flat_map(InitConfig::commands)
                .collect(),
        )
    }

    /// Render the full metadata value
    pub fn to_metadata(&self) -> Value {
        let mut metadata = Map::new();
        metadata.insert("configSets".into(), json!(self.config_sets));
        for (name, config) in &self.configs {
            metadata.insert(name.clone(), config.to_metadata());
        }
        Value::Object(metadata)
    }
}

/// Builder for [`CloudFormationInit`]
#[derive(Debug, Clone, Default)]
pub struct CloudFormationInitBuilder {
    config_sets: BTreeMap<String, Vec<String>>,
    configs: BTreeMap<String, InitConfig>,
}

impl CloudFormationInitBuilder {
    pub fn config_set<I, S>(mut self, name: impl Into<String>, configs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config_sets
            .insert(name.into(), configs.into_iter().map(Into::into).collect());
        self
    }

    pub fn config(mut self, name: impl Into<String>, config: InitConfig) -> Self {
        self.configs.insert(name.into(), config);
        self
    }

    pub fn build(self) -> Result<CloudFormationInit> {
        for (set, names) in &self.config_sets {
            if let Some(missing) = names.iter().find(|n| !self.configs.contains_key(*n)) {
                return Err(DescriptorError::UnknownInitConfig {
                    config_set: set.clone(),
                    config: missing.clone(),
                });
            }
        }
        Ok(CloudFormationInit {
            config_sets: self.config_sets,
            configs: self.configs,
        })
    }
}

/// How the instance applies its init metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct InitOptions {
    pub config_sets: Vec<String>,
    /// How long the engine waits for the success signal
    pub timeout: Duration,
}

impl InitOptions {
    pub fn new<I, S>(config_sets: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            config_sets: config_sets.into_iter().map(Into::into).collect(),
            timeout,
        }
    }

    /// Timeout as an ISO 8601 duration (`PT1H`, `PT15M`, `PT90S`)
    pub fn iso_timeout(&self) -> String {
        let secs = self.timeout.as_secs();
        if secs == 0 {
            return "PT0S".to_string();
        }
        let mut iso = String::from("PT");
        for (value, unit) in [(secs / 3600, 'H'), (secs % 3600 / 60, 'M'), (secs % 60, 'S')] {
            if value > 0 {
                iso.push_str(&format!("{value}{unit}"));
            }
        }
        iso
    }

    /// Every selected config set must exist in `init`
    pub fn check_against(&self, init: &CloudFormationInit) -> Result<()> {
        match self
            .config_sets
            .iter()
            .find(|set| !init.config_sets().contains_key(*set))
        {
            Some(missing) => Err(DescriptorError::UnknownConfigSet(missing.clone())),
            None => Ok(()),
        }
    }
}
