//! Stack assembly
//!
//! [`build_graph`] runs the four construction stages in order (network,
//! access policy, image, instance) and returns the resulting
//! [`DescriptorGraph`]. Later stages receive earlier descriptors by `Arc`, so
//! the graph holds exactly one network and one security policy no matter how
//! many descriptors point at them.

use crate::bootstrap::{CloudFormationInit, InitConfig, InitElement, InitOptions, UserData};
use crate::config::{ConfigError, DeploymentConfig};
use crate::defaults::{DEFAULT_SECURITY_GROUP_DESCRIPTION, DEFAULT_SUBNET_NAME, PUBLIC_ADDRESS_OUTPUT};
use crate::error::{DescriptorError, Result};
use crate::image::ImageSelector;
use crate::instance::{InstanceDescriptor, InstanceType};
use crate::network::{Cidr, NetworkSpec, SubnetSpec};
use crate::security::{Peer, Port, Protocol, SecurityPolicy};
use crate::volume::VolumeSpec;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Construct ids of the stock stack's resources
pub const VPC_ID: &str = "eksVpc";
pub const SECURITY_GROUP_ID: &str = "eksSecurityGroup";
pub const INSTANCE_ID: &str = "eksInstance";

/// Instance attribute exported as a stack output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OutputValue {
    InstancePublicIp,
    InstancePublicDnsName,
    InstanceId,
}

/// A named value exposed by the deployed stack
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StackOutput {
    pub name: String,
    pub value: OutputValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StackOutput {
    pub fn new(name: impl Into<String>, value: OutputValue) -> Self {
        Self {
            name: name.into(),
            value,
            description: None,
        }
    }
}

/// Everything handed to the synthesizer, with references kept intact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorGraph {
    stack_name: String,
    instance: Arc<InstanceDescriptor>,
    outputs: Vec<StackOutput>,
}

impl DescriptorGraph {
    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    pub fn network(&self) -> &Arc<NetworkSpec> {
        self.instance.network()
    }

    pub fn security_policy(&self) -> &Arc<SecurityPolicy> {
        self.instance.security_policy()
    }

    pub fn instance(&self) -> &Arc<InstanceDescriptor> {
        &self.instance
    }

    pub fn outputs(&self) -> &[StackOutput] {
        &self.outputs
    }
}

/// Compose an assembled instance and its outputs into a graph
pub fn assemble(
    stack_name: impl Into<String>,
    instance: InstanceDescriptor,
    outputs: impl IntoIterator<Item = StackOutput>,
) -> Result<DescriptorGraph> {
    let stack_name = stack_name.into();
    if stack_name.is_empty() {
        return Err(DescriptorError::EmptyName("stack name"));
    }
    Ok(DescriptorGraph {
        stack_name,
        instance: Arc::new(instance),
        outputs: outputs.into_iter().collect(),
    })
}

/// Build the descriptor graph described by `config`
pub fn build_graph(config: &DeploymentConfig) -> std::result::Result<DescriptorGraph, ConfigError> {
    // 1. network
    let network = Arc::new(
        NetworkSpec::builder(VPC_ID)
            .cidr(config.vpc_cidr.as_str())
            .max_azs(config.max_azs)
            .subnet(SubnetSpec::public(DEFAULT_SUBNET_NAME, config.subnet_mask))
            .build()?,
    );
    debug!(
        cidr = %network.cidr_block(),
        subnets = network.allocations().len(),
        "Built network descriptor"
    );

    // 2. access policy
    let mut policy = SecurityPolicy::builder(SECURITY_GROUP_ID, Arc::clone(&network))
        .description(DEFAULT_SECURITY_GROUP_DESCRIPTION)
        .allow_all_outbound(true)
        .disable_inline_rules(true);
    for rule in &config.ingress {
        let peer = match rule.source.as_deref() {
            Some(source) => Peer::Cidr(source.parse::<Cidr>()?),
            None => Peer::AnyIpv4,
        };
        let port = match rule.protocol {
            Protocol::Tcp => Port::tcp(rule.port),
            Protocol::Udp => Port::udp(rule.port),
        };
        policy = policy.add_ingress_rule(peer, port, rule.label.as_str());
    }
    let policy = Arc::new(policy.build()?);
    debug!(rules = policy.ingress_rules().len(), "Built security policy");

    // 3. image
    let image = ImageSelector::default();
    debug!(parameter = %image.ssm_parameter(), "Selected machine image");

    // 4. instance
    let instance_type: InstanceType = config
        .instance_type
        .parse()
        .map_err(ConfigError::InstanceType)?;
    let volume = VolumeSpec::ebs(config.root_device.as_str(), config.root_volume_size_gib)?;

    let mut user_data = UserData::for_linux();
    user_data.add_commands(config.user_data_commands.iter().map(String::as_str));

    let init = CloudFormationInit::builder()
        .config_set("default", ["yumPreinstall", "config"])
        .config(
            "yumPreinstall",
            InitConfig::new(config.yum_packages.iter().map(InitElement::yum)),
        )
        .config(
            "config",
            InitConfig::new(
                config
                    .init_commands
                    .iter()
                    .map(InitElement::shell_command)
                    .chain(config.init_services.iter().map(InitElement::enable_service)),
            ),
        )
        .build()?;
    let init_options = InitOptions::new(["default"], Duration::from_secs(config.init_timeout_secs));

    let instance = InstanceDescriptor::builder(INSTANCE_ID, network, policy)
        .image(image)
        .instance_type(instance_type)
        .volume(volume)
        .user_data(user_data)
        .init(init, init_options)
        .build()?;
    debug!(instance_type = %instance.instance_type(), "Assembled instance descriptor");

    Ok(assemble(
        config.stack_name.as_str(),
        instance,
        [StackOutput::new(PUBLIC_ADDRESS_OUTPUT, OutputValue::InstancePublicIp)],
    )?)
}
