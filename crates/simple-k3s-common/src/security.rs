//! Security group descriptors
//!
//! Rules are an allow-list appended in call order. Nothing is merged or
//! de-duplicated: adding the same rule twice yields two rules, and the
//! template carries both.

use crate::error::{DescriptorError, Result};
use crate::network::{Cidr, NetworkSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Transport protocol of an ingress rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Value for the `IpProtocol` template property
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Traffic source of an ingress rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Peer {
    /// `0.0.0.0/0`
    AnyIpv4,
    Cidr(Cidr),
}

impl Peer {
    pub fn cidr(&self) -> Cidr {
        match self {
            Peer::AnyIpv4 => Cidr::any_ipv4(),
            Peer::Cidr(cidr) => *cidr,
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cidr())
    }
}

/// Protocol plus a single port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    pub protocol: Protocol,
    pub number: u16,
}

impl Port {
    pub fn tcp(number: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            number,
        }
    }

    pub fn udp(number: u16) -> Self {
        Self {
            protocol: Protocol::Udp,
            number,
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.protocol, self.number)
    }
}

/// One inbound permission
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IngressRule {
    pub peer: Peer,
    pub port: Port,
    pub label: String,
}

impl IngressRule {
    /// (protocol, port, source) triple identifying what the rule allows
    pub fn key(&self) -> (Protocol, u16, Cidr) {
        (self.port.protocol, self.port.number, self.peer.cidr())
    }
}

/// Security group descriptor, scoped to one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityPolicy {
    name: String,
    #[serde(skip)]
    network: Arc<NetworkSpec>,
    description: String,
    allow_all_outbound: bool,
    disable_inline_rules: bool,
    ingress_rules: Vec<IngressRule>,
}

impl SecurityPolicy {
    pub fn builder(name: impl Into<String>, network: Arc<NetworkSpec>) -> SecurityPolicyBuilder {
        SecurityPolicyBuilder {
            name: name.into(),
            network,
            description: None,
            allow_all_outbound: true,
            disable_inline_rules: false,
            ingress_rules: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The network this policy is scoped to (shared, not copied)
    pub fn network(&self) -> &Arc<NetworkSpec> {
        &self.network
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn allow_all_outbound(&self) -> bool {
        self.allow_all_outbound
    }

    /// Emit each ingress rule as its own resource instead of inlining it
    pub fn disable_inline_rules(&self) -> bool {
        self.disable_inline_rules
    }

    /// Ingress rules, in the order they were added
    pub fn ingress_rules(&self) -> &[IngressRule] {
        &self.ingress_rules
    }
}

/// Builder for [`SecurityPolicy`]
#[derive(Debug, Clone)]
pub struct SecurityPolicyBuilder {
    name: String,
    network: Arc<NetworkSpec>,
    description: Option<String>,
    allow_all_outbound: bool,
    disable_inline_rules: bool,
    ingress_rules: Vec<IngressRule>,
}

impl SecurityPolicyBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn allow_all_outbound(mut self, allow: bool) -> Self {
        self.allow_all_outbound = allow;
        self
    }

    pub fn disable_inline_rules(mut self, disable: bool) -> Self {
        self.disable_inline_rules = disable;
        self
    }

    /// Append an ingress rule. Duplicates are kept as-is.
    pub fn add_ingress_rule(mut self, peer: Peer, port: Port, label: impl Into<String>) -> Self {
        self.ingress_rules.push(IngressRule {
            peer,
            port,
            label: label.into(),
        });
        self
    }

    pub fn build(self) -> Result<SecurityPolicy> {
        if self.name.is_empty() {
            return Err(DescriptorError::EmptyName("security group name"));
        }
        let description = self
            .description
            .unwrap_or_else(|| format!("{}/{}", self.network.name(), self.name));

        Ok(SecurityPolicy {
            name: self.name,
            network: self.network,
            description,
            allow_all_outbound: self.allow_all_outbound,
            disable_inline_rules: self.disable_inline_rules,
            ingress_rules: self.ingress_rules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::SubnetSpec;

    fn network() -> Arc<NetworkSpec> {
        Arc::new(
            NetworkSpec::builder("eksVpc")
                .cidr("10.0.0.0/21")
                .max_azs(3)
                .subnet(SubnetSpec::public("public", 24))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_stock_ports() {
        let policy = SecurityPolicy::builder("eksSecurityGroup", network())
            .description("EKS Security Groups")
            .disable_inline_rules(true)
            .add_ingress_rule(Peer::AnyIpv4, Port::tcp(22), "Allow SSH")
            .add_ingress_rule(Peer::AnyIpv4, Port::tcp(80), "Allow HTTP")
            .add_ingress_rule(Peer::AnyIpv4, Port::tcp(5000), "Allow Application")
            .add_ingress_rule(Peer::AnyIpv4, Port::tcp(30007), "Allow Custom Application")
            .build()
            .unwrap();

        let keys: Vec<_> = policy.ingress_rules().iter().map(IngressRule::key).collect();
        let any = Cidr::any_ipv4();
        assert_eq!(
            keys,
            [
                (Protocol::Tcp, 22, any),
                (Protocol::Tcp, 80, any),
                (Protocol::Tcp, 5000, any),
                (Protocol::Tcp, 30007, any),
            ]
        );
        assert!(policy.allow_all_outbound());
        assert!(policy.disable_inline_rules());
        assert_eq!(policy.description(), "EKS Security Groups");
    }

    #[test]
    fn test_duplicates_pass_through() {
        let policy = SecurityPolicy::builder("sg", network())
            .add_ingress_rule(Peer::AnyIpv4, Port::tcp(22), "Allow SSH")
            .add_ingress_rule(Peer::AnyIpv4, Port::tcp(22), "Allow SSH")
            .add_ingress_rule(Peer::AnyIpv4, Port::udp(22), "Allow SSH over udp?")
            .build()
            .unwrap();
        assert_eq!(policy.ingress_rules().len(), 3);
        assert_eq!(policy.ingress_rules()[0], policy.ingress_rules()[1]);
    }

    #[test]
    fn test_network_is_shared_not_copied() {
        let network = network();
        let policy = SecurityPolicy::builder("sg", Arc::clone(&network))
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(policy.network(), &network));
    }

    #[test]
    fn test_default_description() {
        let policy = SecurityPolicy::builder("sg", network()).build().unwrap();
        assert_eq!(policy.description(), "eksVpc/sg");
    }

    #[test]
    fn test_peer_display() {
        assert_eq!(Peer::AnyIpv4.to_string(), "0.0.0.0/0");
        let cidr: Cidr = "10.1.0.0/16".parse().unwrap();
        assert_eq!(Peer::Cidr(cidr).to_string(), "10.1.0.0/16");
        assert_eq!(Port::tcp(443).to_string(), "tcp/443");
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_port() -> impl Strategy<Value = Port> {
            (any::<bool>(), any::<u16>())
                .prop_map(|(tcp, n)| if tcp { Port::tcp(n) } else { Port::udp(n) })
        }

        proptest! {
            /// Rule count always equals the number of rules supplied, duplicates included
            #[test]
            fn rule_count_matches_input(
                ports in prop::collection::vec(arb_port(), 0..64)
            ) {
                let mut builder = SecurityPolicy::builder("sg", network());
                for port in &ports {
                    builder = builder.add_ingress_rule(Peer::AnyIpv4, *port, "rule");
                }
                let policy = builder.build().unwrap();
                prop_assert_eq!(policy.ingress_rules().len(), ports.len());
                let out: Vec<Port> = policy.ingress_rules().iter().map(|r| r.port).collect();
                prop_assert_eq!(out, ports);
            }
        }
    }
}
