//! Network descriptors: CIDR ranges, subnet layouts and the VPC spec
//!
//! A [`NetworkSpec`] carries the subnet *layouts* it was built from, plus the
//! concrete per-AZ [`SubnetAllocation`]s those layouts expand to. Allocation
//! happens once, at build time, so an exhausted address range is reported
//! before anything is synthesized.

use crate::error::{DescriptorError, Result};
use crate::template::intrinsics::logical_id;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 network in CIDR notation (`10.0.0.0/21`)
///
/// Host bits must be zero; `10.0.0.1/21` is rejected rather than silently
/// truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cidr {
    network: Ipv4Addr,
    prefix_len: u8,
}

/// RFC 1918 private ranges
const PRIVATE_RANGES: [Cidr; 3] = [
    Cidr {
        network: Ipv4Addr::new(10, 0, 0, 0),
        prefix_len: 8,
    },
    Cidr {
        network: Ipv4Addr::new(172, 16, 0, 0),
        prefix_len: 12,
    },
    Cidr {
        network: Ipv4Addr::new(192, 168, 0, 0),
        prefix_len: 16,
    },
];

fn mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}

impl Cidr {
    /// Create a CIDR from a network address and prefix length
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 32 {
            return Err(DescriptorError::InvalidCidr {
                cidr: format!("{network}/{prefix_len}"),
                reason: "prefix length must be 0-32",
            });
        }
        if u32::from(network) & !mask(prefix_len) != 0 {
            return Err(DescriptorError::InvalidCidr {
                cidr: format!("{network}/{prefix_len}"),
                reason: "host bits must be zero",
            });
        }
        Ok(Self {
            network,
            prefix_len,
        })
    }

    /// `0.0.0.0/0`
    pub const fn any_ipv4() -> Self {
        Self {
            network: Ipv4Addr::UNSPECIFIED,
            prefix_len: 0,
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Number of addresses in the range
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len))
    }

    fn start(&self) -> u64 {
        u64::from(u32::from(self.network))
    }

    fn end(&self) -> u64 {
        self.start() + self.size()
    }

    /// True if `other` lies entirely inside this range
    pub fn contains(&self, other: &Cidr) -> bool {
        other.start() >= self.start() && other.end() <= self.end()
    }

    /// True if the two ranges share at least one address
    pub fn overlaps(&self, other: &Cidr) -> bool {
        self.start() < other.end() && other.start() < self.end()
    }

    /// True if the range sits inside one of the RFC 1918 blocks
    pub fn is_private(&self) -> bool {
        PRIVATE_RANGES.iter().any(|range| range.contains(self))
    }
}

impl FromStr for Cidr {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason| DescriptorError::InvalidCidr {
            cidr: s.to_string(),
            reason,
        };

        let (addr, prefix) = s.split_once('/').ok_or_else(|| invalid("missing '/'"))?;
        let network: Ipv4Addr = addr
            .parse()
            .map_err(|_| invalid("address is not a dotted IPv4 quad"))?;
        let prefix_len: u8 = prefix
            .parse()
            .map_err(|_| invalid("prefix length is not a number"))?;

        Cidr::new(network, prefix_len).map_err(|e| match e {
            DescriptorError::InvalidCidr { reason, .. } => invalid(reason),
            other => other,
        })
    }
}

impl TryFrom<String> for Cidr {
    type Error = DescriptorError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Cidr> for String {
    fn from(cidr: Cidr) -> Self {
        cidr.to_string()
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Whether a subnet routes through the internet gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubnetVisibility {
    Public,
    Private,
}

impl SubnetVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubnetVisibility::Public => "Public",
            SubnetVisibility::Private => "Private",
        }
    }
}

/// One subnet layout, repeated in every availability zone
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubnetSpec {
    pub name: String,
    pub visibility: SubnetVisibility,
    pub prefix_length: u8,
}

impl SubnetSpec {
    pub fn public(name: impl Into<String>, prefix_length: u8) -> Self {
        Self {
            name: name.into(),
            visibility: SubnetVisibility::Public,
            prefix_length,
        }
    }

    pub fn private(name: impl Into<String>, prefix_length: u8) -> Self {
        Self {
            name: name.into(),
            visibility: SubnetVisibility::Private,
            prefix_length,
        }
    }
}

/// A concrete subnet: one layout placed in one availability zone
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SubnetAllocation {
    pub name: String,
    pub visibility: SubnetVisibility,
    /// Zero-based index into the region's availability zones
    pub az_index: u32,
    pub cidr: Cidr,
}

/// VPC descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkSpec {
    name: String,
    cidr_block: Cidr,
    max_azs: u32,
    subnets: Vec<SubnetSpec>,
    allocations: Vec<SubnetAllocation>,
}

impl NetworkSpec {
    pub fn builder(name: impl Into<String>) -> NetworkSpecBuilder {
        NetworkSpecBuilder {
            name: name.into(),
            cidr: None,
            max_azs: 1,
            subnets: Vec::new(),
        }
    }

    /// Construct id used for logical ids in the template
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cidr_block(&self) -> Cidr {
        self.cidr_block
    }

    pub fn max_azs(&self) -> u32 {
        self.max_azs
    }

    /// Subnet layouts, in the order they were supplied
    pub fn subnets(&self) -> &[SubnetSpec] {
        &self.subnets
    }

    /// Concrete per-AZ subnets, layout-major then AZ-minor
    pub fn allocations(&self) -> &[SubnetAllocation] {
        &self.allocations
    }

    /// Allocations of the given visibility
    pub fn allocations_of(
        &self,
        visibility: SubnetVisibility,
    ) -> impl Iterator<Item = &SubnetAllocation> {
        self.allocations
            .iter()
            .filter(move |a| a.visibility == visibility)
    }

    pub fn has_public_subnets(&self) -> bool {
        self.allocations_of(SubnetVisibility::Public).next().is_some()
    }
}

/// Builder for [`NetworkSpec`]
#[derive(Debug, Clone)]
pub struct NetworkSpecBuilder {
    name: String,
    cidr: Option<String>,
    max_azs: u32,
    subnets: Vec<SubnetSpec>,
}

impl NetworkSpecBuilder {
    pub fn cidr(mut self, cidr: impl Into<String>) -> Self {
        self.cidr = Some(cidr.into());
        self
    }

    pub fn max_azs(mut self, max_azs: u32) -> Self {
        self.max_azs = max_azs;
        self
    }

    pub fn subnet(mut self, subnet: SubnetSpec) -> Self {
        self.subnets.push(subnet);
        self
    }

    pub fn subnets(mut self, subnets: impl IntoIterator<Item = SubnetSpec>) -> Self {
        self.subnets.extend(subnets);
        self
    }

    pub fn build(self) -> Result<NetworkSpec> {
        if self.name.is_empty() {
            return Err(DescriptorError::EmptyName("network name"));
        }
        let cidr_block: Cidr = self
            .cidr
            .as_deref()
            .ok_or(DescriptorError::MissingField("cidr"))?
            .parse()?;
        if !cidr_block.is_private() {
            return Err(DescriptorError::PublicCidr(cidr_block.to_string()));
        }
        if self.max_azs == 0 {
            return Err(DescriptorError::NoAvailabilityZones);
        }
        let mut layout_ids: HashMap<String, &str> = HashMap::new();
        for subnet in &self.subnets {
            let id = logical_id(&["", &subnet.name]);
            if id.is_empty() {
                return Err(DescriptorError::EmptyName("subnet name"));
            }
            if let Some(other) = layout_ids.insert(id, &subnet.name) {
                return Err(DescriptorError::DuplicateSubnetName {
                    name: subnet.name.clone(),
                    other: other.to_string(),
                });
            }
            if subnet.prefix_length == 0
                || subnet.prefix_length > 32
                || subnet.prefix_length < cidr_block.prefix_len()
            {
                return Err(DescriptorError::InvalidSubnetPrefix {
                    name: subnet.name.clone(),
                    prefix: subnet.prefix_length,
                    vpc_prefix: cidr_block.prefix_len(),
                });
            }
        }

        let allocations = allocate_subnets(cidr_block, self.max_azs, &self.subnets)?;

        Ok(NetworkSpec {
            name: self.name,
            cidr_block,
            max_azs: self.max_azs,
            subnets: self.subnets,
            allocations,
        })
    }
}

/// Carve subnets out of the VPC range sequentially, aligning each block to
/// its own size.
fn allocate_subnets(
    vpc: Cidr,
    max_azs: u32,
    layouts: &[SubnetSpec],
) -> Result<Vec<SubnetAllocation>> {
    let mut cursor = vpc.start();
    let mut allocations = Vec::with_capacity(layouts.len() * max_azs as usize);

    for layout in layouts {
        let size = 1u64 << (32 - u32::from(layout.prefix_length));
        for az_index in 0..max_azs {
            let start = cursor.div_ceil(size) * size;
            if start + size > vpc.end() {
                return Err(DescriptorError::CidrExhausted {
                    vpc: vpc.to_string(),
                    name: layout.name.clone(),
                    prefix: layout.prefix_length,
                    az_index,
                });
            }
            // start < 2^32 is guaranteed by the bound check above
            let cidr = Cidr::new(Ipv4Addr::from(start as u32), layout.prefix_length)?;
            allocations.push(SubnetAllocation {
                name: layout.name.clone(),
                visibility: layout.visibility,
                az_index,
                cidr,
            });
            cursor = start + size;
        }
    }

    Ok(allocations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock_network() -> NetworkSpec {
        NetworkSpec::builder("eksVpc")
            .cidr("10.0.0.0/21")
            .max_azs(3)
            .subnet(SubnetSpec::public("public", 24))
            .build()
            .unwrap()
    }

    #[test]
    fn test_cidr_parse_display() {
        let cidr: Cidr = "10.0.0.0/21".parse().unwrap();
        assert_eq!(cidr.network(), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(cidr.prefix_len(), 21);
        assert_eq!(cidr.size(), 2048);
        assert_eq!(cidr.to_string(), "10.0.0.0/21");
    }

    #[test]
    fn test_cidr_rejects_malformed() {
        for bad in ["10.0.0.0", "10.0.0/21", "10.0.0.0/33", "10.0.0.1/21", "a.b.c.d/8", ""] {
            assert!(
                matches!(bad.parse::<Cidr>(), Err(DescriptorError::InvalidCidr { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_cidr_private_ranges() {
        assert!("10.0.0.0/21".parse::<Cidr>().unwrap().is_private());
        assert!("172.20.0.0/16".parse::<Cidr>().unwrap().is_private());
        assert!("192.168.1.0/24".parse::<Cidr>().unwrap().is_private());
        assert!(!"172.32.0.0/16".parse::<Cidr>().unwrap().is_private());
        assert!(!"8.8.8.0/24".parse::<Cidr>().unwrap().is_private());
        assert!(!Cidr::any_ipv4().is_private());
    }

    #[test]
    fn test_cidr_serde_as_string() {
        let cidr: Cidr = "10.0.1.0/24".parse().unwrap();
        assert_eq!(serde_json::to_string(&cidr).unwrap(), "\"10.0.1.0/24\"");
        let parsed: Cidr = serde_json::from_str("\"10.0.1.0/24\"").unwrap();
        assert_eq!(parsed, cidr);
        assert!(serde_json::from_str::<Cidr>("\"10.0.1.1/24\"").is_err());
    }

    #[test]
    fn test_stock_network_allocations() {
        let network = stock_network();
        assert_eq!(network.subnets().len(), 1);
        let cidrs: Vec<String> = network
            .allocations()
            .iter()
            .map(|a| a.cidr.to_string())
            .collect();
        assert_eq!(cidrs, ["10.0.0.0/24", "10.0.1.0/24", "10.0.2.0/24"]);
        let azs: Vec<u32> = network.allocations().iter().map(|a| a.az_index).collect();
        assert_eq!(azs, [0, 1, 2]);
        assert!(network.has_public_subnets());
    }

    #[test]
    fn test_mixed_prefix_alignment() {
        let network = NetworkSpec::builder("vpc")
            .cidr("10.0.0.0/16")
            .max_azs(2)
            .subnet(SubnetSpec::public("public", 26))
            .subnet(SubnetSpec::private("private", 24))
            .build()
            .unwrap();
        let cidrs: Vec<String> = network
            .allocations()
            .iter()
            .map(|a| a.cidr.to_string())
            .collect();
        assert_eq!(
            cidrs,
            ["10.0.0.0/26", "10.0.0.64/26", "10.0.1.0/24", "10.0.2.0/24"]
        );
    }

    #[test]
    fn test_public_cidr_rejected() {
        let err = NetworkSpec::builder("vpc")
            .cidr("54.0.0.0/16")
            .build()
            .unwrap_err();
        assert_eq!(err, DescriptorError::PublicCidr("54.0.0.0/16".into()));
    }

    #[test]
    fn test_zero_azs_rejected() {
        let err = NetworkSpec::builder("vpc")
            .cidr("10.0.0.0/16")
            .max_azs(0)
            .build()
            .unwrap_err();
        assert_eq!(err, DescriptorError::NoAvailabilityZones);
    }

    #[test]
    fn test_missing_cidr_rejected() {
        let err = NetworkSpec::builder("vpc").build().unwrap_err();
        assert_eq!(err, DescriptorError::MissingField("cidr"));
    }

    #[test]
    fn test_subnet_wider_than_vpc_rejected() {
        let err = NetworkSpec::builder("vpc")
            .cidr("10.0.0.0/21")
            .subnet(SubnetSpec::public("public", 20))
            .build()
            .unwrap_err();
        assert!(matches!(err, DescriptorError::InvalidSubnetPrefix { prefix: 20, .. }));
    }

    #[test]
    fn test_exhausted_range_rejected() {
        // A /21 holds eight /24s; nine AZs cannot fit
        let err = NetworkSpec::builder("vpc")
            .cidr("10.0.0.0/21")
            .max_azs(9)
            .subnet(SubnetSpec::public("public", 24))
            .build()
            .unwrap_err();
        assert!(matches!(err, DescriptorError::CidrExhausted { az_index: 8, .. }));
    }

    #[test]
    fn test_colliding_subnet_names_rejected() {
        for (first, second) in [("app", "app"), ("public", "Public"), ("web-a", "weba")] {
            let err = NetworkSpec::builder("vpc")
                .cidr("10.0.0.0/16")
                .subnet(SubnetSpec::public(first, 24))
                .subnet(SubnetSpec::private(second, 24))
                .build()
                .unwrap_err();
            assert_eq!(
                err,
                DescriptorError::DuplicateSubnetName {
                    name: second.into(),
                    other: first.into(),
                }
            );
        }

        let err = NetworkSpec::builder("vpc")
            .cidr("10.0.0.0/16")
            .subnet(SubnetSpec::public("--", 24))
            .build()
            .unwrap_err();
        assert_eq!(err, DescriptorError::EmptyName("subnet name"));

        let network = NetworkSpec::builder("vpc")
            .cidr("10.0.0.0/16")
            .subnet(SubnetSpec::public("web", 24))
            .subnet(SubnetSpec::private("web2", 24))
            .build()
            .unwrap();
        assert_eq!(network.subnets().len(), 2);
    }

    #[test]
    fn test_no_subnets_is_valid() {
        let network = NetworkSpec::builder("vpc")
            .cidr("10.0.0.0/16")
            .build()
            .unwrap();
        assert!(network.subnets().is_empty());
        assert!(!network.has_public_subnets());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Output subnet count always equals the number of layouts supplied
            #[test]
            fn subnet_count_matches_layouts(
                max_azs in 1u32..4,
                prefixes in prop::collection::vec(22u8..28, 0..6)
            ) {
                let layouts: Vec<SubnetSpec> = prefixes
                    .iter()
                    .enumerate()
                    .map(|(i, p)| SubnetSpec::public(format!("s{i}"), *p))
                    .collect();
                let network = NetworkSpec::builder("vpc")
                    .cidr("10.0.0.0/16")
                    .max_azs(max_azs)
                    .subnets(layouts.clone())
                    .build()
                    .unwrap();
                prop_assert_eq!(network.subnets(), layouts.as_slice());
                prop_assert_eq!(
                    network.allocations().len(),
                    layouts.len() * max_azs as usize
                );
            }

            /// Allocations stay inside the VPC and never overlap each other
            #[test]
            fn allocations_disjoint_and_contained(
                max_azs in 1u32..4,
                prefixes in prop::collection::vec(22u8..29, 1..5)
            ) {
                let network = NetworkSpec::builder("vpc")
                    .cidr("10.0.0.0/16")
                    .max_azs(max_azs)
                    .subnets(
                        prefixes
                            .iter()
                            .enumerate()
                            .map(|(i, p)| SubnetSpec::private(format!("s{i}"), *p)),
                    )
                    .build()
                    .unwrap();
                let allocations = network.allocations();
                for (i, a) in allocations.iter().enumerate() {
                    prop_assert!(network.cidr_block().contains(&a.cidr));
                    for b in &allocations[i + 1..] {
                        prop_assert!(!a.cidr.overlaps(&b.cidr), "{} overlaps {}", a.cidr, b.cidr);
                    }
                }
            }

            /// Parsing never panics on arbitrary input
            #[test]
            fn cidr_parse_never_panics(s in ".*") {
                let _ = s.parse::<Cidr>();
            }
        }
    }
}
