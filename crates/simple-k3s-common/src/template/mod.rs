//! CloudFormation template model
//!
//! A [`Template`] is plain data: resources, parameters and outputs keyed by
//! logical id in `BTreeMap`s, so serializing the same graph twice yields the
//! same bytes. [`synthesize`] turns a [`DescriptorGraph`](crate::stack::DescriptorGraph)
//! into a template; the engine decides actual creation order at deploy time.

pub mod intrinsics;
mod synth;

pub use synth::synthesize;

use crate::error::{DescriptorError, Result};
use intrinsics::{Reference, collect_references};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

pub const FORMAT_VERSION: &str = "2010-09-09";

/// A template parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub parameter_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A template resource
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_policy: Option<Value>,
}

impl Resource {
    pub fn new(resource_type: &str, properties: Value) -> Self {
        let properties = match properties {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            resource_type: resource_type.to_string(),
            properties,
            depends_on: Vec::new(),
            metadata: None,
            creation_policy: None,
        }
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn creation_policy(mut self, policy: Value) -> Self {
        self.creation_policy = Some(policy);
        self
    }

    /// Every `Ref` / `Fn::GetAtt` in properties and metadata
    fn references(&self) -> Vec<Reference> {
        let mut refs = Vec::new();
        for value in self.properties.values() {
            collect_references(value, &mut refs);
        }
        if let Some(metadata) = &self.metadata {
            collect_references(metadata, &mut refs);
        }
        refs
    }
}

/// A stack output
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub value: Value,
}

/// A complete CloudFormation template
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    pub description: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,
    pub resources: BTreeMap<String, Resource>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

impl Template {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            description: description.into(),
            parameters: BTreeMap::new(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Insert a resource, failing if a resource or parameter already uses `id`
    pub fn add_resource(&mut self, id: impl Into<String>, resource: Resource) -> Result<()> {
        let id = id.into();
        if self.resources.contains_key(&id) || self.parameters.contains_key(&id) {
            return Err(DescriptorError::DuplicateLogicalId(id));
        }
        self.resources.insert(id, resource);
        Ok(())
    }

    /// Insert a parameter, failing if a resource or parameter already uses `id`
    pub fn add_parameter(&mut self, id: impl Into<String>, parameter: Parameter) -> Result<()> {
        let id = id.into();
        if self.resources.contains_key(&id) || self.parameters.contains_key(&id) {
            return Err(DescriptorError::DuplicateLogicalId(id));
        }
        self.parameters.insert(id, parameter);
        Ok(())
    }

    pub fn add_output(&mut self, id: impl Into<String>, output: Output) -> Result<()> {
        let id = id.into();
        if self.outputs.contains_key(&id) {
            return Err(DescriptorError::DuplicateLogicalId(id));
        }
        self.outputs.insert(id, output);
        Ok(())
    }

    /// Logical ids of all resources of `resource_type`, sorted
    pub fn resources_of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a str> {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == resource_type)
            .map(|(id, _)| id.as_str())
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Check that every `Ref`, `Fn::GetAtt` and `DependsOn` names something
    /// the template defines.
    ///
    /// `Ref` may point at a resource, a parameter or a pseudo parameter;
    /// `Fn::GetAtt` and `DependsOn` only at resources.
    pub fn validate_references(&self) -> Result<()> {
        let dangling = |from: &str, target: &str| DescriptorError::DanglingReference {
            from: from.to_string(),
            target: target.to_string(),
        };

        for (id, resource) in &self.resources {
            for reference in resource.references() {
                let target = reference.target();
                let known = match &reference {
                    Reference::Ref(_) => {
                        reference.is_pseudo_parameter()
                            || self.resources.contains_key(target)
                            || self.parameters.contains_key(target)
                    }
                    Reference::GetAtt(_) => self.resources.contains_key(target),
                };
                if !known {
                    return Err(dangling(id, target));
                }
            }
            if let Some(target) = resource
                .depends_on
                .iter()
                .find(|t| !self.resources.contains_key(*t))
            {
                return Err(dangling(id, target));
            }
        }

        for (name, output) in &self.outputs {
            let mut refs = Vec::new();
            collect_references(&output.value, &mut refs);
            for reference in &refs {
                let target = reference.target();
                if !reference.is_pseudo_parameter()
                    && !self.resources.contains_key(target)
                    && !self.parameters.contains_key(target)
                {
                    return Err(dangling(name, target));
                }
            }
        }
        Ok(())
    }

    /// Resource ids each resource waits on: its `DependsOn` plus every
    /// resource it references
    pub fn dependencies(&self) -> BTreeMap<&str, BTreeSet<&str>> {
        self.resources
            .iter()
            .map(|(id, resource)| {
                let refs = resource.references();
                let mut deps: BTreeSet<&str> = refs
                    .iter()
                    .filter_map(|r| self.resources.get_key_value(r.target()))
                    .map(|(key, _)| key.as_str())
                    .collect();
                deps.extend(resource.depends_on.iter().map(String::as_str));
                deps.remove(id.as_str());
                (id.as_str(), deps)
            })
            .collect()
    }

    /// A creation order that respects every dependency.
    ///
    /// Kahn's algorithm, taking ready resources in id order so the result is
    /// stable. Fails with [`DescriptorError::DependencyCycle`] if some
    /// resources can never become ready.
    pub fn creation_order(&self) -> Result<Vec<String>> {
        let deps = self.dependencies();
        let mut remaining: BTreeMap<&str, usize> = deps
            .iter()
            .map(|(id, d)| (*id, d.iter().filter(|t| deps.contains_key(*t)).count()))
            .collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (id, d) in &deps {
            for target in d {
                dependents.entry(*target).or_default().push(*id);
            }
        }

        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(deps.len());

        while let Some(id) = ready.pop_first() {
            remaining.remove(id);
            order.push(id.to_string());
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if !remaining.is_empty() {
            return Err(DescriptorError::DependencyCycle(
                remaining.keys().map(|id| id.to_string()).collect(),
            ));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::intrinsics::{get_att, reference};
    use super::*;
    use serde_json::json;

    fn small_template() -> Template {
        let mut template = Template::new("test");
        template
            .resources
            .insert("Vpc".into(), Resource::new("AWS::EC2::VPC", json!({ "CidrBlock": "10.0.0.0/16" })));
        template.resources.insert(
            "Sg".into(),
            Resource::new("AWS::EC2::SecurityGroup", json!({ "VpcId": reference("Vpc") })),
        );
        template.resources.insert(
            "Box".into(),
            Resource::new(
                "AWS::EC2::Instance",
                json!({
                    "ImageId": reference("Image"),
                    "SecurityGroupIds": [get_att("Sg", "GroupId")],
                    "Region": reference("AWS::Region"),
                }),
            ),
        );
        template.parameters.insert(
            "Image".into(),
            Parameter {
                parameter_type: "String".into(),
                default: None,
                description: None,
            },
        );
        template.outputs.insert(
            "Ip".into(),
            Output {
                description: None,
                value: get_att("Box", "PublicIp"),
            },
        );
        template
    }

    #[test]
    fn test_valid_references() {
        assert!(small_template().validate_references().is_ok());
    }

    #[test]
    fn test_dangling_ref() {
        let mut template = small_template();
        template.resources.insert(
            "Orphan".into(),
            Resource::new("AWS::EC2::Subnet", json!({ "VpcId": reference("Nope") })),
        );
        assert_eq!(
            template.validate_references(),
            Err(DescriptorError::DanglingReference {
                from: "Orphan".into(),
                target: "Nope".into()
            })
        );
    }

    #[test]
    fn test_get_att_on_parameter_rejected() {
        let mut template = small_template();
        template.resources.insert(
            "Odd".into(),
            Resource::new("AWS::EC2::Subnet", json!({ "X": get_att("Image", "Value") })),
        );
        assert!(matches!(
            template.validate_references(),
            Err(DescriptorError::DanglingReference { .. })
        ));
    }

    #[test]
    fn test_dangling_depends_on_and_output() {
        let mut template = small_template();
        let sg = template.resources.remove("Sg").unwrap().depends_on(["Ghost"]);
        template.resources.insert("Sg".into(), sg);
        assert!(template.validate_references().is_err());

        let mut template = small_template();
        template.outputs.insert(
            "Broken".into(),
            Output {
                description: None,
                value: reference("Gone"),
            },
        );
        assert_eq!(
            template.validate_references(),
            Err(DescriptorError::DanglingReference {
                from: "Broken".into(),
                target: "Gone".into()
            })
        );
    }

    #[test]
    fn test_creation_order() {
        let order = small_template().creation_order().unwrap();
        assert_eq!(order, ["Vpc", "Sg", "Box"]);
    }

    #[test]
    fn test_cycle_detected() {
        let mut template = Template::new("cycle");
        template
            .resources
            .insert("A".into(), Resource::new("T", json!({})).depends_on(["B"]));
        template
            .resources
            .insert("B".into(), Resource::new("T", json!({ "X": reference("A") })));
        template.resources.insert("C".into(), Resource::new("T", json!({})));
        assert_eq!(
            template.creation_order(),
            Err(DescriptorError::DependencyCycle(vec!["A".into(), "B".into()]))
        );
    }

    #[test]
    fn test_serialized_shape() {
        let value = serde_json::to_value(small_template()).unwrap();
        assert_eq!(value["AWSTemplateFormatVersion"], "2010-09-09");
        assert_eq!(value["Resources"]["Sg"]["Type"], "AWS::EC2::SecurityGroup");
        assert_eq!(value["Resources"]["Sg"]["Properties"]["VpcId"], json!({ "Ref": "Vpc" }));
        assert!(value["Resources"]["Sg"].get("DependsOn").is_none());
        assert_eq!(value["Parameters"]["Image"], json!({ "Type": "String" }));
        assert_eq!(
            value["Outputs"]["Ip"],
            json!({ "Value": { "Fn::GetAtt": ["Box", "PublicIp"] } })
        );
    }

    #[test]
    fn test_duplicate_logical_ids_rejected() {
        let mut template = small_template();
        let vpc = template.resources["Vpc"].clone();
        assert_eq!(
            template.add_resource("Vpc", Resource::new("AWS::EC2::Subnet", json!({}))),
            Err(DescriptorError::DuplicateLogicalId("Vpc".into()))
        );
        assert_eq!(template.resources["Vpc"], vpc);

        let parameter = Parameter {
            parameter_type: "String".into(),
            default: None,
            description: None,
        };
        assert_eq!(
            template.add_parameter("Sg", parameter.clone()),
            Err(DescriptorError::DuplicateLogicalId("Sg".into()))
        );
        assert_eq!(
            template.add_resource("Image", Resource::new("T", json!({}))),
            Err(DescriptorError::DuplicateLogicalId("Image".into()))
        );
        assert!(template.add_parameter("Other", parameter).is_ok());

        let output = Output {
            description: None,
            value: reference("Vpc"),
        };
        assert_eq!(
            template.add_output("Ip", output.clone()),
            Err(DescriptorError::DuplicateLogicalId("Ip".into()))
        );
        assert!(template.add_output("VpcId", output).is_ok());
    }
}
