//! CloudFormation intrinsic function helpers

use serde_json::{Value, json};

/// Prefix shared by every pseudo parameter (`AWS::Region`, `AWS::StackName`, ...)
pub const PSEUDO_PARAMETER_PREFIX: &str = "AWS::";

pub fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// The `index`-th availability zone of the deploy region
pub fn select_az(index: u32) -> Value {
    json!({ "Fn::Select": [index, { "Fn::GetAZs": "" }] })
}

pub fn base64(value: Value) -> Value {
    json!({ "Fn::Base64": value })
}

/// `Fn::Join` with an empty delimiter
pub fn join(parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": ["", parts] })
}

pub fn tag(key: &str, value: impl Into<String>) -> Value {
    json!({ "Key": key, "Value": value.into() })
}

/// Concatenate `parts` into a CloudFormation logical id.
///
/// Non-alphanumeric characters are dropped and every part after the first
/// starts upper-case, so `["eksVpc", "public", "subnet1"]` becomes
/// `eksVpcPublicSubnet1`.
pub fn logical_id(parts: &[&str]) -> String {
    let mut id = String::new();
    for (i, part) in parts.iter().enumerate() {
        let mut chars = part.chars().filter(char::is_ascii_alphanumeric);
        if i > 0 {
            if let Some(first) = chars.next() {
                id.push(first.to_ascii_uppercase());
            }
        }
        id.extend(chars);
    }
    id
}

/// A pointer from one template value to a logical id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reference {
    /// `Ref` to a resource, parameter or pseudo parameter
    Ref(String),
    /// `Fn::GetAtt` on a resource
    GetAtt(String),
}

impl Reference {
    pub fn target(&self) -> &str {
        match self {
            Reference::Ref(target) | Reference::GetAtt(target) => target,
        }
    }

    pub fn is_pseudo_parameter(&self) -> bool {
        matches!(self, Reference::Ref(target) if target.starts_with(PSEUDO_PARAMETER_PREFIX))
    }
}

/// Collect every `Ref` and `Fn::GetAtt` nested anywhere in `value`
pub fn collect_references(value: &Value, out: &mut Vec<Reference>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(target)) = map.get("Ref") {
                    out.push(Reference::Ref(target.clone()));
                    return;
                }
                match map.get("Fn::GetAtt") {
                    Some(Value::Array(args)) => {
                        if let Some(Value::String(target)) = args.first() {
                            out.push(Reference::GetAtt(target.clone()));
                        }
                        return;
                    }
                    Some(Value::String(dotted)) => {
                        let target = dotted.split_once('.').map_or(dotted.as_str(), |(id, _)| id);
                        out.push(Reference::GetAtt(target.to_string()));
                        return;
                    }
                    _ => {}
                }
            }
            for nested in map.values() {
                collect_references(nested, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, out);
            }
        }
        _ => {}
    }
}
