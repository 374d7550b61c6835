//! Tool input schema conversion
//!
//! Servers describe tool inputs with JSON Schema. [`ParameterSchema`] is the
//! typed subset callers use to build function-calling definitions.
//!
//! Some servers emit draft-6 style numeric `exclusiveMinimum` /
//! `exclusiveMaximum` where the boolean form is expected. Those are stripped
//! before conversion; anything else that fails to convert is a schema error.

use std::collections::BTreeMap;

use rmcp::model::JsonObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaType {
    Single(String),
    Multiple(Vec<String>),
}

impl SchemaType {
    pub fn includes(&self, name: &str) -> bool {
        match self {
            SchemaType::Single(t) => t == name,
            SchemaType::Multiple(types) => types.iter().any(|t| t == name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AdditionalProperties {
    Allowed(bool),
    Schema(Box<ParameterSchema>),
}

/// Caller-facing parameter schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, ParameterSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterSchema>>,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<Value>,
    #[serde(rename = "const", default, skip_serializing_if = "Option::is_none")]
    pub const_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_minimum: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_maximum: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<AdditionalProperties>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<ParameterSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<ParameterSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all_of: Vec<ParameterSchema>,
    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(
        rename = "$defs",
        alias = "definitions",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub defs: BTreeMap<String, ParameterSchema>,
}

impl ParameterSchema {
    /// An object schema with no properties.
    pub fn empty_object() -> Self {
        Self {
            schema_type: Some(SchemaType::Single("object".to_string())),
            ..Default::default()
        }
    }

    /// Convert a server's wire-format input schema.
    pub fn from_input_schema(schema: &JsonObject) -> Result<Self, serde_json::Error> {
        let mut value = Value::Object(schema.clone());
        strip_malformed_exclusive_bounds(&mut value);
        serde_json::from_value(value)
    }

    pub fn is_required(&self, property: &str) -> bool {
        self.required.iter().any(|r| r == property)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
    }
}

/// Keywords whose value is a single subschema.
const SUBSCHEMA_KEYWORDS: &[&str] = &["items", "additionalProperties", "not", "contains"];
/// Keywords whose value is an array of subschemas.
const SUBSCHEMA_LIST_KEYWORDS: &[&str] = &["anyOf", "oneOf", "allOf", "prefixItems", "items"];
/// Keywords whose value maps names to subschemas.
const SUBSCHEMA_MAP_KEYWORDS: &[&str] = &["properties", "patternProperties", "$defs", "definitions"];

/// Remove non-boolean `exclusiveMinimum` / `exclusiveMaximum` from a schema
/// and its subschemas. Property names and literal values (`default`, `enum`,
/// `const`, examples) are left alone.
pub fn strip_malformed_exclusive_bounds(schema: &mut Value) {
    let Value::Object(map) = schema else {
        return;
    };

    for key in ["exclusiveMinimum", "exclusiveMaximum"] {
        if map.get(key).is_some_and(|v| !v.is_boolean()) {
            map.remove(key);
        }
    }

    for keyword in SUBSCHEMA_KEYWORDS {
        if let Some(child) = map.get_mut(*keyword) {
            strip_malformed_exclusive_bounds(child);
        }
    }
    for keyword in SUBSCHEMA_LIST_KEYWORDS {
        if let Some(Value::Array(children)) = map.get_mut(*keyword) {
            children.iter_mut().for_each(strip_malformed_exclusive_bounds);
        }
    }
    for keyword in SUBSCHEMA_MAP_KEYWORDS {
        if let Some(Value::Object(children)) = map.get_mut(*keyword) {
            children.values_mut().for_each(strip_malformed_exclusive_bounds);
        }
    }
}

/// Build the `<server>_<tool>` key, restricted to `[A-Za-z0-9_-]`.
pub fn tool_key(server: &str, tool: &str) -> String {
    format!("{server}_{tool}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
