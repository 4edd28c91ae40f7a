//! 变量模式模块：用 JSON Schema 校验调用方变量并注入默认值。
//!
//! # Variable Schema Module
//!
//! A prompt template declares the variables it expects as a JSON-Schema-like
//! document. This module validates caller-supplied variable maps against that
//! document and fills declared defaults for omitted properties.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`VariableSchema`] | The schema document attached to a template |
//! | [`PropertyDescriptor`] | Typed view of one declared property |
//! | [`validate_and_enrich`] | Draft 7 validation followed by default injection |
//! | [`SchemaViolation`] | One aggregated (path, message) validation failure |
//! | [`generate_example_variables`] | Example variable map derived from a schema |
//!
//! ## Example
//!
//! ```rust
//! use prompt_engine::schema::{validate_and_enrich, VariableSchema};
//! use serde_json::json;
//!
//! let schema = VariableSchema::new(json!({
//!     "properties": {"tone": {"type": "string", "default": "formal"}},
//!     "required": []
//! }));
//! let enriched = validate_and_enrich(&serde_json::Map::new(), &schema).unwrap();
//! assert_eq!(enriched["tone"], "formal");
//! ```

mod examples;
mod validator;

pub use examples::{generate_example_variables, required_variables, variable_description};
pub use validator::validate_and_enrich;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Caller-supplied variables, keyed by placeholder name.
pub type Variables = serde_json::Map<String, Value>;

/// Primitive type of a declared property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl PropertyType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "array" => Some(Self::Array),
            "object" => Some(Self::Object),
            _ => None,
        }
    }
}

/// Typed view of one entry of `properties`.
///
/// Unknown keywords are ignored; a `type` outside the primitive set (or a
/// type union) yields `ty: None`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertyDescriptor {
    pub ty: Option<PropertyType>,
    pub default: Option<Value>,
    pub enum_values: Vec<Value>,
    pub example: Option<Value>,
    pub description: Option<String>,
}

impl PropertyDescriptor {
    pub fn from_value(value: &Value) -> Self {
        Self {
            ty: value
                .get("type")
                .and_then(|t| t.as_str())
                .and_then(PropertyType::parse),
            default: value.get("default").cloned(),
            enum_values: value
                .get("enum")
                .and_then(|e| e.as_array())
                .cloned()
                .unwrap_or_default(),
            example: value.get("example").cloned(),
            description: value
                .get("description")
                .and_then(|d| d.as_str())
                .map(String::from),
        }
    }
}

/// The variable schema attached to a prompt template.
///
/// An empty or absent schema disables validation entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableSchema(Value);

impl VariableSchema {
    pub fn new(document: Value) -> Self {
        Self(document)
    }

    pub fn empty() -> Self {
        Self(Value::Object(serde_json::Map::new()))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Declared top-level properties, in document order.
    pub fn properties(&self) -> Vec<(String, PropertyDescriptor)> {
        self.0
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|props| {
                props
                    .iter()
                    .map(|(name, v)| (name.clone(), PropertyDescriptor::from_value(v)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn property(&self, name: &str) -> Option<PropertyDescriptor> {
        self.0
            .get("properties")
            .and_then(|p| p.get(name))
            .map(PropertyDescriptor::from_value)
    }

    /// Names listed in the top-level `required` array.
    pub fn required(&self) -> Vec<String> {
        self.0
            .get("required")
            .and_then(|r| r.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Findings about contradictory declarations. Advisory only.
    pub fn lint(&self) -> Vec<String> {
        self.required()
            .into_iter()
            .filter(|name| {
                self.property(name)
                    .map(|p| p.default.is_some())
                    .unwrap_or(false)
            })
            .map(|name| {
                format!(
                    "property '{}' is both required and defaulted; the default satisfies the requirement",
                    name
                )
            })
            .collect()
    }

    /// The document actually compiled for validation: top-level `required`
    /// entries that carry a default are dropped, since enrichment supplies them.
    pub(crate) fn effective_document(&self) -> Value {
        let mut doc = self.0.clone();
        let defaulted: Vec<String> = self
            .properties()
            .into_iter()
            .filter(|(_, p)| p.default.is_some())
            .map(|(name, _)| name)
            .collect();
        if defaulted.is_empty() {
            return doc;
        }
        if let Some(required) = doc.get_mut("required").and_then(|r| r.as_array_mut()) {
            required.retain(|v| {
                v.as_str()
                    .map(|name| !defaulted.iter().any(|d| d == name))
                    .unwrap_or(true)
            });
        }
        doc
    }
}

impl Default for VariableSchema {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for VariableSchema {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

/// One validation failure.
///
/// `path` is the dotted property path, or `"root"` when the violation applies
/// to the whole variable map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl SchemaViolation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_schema_detection() {
        assert!(VariableSchema::empty().is_empty());
        assert!(VariableSchema::new(Value::Null).is_empty());
        assert!(!VariableSchema::new(json!({"type": "object"})).is_empty());
    }

    #[test]
    fn test_property_descriptor_parsing() {
        let schema = VariableSchema::new(json!({
            "properties": {
                "tone": {
                    "type": "string",
                    "enum": ["formal", "casual"],
                    "default": "formal",
                    "description": "Writing tone"
                },
                "mixed": {"type": ["string", "null"]}
            }
        }));
        let tone = schema.property("tone").unwrap();
        assert_eq!(tone.ty, Some(PropertyType::String));
        assert_eq!(tone.enum_values.len(), 2);
        assert_eq!(tone.default, Some(json!("formal")));
        assert_eq!(tone.description.as_deref(), Some("Writing tone"));
        assert_eq!(schema.property("mixed").unwrap().ty, None);
    }

    #[test]
    fn test_lint_flags_required_with_default() {
        let schema = VariableSchema::new(json!({
            "properties": {
                "tone": {"type": "string", "default": "formal"},
                "name": {"type": "string"}
            },
            "required": ["tone", "name"]
        }));
        let findings = schema.lint();
        assert_eq!(findings.len(), 1);
        assert!(findings[0].contains("'tone'"));
    }

    #[test]
    fn test_effective_document_drops_defaulted_requirements() {
        let schema = VariableSchema::new(json!({
            "properties": {
                "tone": {"type": "string", "default": "formal"},
                "name": {"type": "string"}
            },
            "required": ["tone", "name"]
        }));
        let doc = schema.effective_document();
        assert_eq!(doc["required"], json!(["name"]));
        // the original document is untouched
        assert_eq!(schema.required(), vec!["tone", "name"]);
    }
}
