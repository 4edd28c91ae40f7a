//! Schema-derived helpers for tooling and UIs.

use serde_json::Value;

use super::{PropertyType, VariableSchema, Variables};

/// Build an example variable map from a schema.
///
/// Per property, the first available of: `example`, `default`, the first
/// `enum` value, or a placeholder derived from the declared type (string when
/// no type is declared).
pub fn generate_example_variables(schema: &VariableSchema) -> Variables {
    let mut examples = Variables::new();
    for (name, property) in schema.properties() {
        let value = if let Some(example) = property.example {
            example
        } else if let Some(default) = property.default {
            default
        } else if let Some(first) = property.enum_values.first() {
            first.clone()
        } else {
            match property.ty.unwrap_or(PropertyType::String) {
                PropertyType::String => Value::String(format!("example_{}", name)),
                PropertyType::Number | PropertyType::Integer => Value::from(0),
                PropertyType::Boolean => Value::Bool(false),
                PropertyType::Array => Value::Array(Vec::new()),
                PropertyType::Object => Value::Object(serde_json::Map::new()),
            }
        };
        examples.insert(name, value);
    }
    examples
}

pub fn required_variables(schema: &VariableSchema) -> Vec<String> {
    schema.required()
}

/// Description declared for `name`, or an empty string.
pub fn variable_description(schema: &VariableSchema, name: &str) -> String {
    schema
        .property(name)
        .and_then(|p| p.description)
        .unwrap_or_default()
}
