//! Variable validation and default enrichment.

use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;
use tracing::{debug, warn};

use super::{SchemaViolation, VariableSchema, Variables};
use crate::error::{Error, ErrorContext};
use crate::Result;

/// Validate `variables` against `schema`, then inject declared defaults.
///
/// - An empty schema returns the variables unchanged.
/// - Every violation is reported, not just the first one.
/// - Enrichment only fills top-level properties that are absent; a value the
///   caller supplied is never replaced.
pub fn validate_and_enrich(variables: &Variables, schema: &VariableSchema) -> Result<Variables> {
    if schema.is_empty() {
        return Ok(variables.clone());
    }

    for finding in schema.lint() {
        warn!(finding = %finding, "variable schema lint");
    }

    let document = schema.effective_document();
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&document)
        .map_err(|e| {
            Error::configuration_with_context(
                format!("Invalid variable schema: {}", e),
                ErrorContext::new().with_source("schema_validator"),
            )
        })?;

    let instance = Value::Object(variables.clone());
    if let Err(errors) = compiled.validate(&instance) {
        let violations: Vec<SchemaViolation> = errors.map(to_violation).collect();
        return Err(Error::Validation { violations });
    }

    Ok(enrich(variables, schema))
}

fn to_violation(error: jsonschema::ValidationError<'_>) -> SchemaViolation {
    let mut segments = error.instance_path.clone().into_vec();
    // `required` failures are reported at the parent object; name the missing
    // property itself so callers know which variable to supply.
    if let ValidationErrorKind::Required { property } = &error.kind {
        if let Some(name) = property.as_str() {
            segments.push(name.to_string());
        }
    }
    let path = if segments.is_empty() {
        "root".to_string()
    } else {
        segments.join(".")
    };
    SchemaViolation::new(path, error.to_string())
}

fn enrich(variables: &Variables, schema: &VariableSchema) -> Variables {
    let mut enriched = variables.clone();
    for (name, property) in schema.properties() {
        if enriched.contains_key(&name) {
            continue;
        }
        if let Some(default) = property.default {
            debug!(variable = %name, default = %default, "injected schema default");
            enriched.insert(name, default);
        }
    }
    enriched
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(v: Value) -> Variables {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_empty_schema_passes_anything_through() {
        let input = vars(json!({"anything": [1, 2, 3]}));
        let out = validate_and_enrich(&input, &VariableSchema::empty()).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_default_injected_when_absent() {
        let schema = VariableSchema::new(json!({
            "properties": {"tone": {"type": "string", "default": "formal"}},
            "required": []
        }));
        let out = validate_and_enrich(&Variables::new(), &schema).unwrap();
        assert_eq!(out, vars(json!({"tone": "formal"})));
    }

    #[test]
    fn test_caller_value_never_overwritten() {
        let schema = VariableSchema::new(json!({
            "properties": {"tone": {"type": "string", "default": "formal"}}
        }));
        let out = validate_and_enrich(&vars(json!({"tone": "casual"})), &schema).unwrap();
        assert_eq!(out["tone"], "casual");
    }

    #[test]
    fn test_missing_required_names_the_property() {
        let schema = VariableSchema::new(json!({
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        }));
        let err = validate_and_enrich(&Variables::new(), &schema).unwrap_err();
        let violations = err.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "name");
        assert!(violations[0].message.contains("name"));
    }

    #[test]
    fn test_required_with_default_is_satisfied_by_default() {
        let schema = VariableSchema::new(json!({
            "properties": {"tone": {"type": "string", "default": "formal"}},
            "required": ["tone"]
        }));
        let out = validate_and_enrich(&Variables::new(), &schema).unwrap();
        assert_eq!(out["tone"], "formal");
    }

    #[test]
    fn test_all_violations_are_aggregated() {
        let schema = VariableSchema::new(json!({
            "type": "object",
            "properties": {
                "count": {"type": "integer"},
                "tone": {"type": "string", "enum": ["formal", "casual"]}
            },
            "required": ["topic"]
        }));
        let input = vars(json!({"count": "three", "tone": "angry"}));
        let err = validate_and_enrich(&input, &schema).unwrap_err();
        let mut paths: Vec<&str> = err.violations().iter().map(|v| v.path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["count", "tone", "topic"]);
    }

    #[test]
    fn test_nested_paths_are_dotted() {
        let schema = VariableSchema::new(json!({
            "properties": {
                "author": {
                    "type": "object",
                    "properties": {"age": {"type": "integer"}},
                    "required": ["name"]
                }
            }
        }));
        let input = vars(json!({"author": {"age": "old"}}));
        let err = validate_and_enrich(&input, &schema).unwrap_err();
        let mut paths: Vec<&str> = err.violations().iter().map(|v| v.path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["author.age", "author.name"]);
    }

    #[test]
    fn test_document_level_violation_uses_root() {
        let schema = VariableSchema::new(json!({
            "properties": {"a": {"type": "string"}},
            "additionalProperties": false
        }));
        let err = validate_and_enrich(&vars(json!({"b": 1})), &schema).unwrap_err();
        assert_eq!(err.violations()[0].path, "root");
    }

    #[test]
    fn test_invalid_schema_is_configuration_error() {
        let schema = VariableSchema::new(json!({"type": 12}));
        let err = validate_and_enrich(&Variables::new(), &schema).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
