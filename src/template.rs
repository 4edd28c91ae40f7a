//! Prompt templates and named-placeholder rendering.
//!
//! Placeholders are `{name}` where `name` is an identifier. `{{` and `}}`
//! render as literal braces; any other brace is copied through unchanged.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::schema::{VariableSchema, Variables};
use crate::{PromptId, Result};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static placeholder pattern")
});

/// A parameterized expert prompt.
///
/// Templates are immutable once published to a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: PromptId,
    /// Taxonomy link maintained by the surrounding CRUD layer.
    #[serde(default)]
    pub sub_specialty_id: Option<u64>,
    pub title: String,
    pub template: String,
    #[serde(default)]
    pub variables_schema: VariableSchema,
    #[serde(default)]
    pub expected_output: Option<String>,
    #[serde(default)]
    pub example_context: Option<String>,
}

impl PromptTemplate {
    pub fn new(id: PromptId, title: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            id,
            sub_specialty_id: None,
            title: title.into(),
            template: template.into(),
            variables_schema: VariableSchema::empty(),
            expected_output: None,
            example_context: None,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<VariableSchema>) -> Self {
        self.variables_schema = schema.into();
        self
    }

    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }

    /// Distinct placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for caps in PLACEHOLDER.captures_iter(&self.template) {
            if let Some(name) = caps.get(1) {
                if !names.iter().any(|n| n == name.as_str()) {
                    names.push(name.as_str().to_string());
                }
            }
        }
        names
    }

    /// Substitute every placeholder from `variables`.
    ///
    /// String values are inserted verbatim; other values as compact JSON.
    /// The first placeholder without a value fails with
    /// [`Error::MissingVariable`].
    pub fn render(&self, variables: &Variables) -> Result<String> {
        let mut out = String::with_capacity(self.template.len());
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(&self.template) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&self.template[last..whole.start()]);
            match caps.get(1) {
                Some(name) => {
                    let value = variables.get(name.as_str()).ok_or_else(|| {
                        Error::MissingVariable {
                            name: name.as_str().to_string(),
                        }
                    })?;
                    match value {
                        Value::String(s) => out.push_str(s),
                        other => out.push_str(&other.to_string()),
                    }
                }
                None if whole.as_str() == "{{" => out.push('{'),
                None => out.push('}'),
            }
            last = whole.end();
        }
        out.push_str(&self.template[last..]);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(v: Value) -> Variables {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_render_substitutes_named_placeholders() {
        let t = PromptTemplate::new(1, "greet", "Hello {name}, you are {age} years old.");
        let out = t.render(&vars(json!({"name": "Ada", "age": 36}))).unwrap();
        assert_eq!(out, "Hello Ada, you are 36 years old.");
    }

    #[test]
    fn test_missing_variable_is_reported() {
        let t = PromptTemplate::new(1, "greet", "Hello {name}");
        let err = t.render(&Variables::new()).unwrap_err();
        match err {
            Error::MissingVariable { name } => assert_eq!(name, "name"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_escaped_and_stray_braces() {
        let t = PromptTemplate::new(1, "json", "Return {{\"topic\": \"{topic}\"}} and { this }");
        let out = t.render(&vars(json!({"topic": "rust"}))).unwrap();
        assert_eq!(out, "Return {\"topic\": \"rust\"} and { this }");
    }

    #[test]
    fn test_non_string_values_render_as_json() {
        let t = PromptTemplate::new(1, "list", "Items: {items}; flag={flag}");
        let out = t
            .render(&vars(json!({"items": ["a", "b"], "flag": false})))
            .unwrap();
        assert_eq!(out, "Items: [\"a\",\"b\"]; flag=false");
    }

    #[test]
    fn test_placeholders_are_distinct_and_ordered() {
        let t = PromptTemplate::new(1, "t", "{b} {a} {b} {{c}}");
        assert_eq!(t.placeholders(), vec!["b", "a"]);
    }

    #[test]
    fn test_template_deserializes_with_defaults() {
        let t: PromptTemplate = serde_json::from_value(json!({
            "id": 4,
            "title": "Summary",
            "template": "Summarize {text}"
        }))
        .unwrap();
        assert!(t.variables_schema.is_empty());
        assert!(t.expected_output.is_none());
    }
}
