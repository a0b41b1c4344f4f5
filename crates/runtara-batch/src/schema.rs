// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Structured-output schemas attached to shard records.
//!
//! A schema description needs a name and an object schema with fields.
//! Types deriving `schemars::JsonSchema` provide both at compile time;
//! hand-written descriptions go through [`StructuredOutput::new`].

use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use serde_json::Value;

use crate::error::{BatchError, Result};
use crate::types::{JsonSchemaFormat, ResponseFormat};

/// A `json_schema` response format requirement.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredOutput {
    name: String,
    schema: Value,
    strict: bool,
}

impl StructuredOutput {
    /// Describe the response shape from a type deriving `JsonSchema`.
    ///
    /// Nested types are inlined rather than referenced.
    pub fn of<T: JsonSchema>() -> Result<Self> {
        let root = SchemaSettings::draft07()
            .with(|settings| settings.inline_subschemas = true)
            .into_generator()
            .into_root_schema_for::<T>();
        let schema = serde_json::to_value(&root)?;
        Self::new(T::schema_name(), schema)
    }

    /// Use an explicit schema description. The schema must describe an object.
    pub fn new(name: impl Into<String>, schema: Value) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(BatchError::Serialization(
                "structured output name must not be empty".to_string(),
            ));
        }
        if schema.get("type").and_then(Value::as_str) != Some("object") {
            return Err(BatchError::Serialization(format!(
                "structured output {name} must describe an object"
            )));
        }
        Ok(Self {
            name,
            schema,
            strict: true,
        })
    }

    /// Toggle strict mode (on by default).
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// The schema as it will be sent.
    pub fn schema(&self) -> Value {
        let mut schema = self.schema.clone();
        if let Value::Object(root) = &mut schema {
            root.remove("$schema");
        }
        if self.strict {
            close_objects(&mut schema);
        }
        schema
    }

    pub fn into_response_format(self) -> ResponseFormat {
        let schema = self.schema();
        ResponseFormat::json_schema(JsonSchemaFormat {
            name: self.name,
            strict: self.strict,
            schema,
        })
    }
}

/// Keys whose value is a map from names to schemas.
const SCHEMA_MAPS: [&str; 3] = ["properties", "definitions", "$defs"];
/// Keys whose value is a schema or a list of schemas.
const SCHEMA_SLOTS: [&str; 6] = ["items", "additionalItems", "not", "anyOf", "oneOf", "allOf"];

/// Strict mode: every object is closed and requires all its properties.
fn close_objects(schema: &mut Value) {
    let Value::Object(map) = schema else {
        return;
    };

    if let Some(Value::Object(properties)) = map.get("properties") {
        let required = properties.keys().cloned().map(Value::String).collect();
        map.insert("required".to_string(), Value::Array(required));
        map.insert("additionalProperties".to_string(), Value::Bool(false));
    }

    for key in SCHEMA_MAPS {
        if let Some(Value::Object(children)) = map.get_mut(key) {
            children.values_mut().for_each(close_objects);
        }
    }
    for key in SCHEMA_SLOTS {
        match map.get_mut(key) {
            Some(Value::Array(children)) => children.iter_mut().for_each(close_objects),
            Some(child @ Value::Object(_)) => close_objects(child),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct Verdict {
        label: String,
        confidence: f64,
        reason: Option<String>,
        tags: Vec<Tag>,
    }

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct Tag {
        name: String,
    }

    #[test]
    fn test_derived_schema_uses_type_name() {
        let output = StructuredOutput::of::<Verdict>().unwrap();
        assert_eq!(output.name(), "Verdict");
        assert!(output.is_strict());
    }

    #[test]
    fn test_strict_schema_closes_all_objects() {
        let schema = StructuredOutput::of::<Verdict>().unwrap().schema();

        assert!(schema.get("$schema").is_none());
        assert_eq!(schema["additionalProperties"], json!(false));
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(required.len(), 4);
        assert!(required.contains(&"reason"));

        assert!(schema.get("definitions").is_none());
        let tag = &schema["properties"]["tags"]["items"];
        assert_eq!(tag["additionalProperties"], json!(false));
        assert_eq!(tag["required"], json!(["name"]));
    }

    #[test]
    fn test_non_strict_schema_is_untouched() {
        let raw = json!({
            "type": "object",
            "properties": {"answer": {"type": "string"}}
        });
        let output = StructuredOutput::new("Answer", raw.clone())
            .unwrap()
            .with_strict(false);
        assert_eq!(output.schema(), raw);
    }

    #[test]
    fn test_response_format_shape() {
        let output = StructuredOutput::new(
            "Answer",
            json!({"type": "object", "properties": {"answer": {"type": "string"}}}),
        )
        .unwrap();

        let format = serde_json::to_value(output.into_response_format()).unwrap();
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["name"], "Answer");
        assert_eq!(format["json_schema"]["strict"], true);
        assert_eq!(
            format["json_schema"]["schema"]["required"],
            json!(["answer"])
        );
    }

    #[test]
    fn test_rejects_non_object_schema() {
        let result = StructuredOutput::new("Bare", json!({"type": "string"}));
        assert!(matches!(result, Err(BatchError::Serialization(_))));
    }

    #[test]
    fn test_rejects_empty_name() {
        let result = StructuredOutput::new("  ", json!({"type": "object"}));
        assert!(matches!(result, Err(BatchError::Serialization(_))));
    }
}
