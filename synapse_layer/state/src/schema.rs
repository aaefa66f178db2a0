// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

//! Field-typed schemas for replicated objects.
//!
//! A schema maps field names to typed specs with optional constraints and
//! defaults. Validation returns the input with defaults filled in; it is
//! idempotent, so re-validating an already-validated object is a no-op.
//! Unknown fields pass through untouched (replicated objects carry more
//! fields than their creation payloads).
//!
//! New schemas arrive at runtime through the ratified `update_schema`
//! command; the schema map itself is part of replicated state.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use synapse_common_types::optional::IsNotFoundError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "string")]
    String,
    #[serde(rename = "integer")]
    Integer,
    #[serde(rename = "list<string>")]
    ListString,
    #[serde(rename = "object")]
    Object,
    #[serde(rename = "enum")]
    Enum,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Accepted variants for `enum` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

impl FieldSpec {
    fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            default: None,
            min: None,
            max: None,
            min_length: None,
            max_length: None,
            values: None,
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    fn with_min(mut self, min: i64) -> Self {
        self.min = Some(min);
        self
    }

    fn with_lengths(mut self, min: usize, max: usize) -> Self {
        self.min_length = Some(min);
        self.max_length = Some(max);
        self
    }

    fn with_values(mut self, values: &[&str]) -> Self {
        self.values = Some(values.iter().map(|s| s.to_string()).collect());
        self
    }
}

/// A schema is a mapping of field name to spec; it serializes as that
/// mapping directly.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaDefinition {
    pub fields: BTreeMap<String, FieldSpec>,
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Unknown schema: {name}")]
    UnknownSchema { name: String },
    #[error("Expected a JSON object")]
    NotAnObject,
    #[error("Missing required field: {field}")]
    MissingField { field: String },
    #[error("Field {field} has the wrong type, expected {expected}")]
    WrongType { field: String, expected: &'static str },
    #[error("Field {field} is out of range: {reason}")]
    OutOfRange { field: String, reason: String },
}

impl IsNotFoundError for SchemaError {
    fn is_not_found_error(&self) -> bool {
        matches!(self, SchemaError::UnknownSchema { .. })
    }
}

impl SchemaDefinition {
    /// Validates `data` and returns it with defaults filled in. Fields not
    /// named by the schema pass through untouched.
    pub fn validate(&self, data: &Value) -> Result<Value, SchemaError> {
        let obj = data.as_object().ok_or(SchemaError::NotAnObject)?;
        let mut out = obj.clone();

        for (name, spec) in &self.fields {
            match out.get(name) {
                None | Some(Value::Null) => {
                    if let Some(default) = &spec.default {
                        out.insert(name.clone(), default.clone());
                    } else if spec.required {
                        return Err(SchemaError::MissingField { field: name.clone() });
                    }
                },
                Some(value) => {
                    check_field(name, spec, value)?;
                },
            }
        }
        Ok(Value::Object(out))
    }
}

fn check_field(name: &str, spec: &FieldSpec, value: &Value) -> Result<(), SchemaError> {
    match spec.field_type {
        FieldType::String => {
            let s = value.as_str().ok_or(SchemaError::WrongType {
                field: name.to_string(),
                expected: "string",
            })?;
            check_length(name, s.chars().count(), spec)
        },
        FieldType::Integer => {
            let n = value.as_i64().ok_or(SchemaError::WrongType {
                field: name.to_string(),
                expected: "integer",
            })?;
            if let Some(min) = spec.min {
                if n < min {
                    return Err(out_of_range(name, format!("{} is below the minimum {}", n, min)));
                }
            }
            if let Some(max) = spec.max {
                if n > max {
                    return Err(out_of_range(name, format!("{} is above the maximum {}", n, max)));
                }
            }
            Ok(())
        },
        FieldType::ListString => {
            let items = value.as_array().ok_or(SchemaError::WrongType {
                field: name.to_string(),
                expected: "list<string>",
            })?;
            if items.iter().any(|v| !v.is_string()) {
                return Err(SchemaError::WrongType {
                    field: name.to_string(),
                    expected: "list<string>",
                });
            }
            check_length(name, items.len(), spec)
        },
        FieldType::Object => {
            if !value.is_object() {
                return Err(SchemaError::WrongType {
                    field: name.to_string(),
                    expected: "object",
                });
            }
            Ok(())
        },
        FieldType::Enum => {
            let s = value.as_str().ok_or(SchemaError::WrongType {
                field: name.to_string(),
                expected: "enum",
            })?;
            let values = spec.values.as_deref().unwrap_or(&[]);
            if !values.iter().any(|v| v == s) {
                return Err(out_of_range(
                    name,
                    format!("\"{}\" is not one of {:?}", s, values),
                ));
            }
            Ok(())
        },
    }
}

fn check_length(name: &str, len: usize, spec: &FieldSpec) -> Result<(), SchemaError> {
    if let Some(min) = spec.min_length {
        if len < min {
            return Err(out_of_range(name, format!("length {} is below the minimum {}", len, min)));
        }
    }
    if let Some(max) = spec.max_length {
        if len > max {
            return Err(out_of_range(name, format!("length {} is above the maximum {}", len, max)));
        }
    }
    Ok(())
}

fn out_of_range(name: &str, reason: String) -> SchemaError {
    SchemaError::OutOfRange {
        field: name.to_string(),
        reason,
    }
}

/// Validates `data` against a named schema from the replicated schema map.
pub fn validate(
    schemas: &BTreeMap<String, SchemaDefinition>,
    schema_name: &str,
    data: &Value,
) -> Result<Value, SchemaError> {
    let schema = schemas.get(schema_name).ok_or_else(|| SchemaError::UnknownSchema {
        name: schema_name.to_string(),
    })?;
    schema.validate(data)
}

lazy_static! {
    static ref BUILTINS: BTreeMap<String, SchemaDefinition> = {
        let mut schemas = BTreeMap::new();

        let mut task_v1 = BTreeMap::new();
        task_v1.insert(
            "title".to_string(),
            FieldSpec::new(FieldType::String).required().with_lengths(1, 256),
        );
        task_v1.insert(
            "description".to_string(),
            FieldSpec::new(FieldType::String).with_default(json!("")),
        );
        task_v1.insert(
            "tags".to_string(),
            FieldSpec::new(FieldType::ListString).with_default(json!([])),
        );
        task_v1.insert(
            "reward".to_string(),
            FieldSpec::new(FieldType::Integer).required().with_min(0),
        );
        schemas.insert("task_v1".to_string(), SchemaDefinition { fields: task_v1.clone() });

        // task_v2 extends task_v1 with the tools a task needs at execution
        let mut task_v2 = task_v1;
        task_v2.insert(
            "required_tools".to_string(),
            FieldSpec::new(FieldType::ListString).with_default(json!([])),
        );
        schemas.insert("task_v2".to_string(), SchemaDefinition { fields: task_v2 });

        let mut proposal_v1 = BTreeMap::new();
        proposal_v1.insert(
            "title".to_string(),
            FieldSpec::new(FieldType::String).required().with_lengths(1, 256),
        );
        proposal_v1.insert(
            "description".to_string(),
            FieldSpec::new(FieldType::String).with_default(json!("")),
        );
        proposal_v1.insert(
            "proposal_type".to_string(),
            FieldSpec::new(FieldType::Enum)
                .with_default(json!("generic"))
                .with_values(&["generic", "config_change", "network_operation", "code_upgrade", "command"]),
        );
        proposal_v1.insert(
            "tags".to_string(),
            FieldSpec::new(FieldType::ListString).with_default(json!([])),
        );
        proposal_v1.insert(
            "params".to_string(),
            FieldSpec::new(FieldType::Object).with_default(json!({})),
        );
        schemas.insert("proposal_v1".to_string(), SchemaDefinition { fields: proposal_v1 });

        schemas
    };
}

pub fn builtin_schemas() -> BTreeMap<String, SchemaDefinition> {
    BUILTINS.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_defaults_and_keeps_unknown_fields() {
        let schemas = builtin_schemas();
        let data = json!({"title": "Fix the bug", "reward": 100, "extra": true});
        let validated = validate(&schemas, "task_v1", &data).unwrap();
        assert_eq!(validated["description"], "");
        assert_eq!(validated["tags"], json!([]));
        assert_eq!(validated["extra"], true);
    }

    #[test]
    fn missing_required_field() {
        let schemas = builtin_schemas();
        let err = validate(&schemas, "task_v1", &json!({"reward": 10})).unwrap_err();
        assert!(matches!(err, SchemaError::MissingField { field } if field == "title"));
    }

    #[test]
    fn wrong_type_and_range() {
        let schemas = builtin_schemas();
        let err = validate(&schemas, "task_v1", &json!({"title": "x", "reward": "lots"})).unwrap_err();
        assert!(matches!(err, SchemaError::WrongType { .. }));

        let err = validate(&schemas, "task_v1", &json!({"title": "x", "reward": -1})).unwrap_err();
        assert!(matches!(err, SchemaError::OutOfRange { .. }));
    }

    #[test]
    fn enum_values_are_enforced() {
        let schemas = builtin_schemas();
        let data = json!({"title": "x", "proposal_type": "coup"});
        let err = validate(&schemas, "proposal_v1", &data).unwrap_err();
        assert!(matches!(err, SchemaError::OutOfRange { .. }));
    }

    #[test]
    fn task_v2_adds_required_tools() {
        let schemas = builtin_schemas();
        let validated = validate(&schemas, "task_v2", &json!({"title": "x", "reward": 0})).unwrap();
        assert_eq!(validated["required_tools"], json!([]));
        assert!(validate(&schemas, "task_v1", &json!({"title": "x", "reward": 0}))
            .unwrap()
            .get("required_tools")
            .is_none());
    }

    #[test]
    fn unknown_schema() {
        let schemas = builtin_schemas();
        let err = validate(&schemas, "task_v9", &json!({})).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownSchema { .. }));
    }

    // validate(s, validate(s, x)) == validate(s, x)
    #[test]
    fn validation_is_idempotent() {
        let schemas = builtin_schemas();
        let data = json!({"title": "Fix the bug", "reward": 100});
        let once = validate(&schemas, "task_v2", &data).unwrap();
        let twice = validate(&schemas, "task_v2", &once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn schema_definition_round_trips_through_json() {
        let schemas = builtin_schemas();
        let json = serde_json::to_value(&schemas["task_v2"]).unwrap();
        assert_eq!(json["title"]["type"], "string");
        assert_eq!(json["required_tools"]["type"], "list<string>");
        let back: SchemaDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back, schemas["task_v2"]);
    }
}
