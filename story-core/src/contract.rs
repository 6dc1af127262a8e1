//! Output contracts for model responses.
//!
//! A contract is the JSON shape a model response must have before the
//! workflow will trust it. Contract types derive [`OutputContract`], which
//! generates the schema from the struct; [`validate`] enforces the subset of
//! JSON Schema that derive emits (types, required fields, nested objects,
//! array bounds, non-empty strings).

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

pub use story_macros::OutputContract;

/// A structured shape the model must produce.
pub trait OutputContract {
    /// Name of the contract, used as the forced tool name.
    fn contract_name() -> &'static str;

    /// Human-readable description, taken from the type's doc comment.
    fn contract_description() -> &'static str;

    /// JSON schema of the expected output.
    fn output_schema() -> Value;

    /// Tool definition that makes the model emit this contract.
    fn as_tool() -> claude::Tool
    where
        Self: Sized,
    {
        claude::Tool {
            name: Self::contract_name().to_string(),
            description: Self::contract_description().to_string(),
            input_schema: Self::output_schema(),
        }
    }
}

/// Why a model response was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}: {reason}")]
pub struct ContractViolation {
    /// JSON path of the offending value, rooted at `$`.
    pub path: String,
    /// What was wrong with it.
    pub reason: String,
}

impl ContractViolation {
    fn new(path: &str, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Validate a value against a contract schema.
pub fn validate(value: &Value, schema: &Value) -> Result<(), ContractViolation> {
    validate_at("$", value, schema)
}

/// Validate a raw model response and decode it into the contract type.
pub fn parse<T>(value: Value) -> Result<T, ContractViolation>
where
    T: OutputContract + DeserializeOwned,
{
    validate(&value, &T::output_schema())?;
    serde_json::from_value(value).map_err(|e| ContractViolation::new("$", e.to_string()))
}

fn validate_at(path: &str, value: &Value, schema: &Value) -> Result<(), ContractViolation> {
    let Some(expected) = schema.get("type").and_then(Value::as_str) else {
        // Untyped schema accepts anything.
        return Ok(());
    };

    match expected {
        "object" => {
            let Some(object) = value.as_object() else {
                return Err(type_mismatch(path, expected, value));
            };
            if let Some(required) = schema.get("required").and_then(Value::as_array) {
                for field in required.iter().filter_map(Value::as_str) {
                    match object.get(field) {
                        None | Some(Value::Null) => {
                            return Err(ContractViolation::new(
                                path,
                                format!("missing required field '{field}'"),
                            ))
                        }
                        Some(_) => {}
                    }
                }
            }
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                for (name, property) in properties {
                    match object.get(name) {
                        None | Some(Value::Null) => {}
                        Some(child) => validate_at(&format!("{path}.{name}"), child, property)?,
                    }
                }
            }
            Ok(())
        }
        "array" => {
            let Some(items) = value.as_array() else {
                return Err(type_mismatch(path, expected, value));
            };
            if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
                if (items.len() as u64) < min {
                    return Err(ContractViolation::new(
                        path,
                        format!("expected at least {min} items, got {}", items.len()),
                    ));
                }
            }
            if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
                if items.len() as u64 > max {
                    return Err(ContractViolation::new(
                        path,
                        format!("expected at most {max} items, got {}", items.len()),
                    ));
                }
            }
            if let Some(item_schema) = schema.get("items") {
                for (index, item) in items.iter().enumerate() {
                    validate_at(&format!("{path}[{index}]"), item, item_schema)?;
                }
            }
            Ok(())
        }
        "string" => {
            let Some(text) = value.as_str() else {
                return Err(type_mismatch(path, expected, value));
            };
            if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
                if (text.trim().chars().count() as u64) < min {
                    return Err(ContractViolation::new(path, "string must not be empty"));
                }
            }
            Ok(())
        }
        "integer" if value.is_i64() || value.is_u64() => Ok(()),
        "number" if value.is_number() => Ok(()),
        "boolean" if value.is_boolean() => Ok(()),
        _ => Err(type_mismatch(path, expected, value)),
    }
}

fn type_mismatch(path: &str, expected: &str, value: &Value) -> ContractViolation {
    let found = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    ContractViolation::new(path, format!("expected {expected}, found {found}"))
}
