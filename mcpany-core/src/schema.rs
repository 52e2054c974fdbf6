//! Pre-execution input validation against the tool's declared JSON schema.

use serde_json::Value;

use crate::error::{Error, Result};

/// Validate parsed arguments against a JSON schema. Schema compilation
/// errors and instance violations both surface as `schema_violation`, since
/// either way the inputs cannot be trusted to match the declaration.
pub fn validate_inputs(schema: &Value, inputs: &Value) -> Result<()> {
    let validator = jsonschema::validator_for(schema).map_err(|err| Error::SchemaViolation {
        reason: format!("tool input schema is invalid: {err}"),
    })?;
    if let Err(err) = validator.validate(inputs) {
        return Err(Error::SchemaViolation {
            reason: err.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": { "type": "string" },
                "days": { "type": "integer", "minimum": 1 }
            },
            "required": ["city"]
        })
    }

    #[test]
    fn valid_inputs_pass() {
        validate_inputs(&schema(), &json!({"city": "Lisbon", "days": 3})).unwrap();
    }

    #[test]
    fn missing_required_field_fails() {
        let err = validate_inputs(&schema(), &json!({"days": 3})).unwrap_err();
        assert_eq!(err.kind().as_str(), "schema_violation");
    }

    #[test]
    fn type_mismatch_fails() {
        let err = validate_inputs(&schema(), &json!({"city": 42})).unwrap_err();
        assert_eq!(err.kind().as_str(), "schema_violation");
    }
}
