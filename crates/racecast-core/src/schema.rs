//! JSON Schema validation for synthesis responses.
//!
//! The schema is deliberately loose about names and parties (the reconciler
//! fills those in) but strict about structure: a `candidates` array whose rows
//! carry an identity and a vote count.

use std::sync::OnceLock;
use thiserror::Error;

/// Embedded response schema (loaded at compile time).
const RESPONSE_SCHEMA_JSON: &str = include_str!("../schema/synthesis_response.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema validation.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = match serde_json::from_str(RESPONSE_SCHEMA_JSON) {
            Ok(v) => v,
            Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
        };

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    match result {
        Ok(v) => Ok(v),
        Err(e) => Err(SchemaError::LoadError(e.clone())),
    }
}

/// Validate a parsed response against the schema.
///
/// Returns every violation, each suffixed with its location.
pub fn validate_response_schema(response: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(response)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_compiles() {
        assert!(get_validator().is_ok());
    }

    #[test]
    fn test_minimal_response_is_valid() {
        let response = json!({
            "candidates": [{ "candidate_id": "src-1", "votes": 100 }]
        });
        assert!(validate_response_schema(&response).is_ok());
    }

    #[test]
    fn test_alias_identity_is_valid() {
        let response = json!({
            "candidates": [{ "source_id": 17, "votes": "100" }],
            "counties": [{
                "county_id": "c-1",
                "candidates": [{ "id": 17, "votes": 40 }]
            }]
        });
        assert!(validate_response_schema(&response).is_ok());
    }

    #[test]
    fn test_missing_votes_is_invalid() {
        let response = json!({
            "candidates": [{ "candidate_id": "src-1" }]
        });
        let errors = validate_response_schema(&response).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_missing_identity_is_invalid() {
        let response = json!({
            "candidates": [{ "candidate_name": "Ada", "votes": 10 }]
        });
        assert!(validate_response_schema(&response).is_err());
    }

    #[test]
    fn test_non_object_is_invalid() {
        assert!(validate_response_schema(&json!([1, 2, 3])).is_err());
    }
}
