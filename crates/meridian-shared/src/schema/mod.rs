//! JSON Schema validator (C3): cached JSON-Schema evaluation with
//! hierarchical error paths.

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonschema::Validator;
use moka::sync::Cache as MokaSyncCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid schema definition: {0}")]
    InvalidSchema(String),

    #[error("invalid instance JSON: {0}")]
    InvalidInstance(String),
}

/// Hierarchical error path pair for one validation failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationError {
    pub instance_path: String,
    pub schema_path: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub first_error_path: Option<String>,
    pub duration: Duration,
}

impl ValidationOutcome {
    fn valid(duration: Duration) -> Self {
        Self {
            valid: true,
            errors: vec![],
            first_error_path: None,
            duration,
        }
    }

    fn invalid(errors: Vec<ValidationError>, duration: Duration) -> Self {
        let first_error_path = errors.first().map(|e| e.instance_path.clone());
        Self {
            valid: false,
            errors,
            first_error_path,
            duration,
        }
    }
}

/// Evaluates JSON instances against JSON Schemas, keeping a
/// content-hash-keyed cache of compiled schemas to avoid recompilation
/// (`spec.md` §4.3).
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    compiled: MokaSyncCache<String, Arc<Validator>>,
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self {
            compiled: MokaSyncCache::builder()
                .max_capacity(1000)
                .build(),
        }
    }

    fn content_hash(schema_definition: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(schema_definition.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn compiled_schema(&self, schema_definition: &str) -> Result<Arc<Validator>, SchemaError> {
        let key = Self::content_hash(schema_definition);
        if let Some(validator) = self.compiled.get(&key) {
            return Ok(validator);
        }

        let schema_json: serde_json::Value = serde_json::from_str(schema_definition)
            .map_err(|e| SchemaError::InvalidSchema(e.to_string()))?;
        let validator = jsonschema::validator_for(&schema_json)
            .map_err(|e| SchemaError::InvalidSchema(e.to_string()))?;
        let validator = Arc::new(validator);
        self.compiled.insert(key, validator.clone());
        Ok(validator)
    }

    /// Evaluates `instance` (raw JSON text) against `schema_definition`
    /// (raw JSON Schema text). Empty/whitespace-only instances against a
    /// schema requiring content fail deterministically, matching
    /// `jsonschema`'s treatment of a missing/invalid instance as a
    /// validation error rather than a parse panic.
    pub fn validate(
        &self,
        instance: &str,
        schema_definition: &str,
    ) -> Result<ValidationOutcome, SchemaError> {
        let start = Instant::now();
        let validator = self.compiled_schema(schema_definition)?;

        let instance_json: serde_json::Value = if instance.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(instance).map_err(|e| SchemaError::InvalidInstance(e.to_string()))?
        };

        let errors: Vec<ValidationError> = validator
            .iter_errors(&instance_json)
            .map(|e| ValidationError {
                instance_path: e.instance_path.to_string(),
                schema_path: e.schema_path.to_string(),
                message: e.to_string(),
            })
            .collect();

        tracing::debug!(
            instance_len = instance.len(),
            valid = errors.is_empty(),
            "schema validation evaluated"
        );

        if errors.is_empty() {
            Ok(ValidationOutcome::valid(start.elapsed()))
        } else {
            Ok(ValidationOutcome::invalid(errors, start.elapsed()))
        }
    }
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED_NAME_SCHEMA: &str = r#"{"type":"object","required":["name"]}"#;

    #[test]
    fn valid_instance_passes() {
        let validator = SchemaValidator::new();
        let outcome = validator
            .validate(r#"{"name":"a"}"#, REQUIRED_NAME_SCHEMA)
            .unwrap();
        assert!(outcome.valid);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn missing_required_field_fails() {
        let validator = SchemaValidator::new();
        let outcome = validator.validate(r#"{}"#, REQUIRED_NAME_SCHEMA).unwrap();
        assert!(!outcome.valid);
        assert!(outcome.first_error_path.is_some());
    }

    #[test]
    fn empty_instance_against_required_schema_fails() {
        let validator = SchemaValidator::new();
        let outcome = validator.validate("", REQUIRED_NAME_SCHEMA).unwrap();
        assert!(!outcome.valid);
    }

    #[test]
    fn whitespace_only_instance_fails_required_schema() {
        let validator = SchemaValidator::new();
        let outcome = validator.validate("   ", REQUIRED_NAME_SCHEMA).unwrap();
        assert!(!outcome.valid);
    }

    #[test]
    fn schema_with_no_constraints_accepts_anything() {
        let validator = SchemaValidator::new();
        let outcome = validator.validate(r#"{"anything":1}"#, "{}").unwrap();
        assert!(outcome.valid);
    }

    #[test]
    fn invalid_schema_definition_is_rejected() {
        let validator = SchemaValidator::new();
        let result = validator.validate("{}", "not json");
        assert!(result.is_err());
    }

    #[test]
    fn repeated_validation_reuses_compiled_schema() {
        let validator = SchemaValidator::new();
        for _ in 0..5 {
            let outcome = validator
                .validate(r#"{"name":"a"}"#, REQUIRED_NAME_SCHEMA)
                .unwrap();
            assert!(outcome.valid);
        }
    }
}
