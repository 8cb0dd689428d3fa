//! Schema validation and batched validation.
//!
//! Normalises `jsonschema` validation failures into `{path, message}` pairs
//! with canonical wording for the common failure kinds spec.md calls out:
//! invalid type, email/URL format, too small/too large, enum mismatch.

use jsonschema::Validator as CompiledSchema;
use serde_json::Value;

use crate::result::{ValidationError, ValidationResult};

pub struct Validator {
    schema: CompiledSchema,
}

impl Validator {
    pub fn compile(schema: &Value) -> Result<Self, String> {
        let schema = jsonschema::validator_for(schema).map_err(|err| err.to_string())?;
        Ok(Self { schema })
    }

    pub fn validate(&self, args: &Value) -> ValidationResult {
        let mut errors = Vec::new();
        for error in self.schema.iter_errors(args) {
            let path = error.instance_path.to_string();
            let message = canonical_message(&error.to_string());
            errors.push(ValidationError::new(path, message));
        }
        if errors.is_empty() {
            ValidationResult::ok(args.clone())
        } else {
            ValidationResult::fail(errors)
        }
    }

    /// Runs `validate` over every `(tool_id, args)` pair, returning the
    /// per-entry results alongside whether every entry succeeded.
    pub fn validate_batch(&self, pairs: &[Value]) -> (Vec<ValidationResult>, bool) {
        let results: Vec<ValidationResult> = pairs.iter().map(|args| self.validate(args)).collect();
        let overall_success = results.iter().all(|r| r.success);
        (results, overall_success)
    }
}

fn canonical_message(raw: &str) -> String {
    let lower = raw.to_lowercase();
    if lower.contains("is not of type") {
        "invalid type".to_string()
    } else if lower.contains("\"email\"") || lower.contains("format: email") {
        "invalid email format".to_string()
    } else if lower.contains("\"uri\"") || lower.contains("format: uri") || lower.contains("format: url") {
        "invalid URL format".to_string()
    } else if lower.contains("is less than the minimum") || lower.contains("is shorter than") {
        "value too small".to_string()
    } else if lower.contains("is greater than the maximum") || lower.contains("is longer than") {
        "value too large".to_string()
    } else if lower.contains("is not one of") {
        "value does not match any allowed enum member".to_string()
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flags_missing_required_field() {
        let schema = json!({
            "type": "object",
            "required": ["name"],
            "properties": {"name": {"type": "string"}}
        });
        let validator = Validator::compile(&schema).unwrap();
        let result = validator.validate(&json!({}));
        assert!(!result.success);
    }

    #[test]
    fn accepts_well_formed_args() {
        let schema = json!({
            "type": "object",
            "required": ["name"],
            "properties": {"name": {"type": "string"}}
        });
        let validator = Validator::compile(&schema).unwrap();
        let result = validator.validate(&json!({"name": "ok"}));
        assert!(result.success);
    }

    #[test]
    fn validate_batch_reports_overall_success() {
        let schema = json!({
            "type": "object",
            "required": ["v"],
            "properties": {"v": {"type": "string", "minLength": 1}}
        });
        let validator = Validator::compile(&schema).unwrap();
        let (results, overall) = validator.validate_batch(&[json!({"v": "ok"}), json!({"v": ""})]);
        assert_eq!(results.len(), 2);
        assert!(!overall);
    }
}
