use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// A compiled JSON Schema, used to validate tool arguments, yield inputs,
/// and structured agent output.
///
/// Validation is done against a freshly-built `jsonschema::Validator` per
/// call rather than one held on the struct, since the validator borrows
/// from the document it compiles and `Schema` needs to stay plain `Clone`
/// + `Send` so it can sit in an `Arc<ToolDefinition>` alongside everything
/// else. `Schema::new` still compiles eagerly so a malformed schema is
/// rejected at construction time, not at first use.
#[derive(Clone)]
pub struct Schema {
    document: Value,
}

impl Schema {
    pub fn new(document: Value) -> Result<Self> {
        jsonschema::validator_for(&document).map_err(|e| Error::Schema(e.to_string()))?;
        Ok(Self { document })
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Validate `instance` against this schema, collecting every violation.
    pub fn validate(&self, instance: &Value) -> std::result::Result<(), Vec<String>> {
        let validator = jsonschema::validator_for(&self.document)
            .expect("schema was already validated in Schema::new");
        let errors: Vec<String> = validator.iter_errors(instance).map(|e| e.to_string()).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn is_valid(&self, instance: &Value) -> bool {
        let validator = jsonschema::validator_for(&self.document)
            .expect("schema was already validated in Schema::new");
        validator.is_valid(instance)
    }
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema").field("document", &self.document).finish()
    }
}

impl Serialize for Schema {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.document.serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Schema {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let document = Value::deserialize(deserializer)?;
        Schema::new(document).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_instance_passes() {
        let schema = Schema::new(serde_json::json!({
            "type": "object",
            "properties": {"approved": {"type": "boolean"}},
            "required": ["approved"]
        }))
        .unwrap();
        assert!(schema.is_valid(&serde_json::json!({"approved": true})));
    }

    #[test]
    fn invalid_instance_collects_errors() {
        let schema = Schema::new(serde_json::json!({
            "type": "object",
            "properties": {"approved": {"type": "boolean"}},
            "required": ["approved"]
        }))
        .unwrap();
        let result = schema.validate(&serde_json::json!({}));
        assert!(result.is_err());
        assert!(!result.unwrap_err().is_empty());
    }

    #[test]
    fn malformed_schema_rejected_at_construction() {
        let result = Schema::new(serde_json::json!({"type": "string", "pattern": "(unclosed"}));
        assert!(result.is_err());
    }
}
