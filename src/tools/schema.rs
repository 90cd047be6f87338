//! Argument validation against a tool's declared JSON schema
//!
//! Checks the `required` list and primitive `type` of each declared property.
//! Undeclared extra properties are allowed; nested object schemas are checked
//! one level deep, which covers every tool schema in practice.

use serde_json::Value;

/// Validate `args` against `schema`. Returns a human-readable reason on failure.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let schema_type = schema.get("type").and_then(|t| t.as_str());
    if schema_type != Some("object") {
        // Tools declare object schemas; anything else only requires parseable JSON.
        return Ok(());
    }

    let obj = match args.as_object() {
        Some(o) => o,
        None => return Err(format!("expected an object, got {}", type_name(args))),
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for name in required.iter().filter_map(|n| n.as_str()) {
            if !obj.contains_key(name) {
                return Err(format!("missing required argument '{}'", name));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (name, prop_schema) in props {
            if let Some(value) = obj.get(name) {
                if let Some(expected) = prop_schema.get("type").and_then(|t| t.as_str()) {
                    if !type_matches(expected, value) {
                        return Err(format!(
                            "argument '{}' should be {}, got {}",
                            name,
                            expected,
                            type_name(value)
                        ));
                    }
                }
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "max_bytes": {"type": "integer"}
            },
            "required": ["path"]
        })
    }

    #[test]
    fn accepts_valid_args() {
        let args = json!({"path": "/tmp/x", "max_bytes": 1024});
        assert!(validate_args(&file_schema(), &args).is_ok());
    }

    #[test]
    fn rejects_missing_required() {
        let args = json!({"max_bytes": 1024});
        let err = validate_args(&file_schema(), &args).unwrap_err();
        assert!(err.contains("path"));
    }

    #[test]
    fn rejects_wrong_type() {
        let args = json!({"path": 42});
        let err = validate_args(&file_schema(), &args).unwrap_err();
        assert!(err.contains("should be string"));
    }

    #[test]
    fn rejects_non_object_args() {
        let err = validate_args(&file_schema(), &json!("just a string")).unwrap_err();
        assert!(err.contains("expected an object"));
    }

    #[test]
    fn extra_properties_are_allowed() {
        let args = json!({"path": "/tmp/x", "note": "extra"});
        assert!(validate_args(&file_schema(), &args).is_ok());
    }

    #[test]
    fn non_object_schema_passes_anything() {
        assert!(validate_args(&json!({}), &json!([1, 2])).is_ok());
    }
}
