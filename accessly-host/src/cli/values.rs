//! Value parsing for `set`
//!
//! `type//value` casts explicitly (`int`, `float`, `str`, `bool`) and skips
//! the type check. Anything else is parsed as JSON, falling back to a plain
//! string, and must keep the stored value's type.

use serde_json::{Number, Value};
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedValue {
    pub value: Value,
    /// Explicit cast given; no type check against the stored value.
    pub forced: bool,
}

/// Parse `raw` as typed with `type//value`. Unknown types and failed casts
/// keep the raw text as a string.
pub fn parse_typed_value(raw: &str) -> ParsedValue {
    let Some((type_name, value_str)) = raw.split_once("//") else {
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        return ParsedValue { value, forced: false };
    };

    let type_name = type_name.trim().to_lowercase();
    let value_str = value_str.trim();
    let cast = match type_name.as_str() {
        "int" => value_str.parse::<i64>().map(Value::from).map_err(|e| e.to_string()),
        "float" => value_str
            .parse::<f64>()
            .map_err(|e| e.to_string())
            .and_then(|f| Number::from_f64(f).map(Value::Number).ok_or_else(|| "not finite".to_string())),
        "str" => Ok(Value::String(value_str.to_string())),
        "bool" => Ok(Value::Bool(matches!(
            value_str.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ))),
        other => {
            warn!("Unknown type '{}', returning as string", other);
            Err(format!("unknown type '{}'", other))
        }
    };

    let value = cast.unwrap_or_else(|e| {
        warn!("Failed to cast '{}' as {}: {}", value_str, type_name, e);
        Value::String(raw.to_string())
    });
    ParsedValue { value, forced: true }
}

/// Short type name of a JSON value, integers and floats kept apart.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// Value to store over `existing`, or a type-mismatch message.
pub fn coerce_for_set(existing: &Value, raw: &str) -> Result<Value, String> {
    let parsed = parse_typed_value(raw);
    if !parsed.forced && type_name(existing) != type_name(&parsed.value) {
        return Err(format!(
            "Type mismatch: expected {}, got {}",
            type_name(existing),
            type_name(&parsed.value)
        ));
    }
    Ok(parsed.value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_typed_value() {
        assert_eq!(parse_typed_value("int//5").value, json!(5));
        assert_eq!(parse_typed_value("float// 2.5").value, json!(2.5));
        assert_eq!(parse_typed_value("str//123").value, json!("123"));
        assert_eq!(parse_typed_value("bool//Yes").value, json!(true));
        assert_eq!(parse_typed_value("bool//0").value, json!(false));
        assert!(parse_typed_value("BOOL//on").forced);
    }

    #[test]
    fn test_failed_cast_keeps_raw_string() {
        let parsed = parse_typed_value("int//five");
        assert_eq!(parsed.value, json!("int//five"));
        assert!(parsed.forced);
        assert_eq!(parse_typed_value("date//2025").value, json!("date//2025"));
    }

    #[test]
    fn test_untyped_is_json_or_string() {
        assert_eq!(parse_typed_value("false").value, json!(false));
        assert_eq!(parse_typed_value("[1,2]").value, json!([1, 2]));
        assert_eq!(parse_typed_value("hello").value, json!("hello"));
        assert!(!parse_typed_value("7").forced);
    }

    #[test]
    fn test_set_type_check() {
        assert_eq!(coerce_for_set(&json!(true), "false").unwrap(), json!(false));
        assert!(coerce_for_set(&json!(true), "maybe").is_err());
        assert!(coerce_for_set(&json!(1.5), "2").is_err());
        assert_eq!(coerce_for_set(&json!(true), "str//off").unwrap(), json!("off"));
        assert_eq!(coerce_for_set(&json!("0.4.7"), "0.4.8").unwrap(), json!("0.4.8"));
    }
}
