//! Argument validation against a tool's declared input schema.
//!
//! Supports the subset of JSON Schema the tool definitions use: `required`,
//! `properties` with `type`, `default`, `enum`, `minimum`/`maximum`,
//! `minLength`, `minItems`/`maxItems` and `items`, plus
//! `additionalProperties: false`.

use serde_json::{Map, Number, Value};

use crate::types::{McpError, McpResult};

/// Check `arguments` against `schema` and return them with defaults filled in.
///
/// Checks run in three passes and the first violation wins: required
/// arguments, then unknown names and types, then value constraints. An
/// explicit `null` counts as omitted.
pub fn validate_arguments(schema: &Value, arguments: Option<Value>) -> McpResult<Map<String, Value>> {
    let mut args = match arguments {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(McpError::InvalidParams(format!(
                "Arguments must be an object, got {}",
                type_name(&other)
            )))
        }
    };
    args.retain(|_, v| !v.is_null());

    let empty = Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(name) {
                return Err(McpError::InvalidParams(format!(
                    "Missing required argument: {name}"
                )));
            }
        }
    }

    for (name, value) in args.iter_mut() {
        match properties.get(name) {
            Some(prop) => check_type(name, prop, value)?,
            None if closed => {
                return Err(McpError::InvalidParams(format!("Unknown argument: {name}")))
            }
            None => {}
        }
    }

    for (name, value) in &args {
        if let Some(prop) = properties.get(name) {
            check_constraints(name, prop, value)?;
        }
    }

    for (name, prop) in properties {
        if !args.contains_key(name) {
            if let Some(default) = prop.get("default") {
                args.insert(name.clone(), default.clone());
            }
        }
    }

    Ok(args)
}

/// Type check, normalizing integral floats (`800.0`) for `integer` fields.
fn check_type(name: &str, prop: &Value, value: &mut Value) -> McpResult<()> {
    let Some(expected) = prop.get("type").and_then(Value::as_str) else {
        return Ok(());
    };

    if expected == "integer" {
        if let Some(n) = integral(value) {
            *value = Value::Number(n);
        }
    }

    if !type_matches(expected, value) {
        return Err(McpError::InvalidParams(format!(
            "Argument '{name}' must be {}, got {}",
            with_article(expected),
            type_name(value)
        )));
    }

    if let (Some(items), Value::Array(elements)) = (prop.get("items"), value) {
        for (i, element) in elements.iter_mut().enumerate() {
            check_type(&format!("{name}[{i}]"), items, element)?;
        }
    }

    Ok(())
}

fn check_constraints(name: &str, prop: &Value, value: &Value) -> McpResult<()> {
    if let Some(n) = value.as_f64() {
        if let Some(min) = prop.get("minimum").and_then(Value::as_f64) {
            if n < min {
                return Err(McpError::InvalidParams(format!(
                    "Argument '{name}' must be >= {min}, got {n}"
                )));
            }
        }
        if let Some(max) = prop.get("maximum").and_then(Value::as_f64) {
            if n > max {
                return Err(McpError::InvalidParams(format!(
                    "Argument '{name}' must be <= {max}, got {n}"
                )));
            }
        }
    }

    if let (Some(s), Some(min)) = (value.as_str(), prop.get("minLength").and_then(Value::as_u64)) {
        if (s.chars().count() as u64) < min {
            return Err(McpError::InvalidParams(format!(
                "Argument '{name}' must be at least {min} characters long"
            )));
        }
    }

    if let Some(elements) = value.as_array() {
        let len = elements.len() as u64;
        if let Some(min) = prop.get("minItems").and_then(Value::as_u64) {
            if len < min {
                return Err(McpError::InvalidParams(format!(
                    "Argument '{name}' must contain at least {min} items, got {len}"
                )));
            }
        }
        if let Some(max) = prop.get("maxItems").and_then(Value::as_u64) {
            if len > max {
                return Err(McpError::InvalidParams(format!(
                    "Argument '{name}' must contain at most {max} items, got {len}"
                )));
            }
        }
        if let Some(items) = prop.get("items") {
            for (i, element) in elements.iter().enumerate() {
                check_constraints(&format!("{name}[{i}]"), items, element)?;
            }
        }
    }

    if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            let options: Vec<String> = allowed.iter().map(Value::to_string).collect();
            return Err(McpError::InvalidParams(format!(
                "Argument '{name}' must be one of [{}], got {value}",
                options.join(", ")
            )));
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
        _ => true,
    }
}

fn integral(value: &Value) -> Option<Number> {
    let f = value.as_f64().filter(|_| value.is_f64())?;
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(Number::from(f as i64))
    } else {
        None
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn with_article(type_name: &str) -> String {
    match type_name {
        "integer" | "array" | "object" => format!("an {type_name}"),
        other => format!("a {other}"),
    }
}
