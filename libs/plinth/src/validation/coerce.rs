//! Builtin coercions and default setters.
//!
//! Coercions are pure transformations from raw input to a typed value,
//! applied before type checking — including to values synthesized by a
//! default setter. A coercion failure becomes the field's generic
//! type-mismatch error; it never aborts the rest of the document.

use serde_json::{Number, Value};
use thiserror::Error;

use super::Document;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct CoerceError(pub String);

pub type CoerceFn = fn(&Value) -> Result<Value, CoerceError>;
pub type DefaultSetterFn = fn(&Document) -> Value;

// ---- coercions ----

/// Parse a JSON string into a value.
pub fn json(value: &Value) -> Result<Value, CoerceError> {
    let s = value
        .as_str()
        .ok_or_else(|| CoerceError("expected a JSON string".into()))?;
    serde_json::from_str(s).map_err(|e| CoerceError(format!("malformed JSON: {e}")))
}

/// Take the first element of a sequence.
pub fn first(value: &Value) -> Result<Value, CoerceError> {
    value
        .as_array()
        .and_then(|a| a.first())
        .cloned()
        .ok_or_else(|| CoerceError("expected a non-empty sequence".into()))
}

/// Parse a string into a domain identifier (24 hex characters), normalizing
/// to lower case. Malformed input is reported, not propagated as a panic.
pub fn object_id(value: &Value) -> Result<Value, CoerceError> {
    let s = value
        .as_str()
        .ok_or_else(|| CoerceError("expected an identifier string".into()))?;
    parse_object_id(s).map(Value::String)
}

/// Like [`object_id`], but an empty string passes through untouched.
pub fn empty_or_object_id(value: &Value) -> Result<Value, CoerceError> {
    match value.as_str() {
        Some("") => Ok(value.clone()),
        _ => object_id(value),
    }
}

/// Case-insensitive "true"/"1" → true; any other string → false; non-string
/// input follows JSON truthiness.
pub fn boolean(value: &Value) -> Result<Value, CoerceError> {
    let b = match value.as_str() {
        Some(s) => {
            let lower = s.to_ascii_lowercase();
            lower == "true" || lower == "1"
        }
        None => truthy(value),
    };
    Ok(Value::Bool(b))
}

pub fn integer(value: &Value) -> Result<Value, CoerceError> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Number(i.into()))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Number((f as i64).into()))
            } else {
                Err(CoerceError("number out of integer range".into()))
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(|i| Value::Number(i.into()))
            .map_err(|e| CoerceError(format!("malformed integer: {e}"))),
        Value::Bool(b) => Ok(Value::Number(i64::from(*b).into())),
        _ => Err(CoerceError("cannot coerce to integer".into())),
    }
}

pub fn float(value: &Value) -> Result<Value, CoerceError> {
    let f = match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| CoerceError("number out of float range".into()))?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| CoerceError(format!("malformed float: {e}")))?,
        _ => return Err(CoerceError("cannot coerce to float".into())),
    };
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| CoerceError("non-finite float".into()))
}

// ---- default setters ----

/// Wrap the in-progress document as a one-element array.
pub fn array_wrap(document: &Document) -> Value {
    Value::Array(vec![Value::Object(document.clone())])
}

/// Current unix time as a one-element string list.
pub fn timestamp(_document: &Document) -> Value {
    let now = chrono::Utc::now().timestamp();
    Value::Array(vec![Value::String(now.to_string())])
}

// ---- helpers ----

/// JSON truthiness: null, false, 0, "" and empty collections are falsy,
/// everything else is truthy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Validate a 24-hex-character identifier, normalizing to lower case.
pub fn parse_object_id(s: &str) -> Result<String, CoerceError> {
    if s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(s.to_ascii_lowercase())
    } else {
        Err(CoerceError(format!("malformed identifier '{s}'")))
    }
}
