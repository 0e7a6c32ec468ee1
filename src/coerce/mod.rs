//! Request coercion: untyped payload to ordered, typed arguments.
//!
//! Rules, per parameter in signature order:
//! - present: coerce to the declared [`TypeTag`]; integers widen to floats,
//!   strings are never parsed into numbers
//! - absent and required: [`ValidationError::MissingField`]
//! - absent and optional: the declared default
//! - binary: must be an upload reference, never inline content
//!
//! Payload fields unknown to the signature are ignored, unless the signature is
//! open (registered without metadata), in which case they pass through untyped.

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::types::{OrderedArgs, SignatureModel, TypeTag, UploadRef};

/// Payload rejected before any resource is acquired.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field '{field}'")]
    MissingField { field: String },

    #[error("field '{field}' expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: TypeTag,
        actual: &'static str,
    },

    #[error("field '{field}' is not a valid upload reference: {reason}")]
    InvalidUpload { field: String, reason: String },

    #[error("payload must be a JSON object, got {actual}")]
    NotAnObject { actual: &'static str },
}

impl ValidationError {
    /// Offending field; empty for a non-object payload.
    pub fn field(&self) -> &str {
        match self {
            Self::MissingField { field }
            | Self::TypeMismatch { field, .. }
            | Self::InvalidUpload { field, .. } => field,
            Self::NotAnObject { .. } => "",
        }
    }
}

/// JSON type name used in mismatch reports.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Coerce `payload` against `signature`.
///
/// A `null` payload is treated as an empty object so that services without
/// required parameters can be called with no body at all.
pub fn coerce(signature: &SignatureModel, payload: &Value) -> Result<OrderedArgs, ValidationError> {
    let empty = Map::new();
    let fields = match payload {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return Err(ValidationError::NotAnObject {
                actual: json_type_name(other),
            })
        }
    };

    let mut args = OrderedArgs::new();
    for param in &signature.parameters {
        match fields.get(&param.name) {
            Some(Value::Null) if !param.is_required() || param.type_tag == TypeTag::Any => {
                args.push(param.name.clone(), Value::Null);
            }
            Some(value) => {
                let coerced = coerce_value(&param.name, param.type_tag, value)?;
                args.push(param.name.clone(), coerced);
            }
            None => match param.default() {
                Some(default) => args.push(param.name.clone(), default.clone()),
                None => {
                    return Err(ValidationError::MissingField {
                        field: param.name.clone(),
                    })
                }
            },
        }
    }

    if signature.open {
        for (name, value) in fields {
            if signature.parameter(name).is_none() {
                args.push(name.clone(), value.clone());
            }
        }
    }

    Ok(args)
}

/// Coerce a single present value to `tag`.
pub fn coerce_value(field: &str, tag: TypeTag, value: &Value) -> Result<Value, ValidationError> {
    let mismatch = || ValidationError::TypeMismatch {
        field: field.to_string(),
        expected: tag,
        actual: json_type_name(value),
    };

    match tag {
        TypeTag::Any => Ok(value.clone()),
        TypeTag::String => value.is_string().then(|| value.clone()).ok_or_else(mismatch),
        TypeTag::Boolean => value.is_boolean().then(|| value.clone()).ok_or_else(mismatch),
        TypeTag::Array => value.is_array().then(|| value.clone()).ok_or_else(mismatch),
        TypeTag::Object => value.is_object().then(|| value.clone()).ok_or_else(mismatch),
        TypeTag::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            _ => Err(mismatch()),
        },
        TypeTag::Float => match value {
            Value::Number(n) => n
                .as_f64()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        TypeTag::Binary => match UploadRef::from_value(value) {
            Some(upload) => Ok(upload.to_value()),
            None => Err(ValidationError::InvalidUpload {
                field: field.to_string(),
                reason: format!(
                    "expected an upload id or {{\"upload_id\": ...}} object, got {}",
                    json_type_name(value)
                ),
            }),
        },
    }
}
