//! Signature model for discovered callables

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Declared or inferred type of a parameter or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    String,
    Integer,
    Float,
    Boolean,
    /// File-like content passed by reference (see [`crate::types::UploadRef`]).
    Binary,
    Array,
    Object,
    /// No usable type information; coercion is a pass-through.
    Any,
}

impl TypeTag {
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Binary => "binary",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }

    /// Map a declared type annotation to a tag.
    ///
    /// Accepts Rust spellings and the common dynamic-language ones. `Option<T>`
    /// and `Optional[T]` unwrap to `T`. Returns `None` for annotations with no
    /// known mapping so callers can fall back to default-value inference.
    pub fn from_annotation(annotation: &str) -> Option<Self> {
        let raw = annotation.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some(inner) = unwrap_generic(raw, &["Option", "Optional", "typing.Optional"]) {
            return Self::from_annotation(inner);
        }

        let lower = raw.to_ascii_lowercase();
        let head = lower
            .split(|c| c == '<' || c == '[')
            .next()
            .unwrap_or("")
            .trim();

        // byte containers come before the generic array rule
        if matches!(lower.as_str(), "vec<u8>" | "&[u8]" | "[u8]" | "bytes::bytes") {
            return Some(Self::Binary);
        }

        let tag = match head {
            "str" | "string" | "&str" | "char" | "text" => Self::String,
            "int" | "integer" | "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16"
            | "u32" | "u64" | "u128" | "usize" => Self::Integer,
            "float" | "double" | "number" | "f32" | "f64" | "decimal" => Self::Float,
            "bool" | "boolean" => Self::Boolean,
            "bytes" | "bytearray" | "binary" | "file" | "uploadfile" | "binaryio" => Self::Binary,
            "list" | "vec" | "tuple" | "array" | "sequence" | "set" | "hashset" | "btreeset"
            | "typing.list" => Self::Array,
            "" if lower.starts_with('[') => Self::Array,
            "dict" | "map" | "hashmap" | "btreemap" | "object" | "mapping" | "typing.dict"
            | "serde_json::map" => Self::Object,
            "any" | "value" | "serde_json::value" | "typing.any" => Self::Any,
            _ => return None,
        };
        Some(tag)
    }

    /// Infer a tag from a JSON value (used for declared defaults).
    pub fn infer_from_value(value: &Value) -> Self {
        match value {
            Value::String(_) => Self::String,
            Value::Bool(_) => Self::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Integer,
            Value::Number(_) => Self::Float,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
            Value::Null => Self::Any,
        }
    }

    fn json_schema_type(&self) -> Option<&'static str> {
        match self {
            Self::String | Self::Binary => Some("string"),
            Self::Integer => Some("integer"),
            Self::Float => Some("number"),
            Self::Boolean => Some("boolean"),
            Self::Array => Some("array"),
            Self::Object => Some("object"),
            Self::Any => None,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn unwrap_generic<'a>(raw: &'a str, wrappers: &[&str]) -> Option<&'a str> {
    for w in wrappers {
        if let Some(rest) = raw.strip_prefix(w) {
            let rest = rest.trim_start();
            if let Some(inner) = rest.strip_prefix('<').and_then(|r| r.strip_suffix('>')) {
                return Some(inner);
            }
            if let Some(inner) = rest.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
                return Some(inner);
            }
        }
    }
    None
}

/// Whether a parameter must be supplied.
///
/// An optional parameter always has a default; `Value::Null` marks that null
/// is the explicit allowed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "requirement", rename_all = "snake_case")]
pub enum Requirement {
    Required,
    Optional { default: Value },
}

/// One parameter of a discovered callable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub type_tag: TypeTag,
    #[serde(flatten)]
    pub requirement: Requirement,
}

impl ParameterSpec {
    pub fn required(name: impl Into<String>, type_tag: TypeTag) -> Self {
        Self {
            name: name.into(),
            type_tag,
            requirement: Requirement::Required,
        }
    }

    pub fn optional(name: impl Into<String>, type_tag: TypeTag, default: Value) -> Self {
        Self {
            name: name.into(),
            type_tag,
            requirement: Requirement::Optional { default },
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(self.requirement, Requirement::Required)
    }

    pub fn default(&self) -> Option<&Value> {
        match &self.requirement {
            Requirement::Required => None,
            Requirement::Optional { default } => Some(default),
        }
    }
}

/// Immutable description of one registered service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureModel {
    /// Fully qualified service name, unique within a registry.
    pub name: String,
    pub parameters: Vec<ParameterSpec>,
    pub returns: TypeTag,
    #[serde(default)]
    pub description: String,
    /// Forward payload fields not named in `parameters` as `Any` instead of
    /// ignoring them. Set for members registered without metadata.
    #[serde(default)]
    pub open: bool,
}

impl SignatureModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            returns: TypeTag::Any,
            description: String::new(),
            open: false,
        }
    }

    /// Signature used when a member exposes no usable metadata: nothing is
    /// required and every payload field passes through untyped.
    pub fn degraded(name: impl Into<String>) -> Self {
        let mut sig = Self::new(name);
        sig.open = true;
        sig
    }

    pub fn with_parameter(mut self, param: ParameterSpec) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn with_returns(mut self, returns: TypeTag) -> Self {
        self.returns = returns;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn required_parameters(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.parameters.iter().filter(|p| p.is_required())
    }

    /// Render the parameter list as a JSON Schema object.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for p in &self.parameters {
            let mut prop = Map::new();
            if let Some(t) = p.type_tag.json_schema_type() {
                prop.insert("type".into(), json!(t));
            }
            if p.type_tag == TypeTag::Binary {
                prop.insert("format".into(), json!("upload-ref"));
            }
            match &p.requirement {
                Requirement::Required => required.push(json!(p.name)),
                Requirement::Optional { default } => {
                    prop.insert("default".into(), default.clone());
                }
            }
            properties.insert(p.name.clone(), Value::Object(prop));
        }

        let mut schema = Map::new();
        schema.insert("type".into(), json!("object"));
        schema.insert("properties".into(), Value::Object(properties));
        schema.insert("required".into(), Value::Array(required));
        if self.open {
            schema.insert("additionalProperties".into(), json!(true));
        }
        if !self.description.is_empty() {
            schema.insert("description".into(), json!(self.description));
        }
        Value::Object(schema)
    }
}
