//! Coerced call arguments and upload references

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Opaque reference to file content held by the upload collaborator.
///
/// The dispatcher never sees file bodies; callables resolve the reference
/// against whatever store the transport layer used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRef {
    pub upload_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl UploadRef {
    pub fn new(upload_id: impl Into<String>) -> Self {
        Self {
            upload_id: upload_id.into(),
            filename: None,
            content_type: None,
            size: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Parse either a bare upload id string or an upload object.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(id) if !id.is_empty() => Some(Self::new(id.clone())),
            Value::Object(map) if map.get("upload_id").map_or(false, Value::is_string) => {
                serde_json::from_value(value.clone()).ok()
            }
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("upload_id".into(), Value::String(self.upload_id.clone()));
        if let Some(f) = &self.filename {
            map.insert("filename".into(), Value::String(f.clone()));
        }
        if let Some(c) = &self.content_type {
            map.insert("content_type".into(), Value::String(c.clone()));
        }
        if let Some(s) = self.size {
            map.insert("size".into(), Value::from(s));
        }
        Value::Object(map)
    }
}

/// Arguments in signature order, ready for invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderedArgs {
    entries: Vec<(String, Value)>,
}

impl OrderedArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.entries.push((name.into(), value));
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.push(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn upload(&self, name: &str) -> Option<UploadRef> {
        self.get(name).and_then(UploadRef::from_value)
    }

    /// Values in signature order, for libraries that bind positionally.
    pub fn positional(&self) -> Vec<&Value> {
        self.entries.iter().map(|(_, v)| v).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(n, v)| (n.clone(), v.clone()))
                .collect(),
        )
    }
}

impl Serialize for OrderedArgs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (n, v) in &self.entries {
            map.serialize_entry(n, v)?;
        }
        map.end()
    }
}
