//! Library manifests: member metadata declared in YAML, bound to handlers.
//!
//! Used when a library cannot describe itself at runtime but its surface is
//! documented out of band. A manifest member without a `params` list is
//! registered without metadata, just like a callable that refuses reflection.
//!
//! ```yaml
//! name: whisper
//! members:
//!   - name: transcribe
//!     doc: Transcribe an audio file.
//!     returns: dict
//!     params:
//!       - { name: audio, type: bytes }
//!       - { name: language, type: str, default: null }
//!   - name: models
//!     members:
//!       - name: list
//!         handler: list_models
//! ```

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

use super::static_library::{FunctionDef, Namespace, StaticLibrary};
use super::{DeclaredParam, InvocationHandle, MemberMetadata, ParamKind};
use crate::scanner::ScanError;

/// Parsed manifest, not yet bound to handlers.
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryManifest {
    pub name: String,
    #[serde(default)]
    pub members: Vec<ManifestMember>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestMember {
    pub name: String,
    #[serde(default)]
    pub doc: Option<String>,
    #[serde(default)]
    pub returns: Option<String>,
    /// Absent means the member declares no metadata.
    #[serde(default)]
    pub params: Option<Vec<ManifestParam>>,
    /// Present means the member is a namespace.
    #[serde(default)]
    pub members: Option<Vec<ManifestMember>>,
    /// Handler key; defaults to the qualified member name.
    #[serde(default)]
    pub handler: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestParam {
    pub name: String,
    #[serde(default, rename = "type")]
    pub type_annotation: Option<String>,
    #[serde(default, deserialize_with = "present_value")]
    pub default: Option<Value>,
    #[serde(default)]
    pub variadic: bool,
}

// Distinguishes `default: null` (Some(Null)) from an absent key (None).
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl LibraryManifest {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ScanError> {
        serde_yaml::from_str(yaml).map_err(|e| ScanError::Manifest {
            reason: e.to_string(),
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ScanError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ScanError::Manifest {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Bind members to `handlers` and produce an introspectable library.
    ///
    /// Members without a matching handler stay listed but unbound, so the
    /// scanner reports them instead of losing them.
    pub fn bind(self, handlers: &HashMap<String, InvocationHandle>) -> StaticLibrary {
        let root = build_namespace(&self.members, "", handlers);
        StaticLibrary::from_namespace(self.name, root)
    }
}

fn build_namespace(
    members: &[ManifestMember],
    prefix: &str,
    handlers: &HashMap<String, InvocationHandle>,
) -> Namespace {
    let mut ns = Namespace::new();
    for member in members {
        let qualified = if prefix.is_empty() {
            member.name.clone()
        } else {
            format!("{}.{}", prefix, member.name)
        };

        if let Some(children) = &member.members {
            ns = ns.namespace(
                member.name.clone(),
                build_namespace(children, &qualified, handlers),
            );
            continue;
        }

        let metadata = member.params.as_ref().map(|params| MemberMetadata {
            params: params.iter().map(to_declared).collect(),
            returns: member.returns.clone(),
            doc: member.doc.clone(),
        });
        let key = member.handler.as_deref().unwrap_or(&qualified);
        let handle = handlers.get(key).cloned();
        ns = ns.function(FunctionDef::from_parts(
            member.name.clone(),
            metadata,
            handle,
        ));
    }
    ns
}

fn to_declared(p: &ManifestParam) -> DeclaredParam {
    DeclaredParam {
        name: p.name.clone(),
        annotation: p.type_annotation.clone(),
        default: p.default.clone(),
        kind: if p.variadic {
            ParamKind::Variadic
        } else {
            ParamKind::Regular
        },
    }
}
