//! In-process library adapter.
//!
//! Functions are registered with the metadata they declare, grouped into
//! namespaces, and exposed through [`Introspectable`] exactly like a
//! reflectively loaded library would be.

use serde_json::Value;
use std::future::Future;

use super::{
    DeclaredParam, InvocationHandle, IntrospectError, Introspectable, LibraryFailure,
    MemberEntry, MemberKind, MemberMetadata, MemberPath,
};
use crate::types::OrderedArgs;

/// One callable member.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    name: String,
    params: Vec<DeclaredParam>,
    returns: Option<String>,
    doc: Option<String>,
    metadata_available: bool,
    handle: Option<InvocationHandle>,
}

impl FunctionDef {
    pub fn with_handle(name: impl Into<String>, handle: InvocationHandle) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: None,
            doc: None,
            metadata_available: true,
            handle: Some(handle),
        }
    }

    pub fn blocking<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(OrderedArgs) -> Result<Value, LibraryFailure> + Send + Sync + 'static,
    {
        Self::with_handle(name, InvocationHandle::blocking(f))
    }

    pub fn async_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(OrderedArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, LibraryFailure>> + Send + 'static,
    {
        Self::with_handle(name, InvocationHandle::async_fn(f))
    }

    pub fn param(mut self, param: DeclaredParam) -> Self {
        self.params.push(param);
        self
    }

    pub fn returns(mut self, annotation: impl Into<String>) -> Self {
        self.returns = Some(annotation.into());
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// The member is callable but refuses introspection.
    pub fn without_metadata(mut self) -> Self {
        self.metadata_available = false;
        self
    }

    /// The member is listed as callable but cannot be bound.
    pub fn unbound(mut self) -> Self {
        self.handle = None;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn from_parts(
        name: String,
        metadata: Option<MemberMetadata>,
        handle: Option<InvocationHandle>,
    ) -> Self {
        let metadata_available = metadata.is_some();
        let MemberMetadata {
            params,
            returns,
            doc,
        } = metadata.unwrap_or_default();
        Self {
            name,
            params,
            returns,
            doc,
            metadata_available,
            handle,
        }
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Function(FunctionDef),
    Namespace(Namespace),
    Attribute,
    /// A namespace whose listing fails.
    Sealed(String),
}

impl Entry {
    fn kind(&self) -> MemberKind {
        match self {
            Entry::Function(_) => MemberKind::Callable,
            Entry::Namespace(_) | Entry::Sealed(_) => MemberKind::Namespace,
            Entry::Attribute => MemberKind::Attribute,
        }
    }
}

/// Ordered set of members.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    entries: Vec<(String, Entry)>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(mut self, def: FunctionDef) -> Self {
        self.entries.push((def.name.clone(), Entry::Function(def)));
        self
    }

    pub fn namespace(mut self, name: impl Into<String>, ns: Namespace) -> Self {
        self.entries.push((name.into(), Entry::Namespace(ns)));
        self
    }

    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        self.entries.push((name.into(), Entry::Attribute));
        self
    }

    /// A namespace that is listed but cannot be enumerated.
    pub fn sealed_namespace(mut self, name: impl Into<String>, reason: impl Into<String>) -> Self {
        self.entries.push((name.into(), Entry::Sealed(reason.into())));
        self
    }

    fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, e)| e)
    }
}

/// Library built in process.
#[derive(Debug, Clone)]
pub struct StaticLibrary {
    name: String,
    root: Namespace,
    unavailable: Option<String>,
}

impl StaticLibrary {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: Namespace::new(),
            unavailable: None,
        }
    }

    pub fn from_namespace(name: impl Into<String>, root: Namespace) -> Self {
        Self {
            name: name.into(),
            root,
            unavailable: None,
        }
    }

    /// A library handle that failed to load; every listing fails.
    pub fn unavailable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: Namespace::new(),
            unavailable: Some(reason.into()),
        }
    }

    pub fn function(mut self, def: FunctionDef) -> Self {
        self.root = self.root.function(def);
        self
    }

    pub fn namespace(mut self, name: impl Into<String>, ns: Namespace) -> Self {
        self.root = self.root.namespace(name, ns);
        self
    }

    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        self.root = self.root.attribute(name);
        self
    }

    pub fn sealed_namespace(mut self, name: impl Into<String>, reason: impl Into<String>) -> Self {
        self.root = self.root.sealed_namespace(name, reason);
        self
    }

    fn resolve(&self, path: &MemberPath) -> Result<&Entry, IntrospectError> {
        let not_found = || IntrospectError::NotFound {
            path: path.qualified(),
        };
        let (last, parents) = path.segments().split_last().ok_or_else(not_found)?;
        let mut ns = &self.root;
        for seg in parents {
            match ns.get(seg) {
                Some(Entry::Namespace(inner)) => ns = inner,
                Some(Entry::Sealed(reason)) => {
                    return Err(IntrospectError::Unavailable {
                        path: path.qualified(),
                        reason: reason.clone(),
                    })
                }
                _ => return Err(not_found()),
            }
        }
        ns.get(last).ok_or_else(not_found)
    }

    fn function_at(&self, path: &MemberPath) -> Result<&FunctionDef, IntrospectError> {
        match self.resolve(path)? {
            Entry::Function(def) => Ok(def),
            _ => Err(IntrospectError::NotCallable {
                path: path.qualified(),
            }),
        }
    }
}

impl Introspectable for StaticLibrary {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_members(&self, namespace: &MemberPath) -> Result<Vec<MemberEntry>, IntrospectError> {
        if let Some(reason) = &self.unavailable {
            return Err(IntrospectError::Unavailable {
                path: namespace.qualified(),
                reason: reason.clone(),
            });
        }
        let ns = if namespace.is_root() {
            &self.root
        } else {
            match self.resolve(namespace)? {
                Entry::Namespace(ns) => ns,
                Entry::Sealed(reason) => {
                    return Err(IntrospectError::Unavailable {
                        path: namespace.qualified(),
                        reason: reason.clone(),
                    })
                }
                _ => {
                    return Err(IntrospectError::NotFound {
                        path: namespace.qualified(),
                    })
                }
            }
        };
        Ok(ns
            .entries
            .iter()
            .map(|(name, entry)| MemberEntry::new(name.clone(), entry.kind()))
            .collect())
    }

    fn metadata(&self, path: &MemberPath) -> Result<MemberMetadata, IntrospectError> {
        let def = self.function_at(path)?;
        if !def.metadata_available {
            return Err(IntrospectError::Unavailable {
                path: path.qualified(),
                reason: "callable exposes no signature".into(),
            });
        }
        Ok(MemberMetadata {
            params: def.params.clone(),
            returns: def.returns.clone(),
            doc: def.doc.clone(),
        })
    }

    fn bind(&self, path: &MemberPath) -> Result<InvocationHandle, IntrospectError> {
        self.function_at(path)?
            .handle
            .clone()
            .ok_or_else(|| IntrospectError::Unbound {
                path: path.qualified(),
            })
    }
}
