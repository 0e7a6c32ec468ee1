//! 库内省能力：枚举可调用成员、读取参数与文档、绑定调用句柄。
//!
//! # Introspection Capability
//!
//! The scanner never touches a library directly. Any library is reached
//! through the [`Introspectable`] capability, which answers four questions:
//! what is it called, which members does a namespace expose, what metadata
//! does a callable declare, and how is it invoked.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Introspectable`] | Capability implemented by every library adapter |
//! | [`MemberPath`] | Dotted path of a member (`math.add`) |
//! | [`MemberMetadata`] | Declared parameters, return annotation and docs |
//! | [`InvocationHandle`] | Bound callable, blocking or async |
//! | [`LibraryFailure`] | Failure raised by a callable |
//!
//! ## Adapters
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`static_library`] | In-process functions registered through a builder |
//! | [`manifest`] | Member metadata from a YAML manifest bound to named handlers |

pub mod manifest;
pub mod static_library;

pub use manifest::LibraryManifest;
pub use static_library::{FunctionDef, Namespace, StaticLibrary};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::types::OrderedArgs;

/// Dotted path of a member; the empty path is the library root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberPath(Vec<String>);

impl MemberPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn parse(qualified: &str) -> Self {
        Self(
            qualified
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Last segment; `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Number of namespaces above this member.
    pub fn depth(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn qualified(&self) -> String {
        self.0.join(".")
    }
}

impl fmt::Display for MemberPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.qualified())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Callable,
    Namespace,
    /// Anything else (constants, types); never registered.
    Attribute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberEntry {
    pub name: String,
    pub kind: MemberKind,
}

impl MemberEntry {
    pub fn new(name: impl Into<String>, kind: MemberKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    #[default]
    Regular,
    /// Catch-all parameter (`*args`, `**kwargs`); never part of a signature.
    Variadic,
}

/// A parameter as the library declares it, before type inference.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredParam {
    pub name: String,
    pub annotation: Option<String>,
    /// `Some(Value::Null)` is a declared null default, `None` means no default.
    pub default: Option<Value>,
    pub kind: ParamKind,
}

impl DeclaredParam {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotation: None,
            default: None,
            kind: ParamKind::Regular,
        }
    }

    pub fn annotated(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn variadic(mut self) -> Self {
        self.kind = ParamKind::Variadic;
        self
    }
}

/// What a callable declares about itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemberMetadata {
    pub params: Vec<DeclaredParam>,
    pub returns: Option<String>,
    pub doc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntrospectError {
    #[error("member '{path}' not found")]
    NotFound { path: String },

    #[error("member '{path}' is not callable")]
    NotCallable { path: String },

    #[error("member '{path}' cannot be introspected: {reason}")]
    Unavailable { path: String, reason: String },

    #[error("member '{path}' has no invocation handle")]
    Unbound { path: String },
}

/// Failure raised by a library callable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct LibraryFailure {
    pub message: String,
    /// The library rejected its input; retrying the same call cannot help.
    pub client_input: bool,
}

impl LibraryFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            client_input: false,
        }
    }

    pub fn client_input(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            client_input: true,
        }
    }
}

/// A synchronous callable. Runs on the blocking pool, never on a runtime worker.
pub trait BlockingCallable: Send + Sync + 'static {
    fn call(&self, args: OrderedArgs) -> Result<Value, LibraryFailure>;
}

impl<F> BlockingCallable for F
where
    F: Fn(OrderedArgs) -> Result<Value, LibraryFailure> + Send + Sync + 'static,
{
    fn call(&self, args: OrderedArgs) -> Result<Value, LibraryFailure> {
        self(args)
    }
}

/// A natively asynchronous callable.
#[async_trait]
pub trait AsyncCallable: Send + Sync + 'static {
    async fn call(&self, args: OrderedArgs) -> Result<Value, LibraryFailure>;
}

struct AsyncFn<F>(F);

#[async_trait]
impl<F, Fut> AsyncCallable for AsyncFn<F>
where
    F: Fn(OrderedArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, LibraryFailure>> + Send + 'static,
{
    async fn call(&self, args: OrderedArgs) -> Result<Value, LibraryFailure> {
        (self.0)(args).await
    }
}

/// Bound invocation handle of one service.
#[derive(Clone)]
pub enum InvocationHandle {
    Blocking(Arc<dyn BlockingCallable>),
    Async(Arc<dyn AsyncCallable>),
}

impl InvocationHandle {
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(OrderedArgs) -> Result<Value, LibraryFailure> + Send + Sync + 'static,
    {
        Self::Blocking(Arc::new(f))
    }

    pub fn async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(OrderedArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, LibraryFailure>> + Send + 'static,
    {
        Self::Async(Arc::new(AsyncFn(f)))
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocking(_))
    }
}

impl fmt::Debug for InvocationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocking(_) => f.write_str("InvocationHandle::Blocking"),
            Self::Async(_) => f.write_str("InvocationHandle::Async"),
        }
    }
}

/// Capability every library adapter implements.
///
/// Listing the root namespace must succeed for the library to be considered
/// usable at all; every other failure is local to one member.
pub trait Introspectable: Send + Sync {
    /// Library name used in logs and scan reports.
    fn name(&self) -> &str;

    /// Members directly inside `namespace` (the root when empty).
    fn list_members(&self, namespace: &MemberPath) -> Result<Vec<MemberEntry>, IntrospectError>;

    fn metadata(&self, path: &MemberPath) -> Result<MemberMetadata, IntrospectError>;

    fn bind(&self, path: &MemberPath) -> Result<InvocationHandle, IntrospectError>;
}

impl<T: Introspectable + ?Sized> Introspectable for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn list_members(&self, namespace: &MemberPath) -> Result<Vec<MemberEntry>, IntrospectError> {
        (**self).list_members(namespace)
    }

    fn metadata(&self, path: &MemberPath) -> Result<MemberMetadata, IntrospectError> {
        (**self).metadata(path)
    }

    fn bind(&self, path: &MemberPath) -> Result<InvocationHandle, IntrospectError> {
        (**self).bind(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_member_path() {
        let root = MemberPath::root();
        assert!(root.is_root());
        assert_eq!(root.to_string(), "<root>");

        let add = root.child("math").child("add");
        assert_eq!(add.qualified(), "math.add");
        assert_eq!(add.name(), Some("add"));
        assert_eq!(add.depth(), 1);
        assert_eq!(MemberPath::parse("math.add"), add);
        assert_eq!(MemberPath::parse("echo").depth(), 0);
    }

    #[test]
    fn test_library_failure_flags() {
        assert!(!LibraryFailure::new("boom").client_input);
        let f = LibraryFailure::client_input("bad wav header");
        assert!(f.client_input);
        assert_eq!(f.to_string(), "bad wav header");
    }

    #[tokio::test]
    async fn test_handles_invoke() {
        let blocking = InvocationHandle::blocking(|args: OrderedArgs| {
            Ok(args.get("x").cloned().unwrap_or(Value::Null))
        });
        assert!(blocking.is_blocking());
        if let InvocationHandle::Blocking(f) = &blocking {
            let out = f.call(OrderedArgs::new().with("x", json!(1))).unwrap();
            assert_eq!(out, json!(1));
        }

        let asynchronous = InvocationHandle::async_fn(|_args: OrderedArgs| async {
            Ok(json!("done"))
        });
        assert!(!asynchronous.is_blocking());
        if let InvocationHandle::Async(f) = &asynchronous {
            assert_eq!(f.call(OrderedArgs::new()).await.unwrap(), json!("done"));
        }
    }
}
