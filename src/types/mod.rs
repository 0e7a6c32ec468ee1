//! 类型模块：服务签名、调用参数与调用结果。
//!
//! # Types Module
//!
//! Value types shared by discovery and dispatch. Everything here is plain data:
//! the scanner produces [`SignatureModel`]s, the coercer turns payloads into
//! [`OrderedArgs`], and the dispatcher answers with an [`InvocationResult`].
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`TypeTag`] | Declared or inferred parameter type |
//! | [`ParameterSpec`] | Name, type and requirement of one parameter |
//! | [`SignatureModel`] | Immutable description of one service |
//! | [`UploadRef`] | Reference to file content owned by the upload collaborator |
//! | [`OrderedArgs`] | Coerced arguments in signature order |
//! | [`InvocationResult`] | Success value or typed dispatch failure |
//!
//! ## Example
//!
//! ```rust
//! use callgate::types::{ParameterSpec, SignatureModel, TypeTag};
//! use serde_json::json;
//!
//! let sig = SignatureModel::new("transcribe")
//!     .with_parameter(ParameterSpec::required("audio", TypeTag::Binary))
//!     .with_parameter(ParameterSpec::optional("language", TypeTag::String, json!("en")))
//!     .with_description("Transcribe an audio file");
//!
//! assert_eq!(sig.required_parameters().count(), 1);
//! assert_eq!(sig.to_json_schema()["required"], json!(["audio"]));
//! ```

pub mod args;
pub mod result;
pub mod signature;

pub use args::{OrderedArgs, UploadRef};
pub use result::InvocationResult;
pub use signature::{ParameterSpec, Requirement, SignatureModel, TypeTag};
