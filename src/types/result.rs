//! Dispatch outcome

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error_code::{DispatchError, ErrorKind};

/// Outcome of one dispatch: exactly one of success or a typed failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum InvocationResult {
    Success(Value),
    Failure(DispatchError),
}

impl InvocationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Success(v) => Some(v),
            Self::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&DispatchError> {
        match self {
            Self::Success(_) => None,
            Self::Failure(e) => Some(e),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(|e| e.kind)
    }

    pub fn into_result(self) -> Result<Value, DispatchError> {
        self.into()
    }
}

impl From<Result<Value, DispatchError>> for InvocationResult {
    fn from(r: Result<Value, DispatchError>) -> Self {
        match r {
            Ok(v) => Self::Success(v),
            Err(e) => Self::Failure(e),
        }
    }
}

impl From<InvocationResult> for Result<Value, DispatchError> {
    fn from(r: InvocationResult) -> Self {
        match r {
            InvocationResult::Success(v) => Ok(v),
            InvocationResult::Failure(e) => Err(e),
        }
    }
}
