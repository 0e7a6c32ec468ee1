use crate::scanner::ScanError;
use thiserror::Error;

/// Where a configuration or build failure came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Offending key, e.g. `resilience.pool_size` or `services.echo.retry_max_attempts`.
    pub field_path: Option<String>,
    /// Rejected value or accepted range.
    pub details: Option<String>,
    /// Component that raised it (`config_loader`, `dispatcher_builder`, ...).
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    fn is_empty(&self) -> bool {
        self.field_path.is_none() && self.details.is_none() && self.source.is_none()
    }
}

/// Crate-level error for everything outside the per-request dispatch path.
///
/// Dispatch itself never returns this type: every dispatch exit is a typed
/// [`crate::InvocationResult`]. This covers configuration loading, building a
/// dispatcher and refreshing the registry.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Configuration error: {message}{}", render_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn render_context(ctx: &ErrorContext) -> String {
    if ctx.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = [
        ("field", &ctx.field_path),
        ("details", &ctx.details),
        ("source", &ctx.source),
    ]
    .into_iter()
    .filter_map(|(label, value)| value.as_ref().map(|v| format!("{}: {}", label, v)))
    .collect();
    format!(" ({})", parts.join(", "))
}

impl Error {
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display_includes_context() {
        let err = Error::configuration_with_context(
            "pool_size must be at least 1",
            ErrorContext::new()
                .with_field_path("resilience.pool_size")
                .with_source("config_validator"),
        );
        assert_eq!(
            err.to_string(),
            "Configuration error: pool_size must be at least 1 \
             (field: resilience.pool_size, source: config_validator)"
        );
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("resilience.pool_size")
        );
    }

    #[test]
    fn test_context_free_display() {
        let err = Error::configuration_with_context("no library", ErrorContext::new());
        assert_eq!(err.to_string(), "Configuration error: no library");
    }

    #[test]
    fn test_scan_error_converts() {
        let err: Error = ScanError::LibraryUnavailable {
            library: "demo".into(),
            reason: "not loaded".into(),
        }
        .into();
        assert!(matches!(err, Error::Scan(_)));
        assert!(err.context().is_none());
    }
}
