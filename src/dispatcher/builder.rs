use std::sync::Arc;
use tracing::info;

use super::Dispatcher;
use crate::config::GatewayConfig;
use crate::introspect::Introspectable;
use crate::registry::RegistryHandle;
use crate::scanner::CapabilityScanner;
use crate::{Error, ErrorContext, Result};

/// Builder for [`Dispatcher`].
///
/// Building runs the first scan; a library that cannot be scanned at all
/// fails the build with [`Error::Scan`].
#[derive(Default)]
pub struct DispatcherBuilder {
    library: Option<Arc<dyn Introspectable>>,
    config: GatewayConfig,
    env_overrides: bool,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn library<L: Introspectable + 'static>(mut self, library: L) -> Self {
        self.library = Some(Arc::new(library));
        self
    }

    pub fn shared_library(mut self, library: Arc<dyn Introspectable>) -> Self {
        self.library = Some(library);
        self
    }

    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Apply `CALLGATE_*` environment variables on top of the config at build time.
    pub fn with_env_overrides(mut self) -> Self {
        self.env_overrides = true;
        self
    }

    pub fn build(self) -> Result<Dispatcher> {
        let library = self.library.ok_or_else(|| {
            Error::configuration_with_context(
                "no library to dispatch to",
                ErrorContext::new().with_source("dispatcher_builder"),
            )
        })?;
        let mut config = self.config;
        if self.env_overrides {
            config.apply_env_overrides()?;
        }
        config.validate()?;

        let scanner = CapabilityScanner::new(config.scanner.clone())?;
        let registry = RegistryHandle::new(scanner.scan(library.as_ref())?);
        let current = registry.load();
        info!(
            library = library.name(),
            services = current.len(),
            degraded = current.report().degraded.len(),
            pool_scope = ?config.resilience.pool_scope,
            "dispatcher ready"
        );
        Ok(Dispatcher::assemble(library, scanner, config, registry))
    }
}
