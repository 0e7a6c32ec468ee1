//! 服务注册表：不可变快照，刷新时整体原子替换
//!
//! Service registry produced by a scan. A registry is never mutated after
//! construction; [`RegistryHandle`] swaps whole snapshots so a reader sees
//! either the old registry or the new one, never a mix.

use arc_swap::ArcSwap;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::introspect::InvocationHandle;
use crate::scanner::ScanReport;
use crate::types::SignatureModel;

/// Discovered signature plus bound invocation handle.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub signature: Arc<SignatureModel>,
    pub handle: InvocationHandle,
    /// Registered with partial or missing metadata.
    pub degraded: bool,
}

/// Immutable mapping of qualified service name to descriptor.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, Arc<ServiceDescriptor>>,
    report: ScanReport,
    generation: u64,
}

impl ServiceRegistry {
    pub fn new(services: BTreeMap<String, Arc<ServiceDescriptor>>, report: ScanReport) -> Self {
        Self {
            services,
            report,
            generation: 0,
        }
    }

    /// Empty registry, used before the first successful scan.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ServiceDescriptor>> {
        self.services.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<ServiceDescriptor>)> {
        self.services.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn signatures(&self) -> impl Iterator<Item = &SignatureModel> {
        self.services.values().map(|d| d.signature.as_ref())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn report(&self) -> &ScanReport {
        &self.report
    }

    /// Monotonic version; 0 until installed in a [`RegistryHandle`].
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Atomically swappable holder of the current registry.
pub struct RegistryHandle {
    current: ArcSwap<ServiceRegistry>,
    // serializes installs so generations stay unique; readers never take it
    writer: Mutex<()>,
}

impl RegistryHandle {
    pub fn new(initial: ServiceRegistry) -> Self {
        let handle = Self::default();
        handle.install(initial);
        handle
    }

    /// Snapshot of the current registry. Holders keep their snapshot alive
    /// across a concurrent swap.
    pub fn load(&self) -> Arc<ServiceRegistry> {
        self.current.load_full()
    }

    /// Replace the registry wholesale and return the installed snapshot.
    pub fn install(&self, mut next: ServiceRegistry) -> Arc<ServiceRegistry> {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let previous = self.current.load();
        next.generation = previous.generation + 1;
        let next = Arc::new(next);
        self.current.store(Arc::clone(&next));
        info!(
            generation = next.generation,
            services = next.len(),
            previous_services = previous.len(),
            "service registry installed"
        );
        next
    }
}

impl Default for RegistryHandle {
    fn default() -> Self {
        Self {
            current: ArcSwap::from_pointee(ServiceRegistry::empty()),
            writer: Mutex::new(()),
        }
    }
}
