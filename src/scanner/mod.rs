//! 能力扫描：遍历库成员并生成服务注册表。
//!
//! # Capability Scanner
//!
//! Walks a library through its [`Introspectable`] capability and turns every
//! public callable into a service descriptor.
//!
//! - Members whose name starts with `_` are private and skipped
//! - Namespaces are descended up to `max_depth` nested levels
//! - Members whose metadata cannot be read are still registered, with an open,
//!   all-`any` signature
//! - Members that cannot be bound are skipped but counted in the report
//! - Services are keyed by their fully qualified dotted path; a duplicate key
//!   keeps the first member and is recorded as a collision
//!
//! Only an unusable library handle fails the scan as a whole.

use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::coerce::coerce_value;
use crate::config::ScannerConfig;
use crate::introspect::{
    Introspectable, MemberKind, MemberMetadata, MemberPath, ParamKind,
};
use crate::registry::{ServiceDescriptor, ServiceRegistry};
use crate::types::{ParameterSpec, SignatureModel, TypeTag};
use crate::{Error, ErrorContext};

/// Registry build failed as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("library '{library}' is unavailable: {reason}")]
    LibraryUnavailable { library: String, reason: String },

    #[error("library manifest could not be loaded: {reason}")]
    Manifest { reason: String },
}

/// Counts and names collected during one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub library: String,
    /// Public callables encountered.
    pub discovered: usize,
    pub registered: usize,
    /// Registered with partial or no metadata.
    pub degraded: Vec<String>,
    pub skipped_private: usize,
    pub skipped_excluded: usize,
    /// Namespaces below `max_depth` that were not descended.
    pub skipped_nested: Vec<String>,
    /// Non-callable members (constants, types).
    pub non_callable: usize,
    pub unbindable: Vec<String>,
    pub failed_namespaces: Vec<String>,
    pub collisions: Vec<String>,
}

pub struct CapabilityScanner {
    config: ScannerConfig,
    exclude: Vec<Regex>,
}

impl CapabilityScanner {
    pub fn new(config: ScannerConfig) -> crate::Result<Self> {
        let exclude = config
            .exclude
            .iter()
            .enumerate()
            .map(|(i, pattern)| {
                Regex::new(pattern).map_err(|e| {
                    Error::configuration_with_context(
                        format!("invalid exclude pattern '{}'", pattern),
                        ErrorContext::new()
                            .with_field_path(format!("scanner.exclude[{}]", i))
                            .with_details(e.to_string())
                            .with_source("capability_scanner"),
                    )
                })
            })
            .collect::<crate::Result<Vec<_>>>()?;
        Ok(Self { config, exclude })
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Build a fresh registry from `library`.
    pub fn scan(&self, library: &dyn Introspectable) -> Result<ServiceRegistry, ScanError> {
        let root = MemberPath::root();
        let entries = library
            .list_members(&root)
            .map_err(|e| ScanError::LibraryUnavailable {
                library: library.name().to_string(),
                reason: e.to_string(),
            })?;

        let mut state = ScanState {
            services: BTreeMap::new(),
            report: ScanReport {
                library: library.name().to_string(),
                ..ScanReport::default()
            },
        };

        let mut pending = vec![(root, entries)];
        while let Some((namespace, entries)) = pending.pop() {
            for entry in entries {
                if entry.name.starts_with('_') {
                    state.report.skipped_private += 1;
                    continue;
                }
                let path = namespace.child(&entry.name);
                let qualified = path.qualified();
                if self.exclude.iter().any(|re| re.is_match(&qualified)) {
                    debug!(member = qualified.as_str(), "member excluded by pattern");
                    state.report.skipped_excluded += 1;
                    continue;
                }

                match entry.kind {
                    MemberKind::Attribute => state.report.non_callable += 1,
                    MemberKind::Namespace => {
                        if path.segments().len() > self.config.max_depth {
                            state.report.skipped_nested.push(qualified);
                            continue;
                        }
                        match library.list_members(&path) {
                            Ok(children) => pending.push((path, children)),
                            Err(e) => {
                                warn!(
                                    namespace = qualified.as_str(),
                                    error = %e,
                                    "namespace could not be listed; skipping"
                                );
                                state.report.failed_namespaces.push(qualified);
                            }
                        }
                    }
                    MemberKind::Callable => self.register(library, &path, &mut state),
                }
            }
        }

        let report = state.report;
        info!(
            library = report.library.as_str(),
            discovered = report.discovered,
            registered = report.registered,
            degraded = report.degraded.len(),
            unbindable = report.unbindable.len(),
            collisions = report.collisions.len(),
            "library scan complete"
        );
        Ok(ServiceRegistry::new(state.services, report))
    }

    fn register(&self, library: &dyn Introspectable, path: &MemberPath, state: &mut ScanState) {
        let qualified = path.qualified();
        state.report.discovered += 1;

        let handle = match library.bind(path) {
            Ok(h) => h,
            Err(e) => {
                debug!(member = qualified.as_str(), error = %e, "callable could not be bound");
                state.report.unbindable.push(qualified);
                return;
            }
        };

        let (signature, degraded) = match library.metadata(path) {
            Ok(meta) => self.build_signature(&qualified, meta),
            Err(e) => {
                debug!(
                    member = qualified.as_str(),
                    error = %e,
                    "no metadata; registering with open signature"
                );
                (SignatureModel::degraded(&qualified), true)
            }
        };

        if state.services.contains_key(&qualified) {
            warn!(
                service = qualified.as_str(),
                "duplicate service name; keeping first definition"
            );
            state.report.collisions.push(qualified);
            return;
        }

        if degraded {
            state.report.degraded.push(qualified.clone());
        }
        state.report.registered += 1;
        state.services.insert(
            qualified,
            Arc::new(ServiceDescriptor {
                signature: Arc::new(signature),
                handle,
                degraded,
            }),
        );
    }

    /// Build a signature from declared metadata; `true` when anything had to be guessed away.
    pub fn build_signature(&self, name: &str, meta: MemberMetadata) -> (SignatureModel, bool) {
        let mut degraded = false;
        let mut seen = HashSet::new();
        let mut sig = SignatureModel::new(name);

        for param in meta.params {
            if param.kind == ParamKind::Variadic {
                continue;
            }
            if !seen.insert(param.name.clone()) {
                degraded = true;
                continue;
            }

            let declared = param.annotation.as_deref().and_then(TypeTag::from_annotation);
            let mut tag = declared
                .or_else(|| {
                    param
                        .default
                        .as_ref()
                        .filter(|v| !v.is_null())
                        .map(TypeTag::infer_from_value)
                })
                .unwrap_or(TypeTag::Any);

            let spec = match param.default {
                None => ParameterSpec::required(param.name, tag),
                Some(default) if default.is_null() => {
                    ParameterSpec::optional(param.name, tag, default)
                }
                Some(default) => match coerce_value(&param.name, tag, &default) {
                    Ok(coerced) => ParameterSpec::optional(param.name, tag, coerced),
                    Err(_) => {
                        debug!(
                            service = name,
                            parameter = param.name.as_str(),
                            declared = %tag,
                            "default does not match declared type; widening to any"
                        );
                        tag = TypeTag::Any;
                        degraded = true;
                        ParameterSpec::optional(param.name, tag, default)
                    }
                },
            };
            sig = sig.with_parameter(spec);
        }

        let returns = meta
            .returns
            .as_deref()
            .and_then(TypeTag::from_annotation)
            .unwrap_or(TypeTag::Any);
        let description = meta
            .doc
            .as_deref()
            .map(|doc| summarize_doc(doc, self.config.max_description_len))
            .unwrap_or_default();

        (sig.with_returns(returns).with_description(description), degraded)
    }
}

struct ScanState {
    services: BTreeMap<String, Arc<ServiceDescriptor>>,
    report: ScanReport,
}

/// First non-empty line of `doc`, trimmed and cut to `max_chars` characters.
pub fn summarize_doc(doc: &str, max_chars: usize) -> String {
    let line = doc
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    line.chars().take(max_chars).collect()
}
