//! Template resolution.
//!
//! # Algorithm
//!
//! ```text
//! names ──┬── codebook.* ──────────────▶ LocalTemplates (no network)
//!         ├── cached & unexpired ──────▶ value
//!         └── uncached ──▶ one batch call
//!                            ├─ ok ────▶ values; names missing from the reply stay unresolved
//!                            └─ failed ▶ one call per name
//! ```
//!
//! Failures never propagate: every name ends up as a [`Resolution`].
//! Names missing from a successful batch reply are not retried individually.

mod backend;
mod cache;
mod local;

pub use backend::{Backend, BackendError, HttpBackend};
pub use local::{LOCAL_PREFIX, LocalTemplates};

use crate::{config::BookConfig, log, vlog};
use anyhow::Result;
use cache::TtlCache;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

/// Where a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedValue {
    pub value: String,
    pub origin: Origin,
}

/// Outcome of resolving one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(ResolvedValue),
    /// The template is unknown or the backend answered with an error.
    Unresolved,
    /// The backend could not be reached.
    TransportError(String),
}

impl Resolution {
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Resolved(resolved) => Some(&resolved.value),
            _ => None,
        }
    }

    fn remote(value: String) -> Self {
        Self::Resolved(ResolvedValue {
            value,
            origin: Origin::Remote,
        })
    }
}

/// Resolves template names to values, owning the value cache.
pub struct TemplateResolver {
    backend: Box<dyn Backend>,
    local: LocalTemplates,
    cache: Mutex<TtlCache>,
    warned_unreachable: AtomicBool,
}

impl TemplateResolver {
    pub fn new(backend: Box<dyn Backend>, local: LocalTemplates, ttl: Duration) -> Self {
        Self {
            backend,
            local,
            cache: Mutex::new(TtlCache::new(ttl)),
            warned_unreachable: AtomicBool::new(false),
        }
    }

    /// Resolver talking to the configured HTTP backend.
    pub fn from_config(config: &BookConfig) -> Result<Self> {
        let backend = HttpBackend::new(&config.backend.url, config.backend.timeout())?;
        Ok(Self::new(
            Box::new(backend),
            LocalTemplates::new(&config.root),
            config.backend.cache_ttl(),
        ))
    }

    pub fn resolve(&self, name: &str) -> Resolution {
        let names = [name.to_owned()];
        self.resolve_batch(&names)
            .remove(name)
            .unwrap_or(Resolution::Unresolved)
    }

    /// Resolve every name. The returned map has an entry for each distinct name.
    pub fn resolve_batch(&self, names: &[String]) -> FxHashMap<String, Resolution> {
        let mut results = FxHashMap::default();
        let mut uncached: Vec<String> = Vec::new();

        {
            let now = Instant::now();
            let cache = self.cache.lock();
            for name in names {
                if results.contains_key(name) || uncached.contains(name) {
                    continue;
                }
                if LocalTemplates::is_local(name) {
                    let resolution = match self.local.resolve(name) {
                        Some(value) => Resolution::Resolved(ResolvedValue {
                            value,
                            origin: Origin::Local,
                        }),
                        None => Resolution::Unresolved,
                    };
                    results.insert(name.clone(), resolution);
                } else if let Some(value) = cache.get_at(name, now) {
                    vlog!("resolve"; "cache hit: {name}");
                    results.insert(name.clone(), Resolution::remote(value.to_owned()));
                } else {
                    uncached.push(name.clone());
                }
            }
        }

        if uncached.is_empty() {
            return results;
        }

        match self.backend.resolve_batch(&uncached) {
            Ok(mut values) => {
                for name in uncached {
                    let resolution = match values.remove(&name) {
                        Some(value) => {
                            self.remember(&name, &value);
                            Resolution::remote(value)
                        }
                        None => {
                            vlog!("resolve"; "{name}: missing from batch reply");
                            Resolution::Unresolved
                        }
                    };
                    results.insert(name, resolution);
                }
            }
            Err(e) => {
                vlog!("resolve"; "batch request failed ({e}), resolving individually");
                for name in uncached {
                    let resolution = self.resolve_individually(&name);
                    results.insert(name, resolution);
                }
            }
        }

        results
    }

    fn resolve_individually(&self, name: &str) -> Resolution {
        match self.backend.resolve(name) {
            Ok(value) => {
                self.remember(name, &value);
                Resolution::remote(value)
            }
            Err(BackendError::Transport(msg)) => {
                self.warn_unreachable(&msg);
                Resolution::TransportError(msg)
            }
            Err(e) => {
                log!("resolve"; "{name}: {e}");
                Resolution::Unresolved
            }
        }
    }

    fn remember(&self, name: &str, value: &str) {
        self.cache.lock().insert_at(name, value, Instant::now());
    }

    /// Warn about an unreachable backend once per resolver.
    fn warn_unreachable(&self, msg: &str) {
        if !self.warned_unreachable.swap(true, Ordering::Relaxed) {
            log!(
                "backend";
                "{} unreachable, remote templates left unchanged ({msg})",
                self.backend.describe()
            );
        }
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Drop expired cache entries.
    pub fn purge_expired(&self) {
        self.cache.lock().purge_at(Instant::now());
    }

    pub fn health(&self) -> Result<(), BackendError> {
        self.backend.health()
    }

    pub fn backend_name(&self) -> String {
        self.backend.describe()
    }
}
