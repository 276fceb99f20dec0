//! Tracer configuration
//!
//! Built once by the owner and handed to [`crate::tracer::Tracer::new`]; the
//! tracer keeps its own copy, so nothing can change it while running.

use crate::ebpf::PinnedMap;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_MIN_LATENCY_MS: u64 = 10;
pub const DEFAULT_PERF_BUFFER_PAGES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Pinned `mount_ns_filter` map restricting tracing to a set of mount namespaces
    #[serde(default)]
    pub mntns_filter: Option<PinnedMap>,

    /// Filesystem kind, required by fsslower
    #[serde(default)]
    pub backend: Option<String>,

    /// Operations faster than this are not reported by fsslower
    #[serde(default = "default_min_latency_ms")]
    pub min_latency_ms: u64,

    /// Per-CPU perf buffer size in pages
    #[serde(default = "default_perf_buffer_pages")]
    pub perf_buffer_pages: usize,
}

fn default_min_latency_ms() -> u64 {
    DEFAULT_MIN_LATENCY_MS
}

fn default_perf_buffer_pages() -> usize {
    DEFAULT_PERF_BUFFER_PAGES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mntns_filter: None,
            backend: None,
            min_latency_ms: DEFAULT_MIN_LATENCY_MS,
            perf_buffer_pages: DEFAULT_PERF_BUFFER_PAGES,
        }
    }
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn with_min_latency_ms(mut self, min_latency_ms: u64) -> Self {
        self.min_latency_ms = min_latency_ms;
        self
    }

    pub fn with_mntns_filter(mut self, filter: PinnedMap) -> Self {
        self.mntns_filter = Some(filter);
        self
    }

    /// Checks that hold for every gadget; gadget-specific fields are
    /// checked by the gadget itself
    pub fn validate(&self) -> Result<()> {
        if !self.perf_buffer_pages.is_power_of_two() {
            return Err(Error::ConfigError(format!(
                "perf_buffer_pages must be a non-zero power of two, got {}",
                self.perf_buffer_pages
            )));
        }
        if let Some(filter) = &self.mntns_filter {
            if filter.pin_dir().is_none() || filter.pin_name().is_none() {
                return Err(Error::ConfigError(format!(
                    "mntns_filter {} is not a pinned map path",
                    filter.path().display()
                )));
            }
        }
        Ok(())
    }

    /// The backend, or a configuration error naming the gadget that needs it
    pub fn require_backend(&self, gadget: &str) -> Result<&str> {
        self.backend
            .as_deref()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| Error::ConfigError(format!("{} requires a backend", gadget)))
    }
}
