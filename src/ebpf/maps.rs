use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A map owned by another component and pinned on bpffs
///
/// Used as the opaque namespace filter handle: whoever maintains the set of
/// mount namespaces to trace pins it, and the tracer reuses it in place of
/// the program's own `mount_ns_filter` map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PinnedMap {
    path: PathBuf,
}

impl PinnedMap {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory the map is pinned in
    pub fn pin_dir(&self) -> Option<&Path> {
        self.path.parent()
    }

    /// Name the map is pinned under
    pub fn pin_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

/// Program map name -> externally owned map to use instead
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapReplacements {
    inner: BTreeMap<&'static str, PinnedMap>,
}

impl MapReplacements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, map: &'static str, pinned: PinnedMap) -> Option<PinnedMap> {
        self.inner.insert(map, pinned)
    }

    pub fn get(&self, map: &str) -> Option<&PinnedMap> {
        self.inner.get(map)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &PinnedMap)> {
        self.inner.iter().map(|(name, pinned)| (*name, pinned))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
