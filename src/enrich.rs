//! Workload metadata lookup keyed by mount namespace id
//!
//! The tracer only sees the narrow [`Enricher`] interface. [`NamespaceCache`]
//! is a concurrent implementation that something else (a container runtime
//! watcher, a test) keeps populated.

use crate::event::CommonData;
use dashmap::DashMap;
use std::sync::Arc;

pub trait Enricher: Send + Sync {
    /// Fill in workload fields for the given mount namespace
    fn enrich(&self, common: &mut CommonData, mntns_id: u64);
}

impl<T: Enricher + ?Sized> Enricher for Arc<T> {
    fn enrich(&self, common: &mut CommonData, mntns_id: u64) {
        (**self).enrich(common, mntns_id)
    }
}

/// Metadata about the container owning a mount namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMetadata {
    pub node: String,
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

/// Thread-safe cache mapping mount namespace ids to container metadata
#[derive(Clone, Default)]
pub struct NamespaceCache {
    inner: Arc<DashMap<u64, ContainerMetadata>>,
}

impl NamespaceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a mapping
    pub fn insert(&self, mntns_id: u64, metadata: ContainerMetadata) {
        self.inner.insert(mntns_id, metadata);
    }

    pub fn get(&self, mntns_id: u64) -> Option<ContainerMetadata> {
        self.inner.get(&mntns_id).map(|r| r.clone())
    }

    pub fn remove(&self, mntns_id: u64) -> Option<ContainerMetadata> {
        self.inner.remove(&mntns_id).map(|(_, v)| v)
    }

    /// Drop every namespace belonging to a pod
    pub fn remove_pod(&self, namespace: &str, pod: &str) {
        self.inner
            .retain(|_, v| !(v.namespace == namespace && v.pod == pod));
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Enricher for NamespaceCache {
    fn enrich(&self, common: &mut CommonData, mntns_id: u64) {
        // unknown namespaces (host processes, short-lived containers) stay bare
        if let Some(entry) = self.inner.get(&mntns_id) {
            common.node.clone_from(&entry.node);
            common.namespace.clone_from(&entry.namespace);
            common.pod.clone_from(&entry.pod);
            common.container.clone_from(&entry.container);
        }
    }
}
