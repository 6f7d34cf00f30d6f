use std::sync::Arc;

use crate::primitives::alloc::{Allocator, SlabAlloc};
use crate::types::{Result, TramaError};

use super::cluster::DEFAULT_MAX_CLUSTER_SIZE;
use super::metrics::{default_metrics, StorageMetrics};
use super::replication::{NoopReplication, Replication};

/// Configuration options supplied when creating a [`super::Group`].
#[derive(Clone)]
pub struct GroupOptions {
    /// Allocator backing committed table records and the global version.
    pub alloc: Arc<dyn Allocator>,
    /// Sink informed of every structural mutation, in call order.
    pub replication: Arc<dyn Replication>,
    /// Metrics collection implementation.
    pub metrics: Arc<dyn StorageMetrics>,
    /// Maximum number of objects per cluster leaf.
    pub max_cluster_size: usize,
    /// Whether version bumps propagate to tables reachable through link columns.
    pub propagate_versions: bool,
}

impl GroupOptions {
    /// Creates options with an in-memory allocator and no-op sinks.
    pub fn new() -> Self {
        Self {
            alloc: Arc::new(SlabAlloc::new()),
            replication: Arc::new(NoopReplication),
            metrics: default_metrics(),
            max_cluster_size: DEFAULT_MAX_CLUSTER_SIZE,
            propagate_versions: true,
        }
    }

    /// Sets the allocator.
    pub fn alloc(mut self, alloc: Arc<dyn Allocator>) -> Self {
        self.alloc = alloc;
        self
    }

    /// Sets the change-log sink.
    pub fn replication(mut self, replication: Arc<dyn Replication>) -> Self {
        self.replication = replication;
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn StorageMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sets the maximum cluster leaf size.
    pub fn max_cluster_size(mut self, size: usize) -> Self {
        self.max_cluster_size = size;
        self
    }

    /// Enables or disables version propagation along link columns.
    pub fn propagate_versions(mut self, enabled: bool) -> Self {
        self.propagate_versions = enabled;
        self
    }

    /// Validates all configuration parameters.
    pub fn validate(&self) -> Result<()> {
        if self.max_cluster_size < 2 {
            return Err(TramaError::Invalid("max_cluster_size must be >= 2"));
        }
        Ok(())
    }
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self::new()
    }
}
