use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking object-store operations.
///
/// Implementations collect statistics about object creation and removal,
/// cascade removals, broken links and accessor detachment. The callbacks are
/// invoked synchronously on the mutating path, so they must be cheap.
pub trait StorageMetrics: Send + Sync {
    /// Records the creation of an object.
    fn object_created(&self);

    /// Records the removal of an object, explicit or cascaded.
    fn object_removed(&self);

    /// Records an object removed because it lost its last strong link.
    fn cascade_removed(&self);

    /// Records a broken link.
    ///
    /// # Parameters
    /// * `strong` - Whether the broken link carried ownership.
    fn link_broken(&self, strong: bool);

    /// Records a table, row or column accessor moving to the detached state.
    fn accessor_detached(&self);
}

/// A no-op implementation of [`StorageMetrics`] that discards everything.
#[derive(Default)]
pub struct NoopMetrics;

impl StorageMetrics for NoopMetrics {
    fn object_created(&self) {}
    fn object_removed(&self) {}
    fn cascade_removed(&self) {}
    fn link_broken(&self, _strong: bool) {}
    fn accessor_detached(&self) {}
}

/// A thread-safe counter-based implementation of [`StorageMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Number of objects created.
    pub objects_created: AtomicU64,

    /// Number of objects removed, cascaded removals included.
    pub objects_removed: AtomicU64,

    /// Number of objects removed by cascade.
    pub cascade_removals: AtomicU64,

    /// Number of broken strong links.
    pub strong_links_broken: AtomicU64,

    /// Number of broken weak links.
    pub weak_links_broken: AtomicU64,

    /// Number of accessors detached.
    pub accessors_detached: AtomicU64,
}

impl CounterMetrics {
    /// Reads a counter with relaxed ordering.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

impl StorageMetrics for CounterMetrics {
    fn object_created(&self) {
        self.objects_created.fetch_add(1, Ordering::Relaxed);
    }

    fn object_removed(&self) {
        self.objects_removed.fetch_add(1, Ordering::Relaxed);
    }

    fn cascade_removed(&self) {
        self.cascade_removals.fetch_add(1, Ordering::Relaxed);
    }

    fn link_broken(&self, strong: bool) {
        if strong {
            self.strong_links_broken.fetch_add(1, Ordering::Relaxed);
        } else {
            self.weak_links_broken.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn accessor_detached(&self) {
        self.accessors_detached.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
///
/// The default implementation is [`NoopMetrics`], which discards all
/// recorded metrics.
pub fn default_metrics() -> Arc<dyn StorageMetrics> {
    Arc::new(NoopMetrics)
}
