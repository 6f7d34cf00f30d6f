use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Opaque address of a block handed out by an [`Allocator`]. Zero is the null ref.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize)]
pub struct Ref(pub u64);

impl Ref {
    /// The null address.
    pub const NULL: Ref = Ref(0);

    /// True for the null address.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Storage allocator consumed by the table layer.
///
/// Besides block management it owns the process-wide version counter that
/// table versions are derived from.
pub trait Allocator: Send + Sync {
    /// Stores `bytes` in a fresh block and returns its address.
    fn alloc(&self, bytes: Vec<u8>) -> Ref;

    /// Resolves an address to the bytes stored there.
    fn translate(&self, r: Ref) -> Option<Arc<[u8]>>;

    /// Releases a block. Freeing the null ref is a no-op.
    fn free(&self, r: Ref);

    /// Advances the global version and returns the new value.
    fn bump_global_version(&self) -> u64;

    /// Current global version.
    fn global_version(&self) -> u64;

    /// Reports whether a table whose version is `local` still has to
    /// propagate the latest bump. When it does, `local` is brought up to date.
    fn should_propagate_version(&self, local: &mut u64) -> bool {
        let global = self.global_version();
        if *local != global {
            *local = global;
            true
        } else {
            false
        }
    }
}

/// In-memory allocator backed by a hash map of immutable blocks.
pub struct SlabAlloc {
    blocks: Mutex<FxHashMap<u64, Arc<[u8]>>>,
    next_ref: AtomicU64,
    version: AtomicU64,
}

impl SlabAlloc {
    /// Creates an empty allocator with global version zero.
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(FxHashMap::default()),
            next_ref: AtomicU64::new(1),
            version: AtomicU64::new(0),
        }
    }

    /// Number of blocks currently allocated.
    pub fn live_blocks(&self) -> usize {
        self.blocks.lock().len()
    }
}

impl Default for SlabAlloc {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for SlabAlloc {
    fn alloc(&self, bytes: Vec<u8>) -> Ref {
        let id = self.next_ref.fetch_add(1, Ordering::Relaxed);
        trace!(block = id, len = bytes.len(), "alloc.block");
        self.blocks.lock().insert(id, Arc::from(bytes));
        Ref(id)
    }

    fn translate(&self, r: Ref) -> Option<Arc<[u8]>> {
        if r.is_null() {
            return None;
        }
        self.blocks.lock().get(&r.0).cloned()
    }

    fn free(&self, r: Ref) {
        if r.is_null() {
            return;
        }
        let removed = self.blocks.lock().remove(&r.0);
        debug_assert!(removed.is_some(), "double free of block {}", r.0);
    }

    fn bump_global_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn global_version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}
