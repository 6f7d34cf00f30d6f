//! Low-level primitives the storage layer is built on.

/// Allocator capability: block allocation, address translation and the
/// global version counter.
///
/// The object store never owns raw memory itself; committed table records are
/// written through this interface.
pub mod alloc;
