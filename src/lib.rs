//! Embedded object store with typed tables, stable object keys and a
//! bidirectional link graph.
//!
//! Tables live in a [`Group`]. Objects are addressed by [`ObjKey`] and stored
//! in a cluster tree per table. Link columns are paired with hidden backlink
//! columns in the target table; removing an object nullifies every link into
//! it, and strong links remove their targets once the last owner lets go.
//! Handles ([`TableRef`], [`Obj`], [`ColumnRef`]) detach when the storage they
//! point at goes away.

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod primitives;
pub mod storage;
pub mod types;

pub use error::{Result, TramaError};
pub use primitives::alloc::{Allocator, Ref, SlabAlloc};
pub use storage::{
    ColumnRef, CounterMetrics, Group, GroupOptions, Instruction, InstructionLog, NoopMetrics,
    NoopReplication, Obj, Replication, StorageMetrics, TableIter, TableRef,
};
pub use types::{ColKey, DataType, LinkType, ObjKey, TableKey, Timestamp, Value};
