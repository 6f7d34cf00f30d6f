//! Object storage: column layout, cluster trees, tables, the link graph and
//! the handles that reach into them.

/// Sorted and unsorted key sequences used by link and backlink columns.
pub mod key_column;

/// Per-leaf column storage.
pub mod column;

/// Table schema: public columns followed by hidden backlink columns.
pub mod spec;

/// Key-ordered object store built from bounded leaves.
pub mod cluster;

/// Handles bound to tables, objects and columns.
pub mod accessor;

/// The table container, transactions and accessor refresh.
pub mod group;

/// Change-log sink for structural mutations.
pub mod replication;

mod metrics;
mod options;
pub(crate) mod table;

pub use accessor::{ColumnRef, Obj, TableIter, TableRef};
pub use column::{ColumnData, ColumnValue};
pub use group::Group;
pub use metrics::{default_metrics, CounterMetrics, NoopMetrics, StorageMetrics};
pub use options::GroupOptions;
pub use replication::{Instruction, InstructionLog, NoopReplication, Replication};
pub use spec::{ColumnSpec, LinkPeer, Spec, MAX_NAME_LEN};
