use parking_lot::Mutex;

use crate::types::{DataType, LinkType, ObjKey, TableKey};

/// Change-log sink.
///
/// The table layer calls these hooks synchronously, in call order, after
/// each structural mutation has been applied. The sink decides what to do
/// with them; the object store never reads anything back.
pub trait Replication: Send + Sync {
    /// A table was added to the group.
    fn insert_table(&self, table: TableKey, name: &str);
    /// A table was removed from the group.
    fn erase_table(&self, table: TableKey, name: &str);
    /// A public column was inserted.
    fn insert_column(
        &self,
        table: TableKey,
        col_ndx: usize,
        ty: DataType,
        name: &str,
        target: Option<TableKey>,
    );
    /// A public column was removed.
    fn erase_column(&self, table: TableKey, col_ndx: usize);
    /// A public column was renamed.
    fn rename_column(&self, table: TableKey, col_ndx: usize, name: &str);
    /// The ownership semantics of a link column changed.
    fn set_link_type(&self, table: TableKey, col_ndx: usize, link_type: LinkType);
    /// An object was created.
    fn create_object(&self, table: TableKey, key: ObjKey);
    /// An object was removed, explicitly or by cascade.
    fn remove_object(&self, table: TableKey, key: ObjKey);
}

/// Sink that ignores everything.
#[derive(Default)]
pub struct NoopReplication;

impl Replication for NoopReplication {
    fn insert_table(&self, _table: TableKey, _name: &str) {}
    fn erase_table(&self, _table: TableKey, _name: &str) {}
    fn insert_column(
        &self,
        _table: TableKey,
        _col_ndx: usize,
        _ty: DataType,
        _name: &str,
        _target: Option<TableKey>,
    ) {
    }
    fn erase_column(&self, _table: TableKey, _col_ndx: usize) {}
    fn rename_column(&self, _table: TableKey, _col_ndx: usize, _name: &str) {}
    fn set_link_type(&self, _table: TableKey, _col_ndx: usize, _link_type: LinkType) {}
    fn create_object(&self, _table: TableKey, _key: ObjKey) {}
    fn remove_object(&self, _table: TableKey, _key: ObjKey) {}
}

/// One recorded change-log entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    /// See [`Replication::insert_table`].
    InsertTable { table: TableKey, name: String },
    /// See [`Replication::erase_table`].
    EraseTable { table: TableKey, name: String },
    /// See [`Replication::insert_column`].
    InsertColumn {
        table: TableKey,
        col_ndx: usize,
        ty: DataType,
        name: String,
        target: Option<TableKey>,
    },
    /// See [`Replication::erase_column`].
    EraseColumn { table: TableKey, col_ndx: usize },
    /// See [`Replication::rename_column`].
    RenameColumn {
        table: TableKey,
        col_ndx: usize,
        name: String,
    },
    /// See [`Replication::set_link_type`].
    SetLinkType {
        table: TableKey,
        col_ndx: usize,
        link_type: LinkType,
    },
    /// See [`Replication::create_object`].
    CreateObject { table: TableKey, key: ObjKey },
    /// See [`Replication::remove_object`].
    RemoveObject { table: TableKey, key: ObjKey },
}

/// Sink that records every instruction in memory.
#[derive(Default)]
pub struct InstructionLog {
    entries: Mutex<Vec<Instruction>>,
}

impl InstructionLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the recorded instructions.
    pub fn entries(&self) -> Vec<Instruction> {
        self.entries.lock().clone()
    }

    /// Removes and returns the recorded instructions.
    pub fn take(&self) -> Vec<Instruction> {
        std::mem::take(&mut *self.entries.lock())
    }

    fn push(&self, instr: Instruction) {
        self.entries.lock().push(instr);
    }
}

impl Replication for InstructionLog {
    fn insert_table(&self, table: TableKey, name: &str) {
        self.push(Instruction::InsertTable {
            table,
            name: name.to_owned(),
        });
    }

    fn erase_table(&self, table: TableKey, name: &str) {
        self.push(Instruction::EraseTable {
            table,
            name: name.to_owned(),
        });
    }

    fn insert_column(
        &self,
        table: TableKey,
        col_ndx: usize,
        ty: DataType,
        name: &str,
        target: Option<TableKey>,
    ) {
        self.push(Instruction::InsertColumn {
            table,
            col_ndx,
            ty,
            name: name.to_owned(),
            target,
        });
    }

    fn erase_column(&self, table: TableKey, col_ndx: usize) {
        self.push(Instruction::EraseColumn { table, col_ndx });
    }

    fn rename_column(&self, table: TableKey, col_ndx: usize, name: &str) {
        self.push(Instruction::RenameColumn {
            table,
            col_ndx,
            name: name.to_owned(),
        });
    }

    fn set_link_type(&self, table: TableKey, col_ndx: usize, link_type: LinkType) {
        self.push(Instruction::SetLinkType {
            table,
            col_ndx,
            link_type,
        });
    }

    fn create_object(&self, table: TableKey, key: ObjKey) {
        self.push(Instruction::CreateObject { table, key });
    }

    fn remove_object(&self, table: TableKey, key: ObjKey) {
        self.push(Instruction::RemoveObject { table, key });
    }
}
