//! Table backend abstraction.
//!
//! A concrete match-table implementation (hash table, trie, wildcard
//! classifier, ...) is out of scope for this crate; it is treated as an
//! opaque operations interface the commit engine drives.
//!
//! The original C interface (`rte_swx_table_ops`) expresses optional
//! incremental support as a nullable function pointer pair (`add`/`del`).
//! Rust traits have no per-instance optional methods, so incremental
//! support is instead signaled by the const [`TableOps::INCREMENTAL`];
//! a backend that leaves `add`/`del` at their default (erroring)
//! implementation must also leave `INCREMENTAL` at `false`.

use std::any::Any;

use super::entry::{TableEntry, TableParams};
use crate::error::{CtlError, Result};

/// The opaque per-table dataplane object a backend produces. Boxed as
/// `dyn Any` since different tables may be served by entirely different
/// backend implementations.
pub type Obj = Box<dyn Any + Send>;

/// Operations a concrete table kind exposes to the commit engine.
pub trait TableOps: Send + Sync {
    /// Whether this backend supports incremental `add`/`del` mutation of
    /// an existing object. Backends that answer `false` must be driven
    /// exclusively through `create`.
    const INCREMENTAL: bool = false;

    /// Object-safe mirror of [`TableOps::INCREMENTAL`], since a trait
    /// object has no way to name an associated const of its concrete
    /// type directly.
    fn is_incremental(&self) -> bool {
        Self::INCREMENTAL
    }

    /// Builds a fresh backend object from a complete list of entries.
    /// Called for initial table-state construction and, for
    /// non-incremental backends, on every commit with pending work.
    fn create(
        &self,
        params: &TableParams,
        entries: &[TableEntry],
        args: &str,
        numa_node: i32,
    ) -> Option<Obj>;

    /// Releases a backend object. Invoked exactly once per object that
    /// becomes unreachable (superseded or rolled back).
    fn free(&self, obj: Obj);

    /// Adds or overwrites `entry`'s key in `obj`. Only called when
    /// `INCREMENTAL` is `true`.
    fn add(&self, _obj: &mut Obj, _entry: &TableEntry) -> Result<()> {
        Err(CtlError::backend("<incremental-unsupported>", "add not implemented"))
    }

    /// Removes `entry`'s key from `obj`. Only called when `INCREMENTAL`
    /// is `true`.
    fn del(&self, _obj: &mut Obj, _entry: &TableEntry) -> Result<()> {
        Err(CtlError::backend("<incremental-unsupported>", "del not implemented"))
    }
}

/// An in-memory reference backend used by the test suite and as a worked
/// example of the [`TableOps`] interface. Carries no production behavior.
pub mod memory {
    use super::*;

    /// The object a [`MemoryTableOps`] table produces: a flat list of
    /// entries, rebuilt wholesale on every `create`.
    #[derive(Debug, Default)]
    pub struct MemoryTable {
        pub entries: Vec<TableEntry>,
    }

    /// Non-incremental reference backend: every commit with pending work
    /// rebuilds the object from scratch via `create`.
    #[derive(Debug, Default)]
    pub struct MemoryTableOps;

    impl TableOps for MemoryTableOps {
        const INCREMENTAL: bool = false;

        fn create(
            &self,
            _params: &TableParams,
            entries: &[TableEntry],
            _args: &str,
            _numa_node: i32,
        ) -> Option<Obj> {
            Some(Box::new(MemoryTable {
                entries: entries.to_vec(),
            }))
        }

        fn free(&self, _obj: Obj) {}
    }

    /// Incremental reference backend: mutates the live object in place.
    #[derive(Debug, Default)]
    pub struct MemoryTableOpsIncremental;

    impl TableOps for MemoryTableOpsIncremental {
        const INCREMENTAL: bool = true;

        fn create(
            &self,
            _params: &TableParams,
            entries: &[TableEntry],
            _args: &str,
            _numa_node: i32,
        ) -> Option<Obj> {
            Some(Box::new(MemoryTable {
                entries: entries.to_vec(),
            }))
        }

        fn free(&self, _obj: Obj) {}

        fn add(&self, obj: &mut Obj, entry: &TableEntry) -> Result<()> {
            let table = obj
                .downcast_mut::<MemoryTable>()
                .expect("MemoryTableOpsIncremental always produces MemoryTable objects");
            table.entries.retain(|e| e.key != entry.key);
            table.entries.push(entry.clone());
            Ok(())
        }

        fn del(&self, obj: &mut Obj, entry: &TableEntry) -> Result<()> {
            let table = obj
                .downcast_mut::<MemoryTable>()
                .expect("MemoryTableOpsIncremental always produces MemoryTable objects");
            table.entries.retain(|e| e.key != entry.key);
            Ok(())
        }
    }
}
