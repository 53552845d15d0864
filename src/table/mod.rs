//! Match-action table model: entry shape ([`entry`]), backend
//! abstraction ([`backend`]), and the per-table staging state machine
//! ([`staging`]).

pub mod backend;
pub mod entry;
pub mod staging;

pub use backend::{Obj, TableOps};
pub use entry::{
    ActionArgInfo, ActionDescriptor, FieldMatchType, MatchFieldInfo, MatchType, TableEntry,
    TableParams, key_equal,
};
pub use staging::{Table, TableState};
