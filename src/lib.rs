//! IOVA range allocation and a transactional control plane for a
//! match-action pipeline's data-plane tables.
//!
//! [`iova`] is a standalone first-fit allocator with no dependency on
//! the rest of the crate. [`table`], [`commit`], [`controller`], and
//! [`codec`] together form the control plane: per-table staging sets,
//! the six-phase commit engine that swaps live state under a running
//! dataplane, the controller that ties tables and actions together, and
//! the line-oriented entry text format used to read and dump entries.

pub mod codec;
pub mod commit;
pub mod controller;
pub mod error;
pub mod iova;
pub mod table;

pub use commit::{CommitEngine, QuiescencePolicy, SleepGrace};
pub use controller::{PipelineController, PipelineSpec, TableSpec};
pub use error::{CtlError, Result};
pub use iova::{Iova, IovaAllocator, BAD_IOVA};
