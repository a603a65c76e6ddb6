//! Copy-and-swap reindexing.
//!
//! A reindex walks `Initial -> Prepared -> Reindexing -> Completed|Failed ->
//! Finalized`. On failure the destination is removed and the source is left
//! untouched; on success of a `reindex_with_delete` the source is deleted and
//! its aliases move to the destination in a single atomic alias update.

pub mod naming;
pub mod orchestrator;
pub mod registry;
pub mod types;

pub use naming::next_reindexed_name;
pub use orchestrator::{task_status, Reindexer, TaskStatus};
pub use registry::TaskRegistry;
pub use types::{
    ReindexAction, ReindexConfig, ReindexOperation, ReindexOutcome, ReindexState, TaskTicket,
};
