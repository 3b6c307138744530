//! Typed error hierarchy for the board reconciliation engine.
//!
//! The taxonomy matters operationally:
//! - `SchemaLookup` / `UnknownRemoteId`: the remote board does not match the
//!   schema this tool was built for. Fatal; continuing would corrupt every
//!   later reconciliation decision.
//! - `MissingExternalRef`: one task's data is broken. Fatal for that task
//!   only; sibling tasks keep processing.
//! - Remote call failures stay as `anyhow::Error` context chains and are
//!   isolated to the field/task/link being mutated, never retried.
//!
//! A lookup *miss* (no task for an issue number) is not an error at all;
//! collection getters return `Option` for that case.

use thiserror::Error;

/// Errors from loading and translating board state.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("{kind} '{name}' does not exist in the remote project schema")]
    SchemaLookup { kind: &'static str, name: String },

    #[error("remote {kind} id {id} is not known to the schema index")]
    UnknownRemoteId { kind: &'static str, id: i64 },

    #[error("task {task_id} has no external link matching an issue or merge request URL ({urls:?})")]
    MissingExternalRef { task_id: i64, urls: Vec<String> },

    #[error("remote task creation returned no task id")]
    CreateFailed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One isolated failure during batch reconciliation: which task, which
/// field, and what the remote said. Collected into the run report instead
/// of aborting sibling work.
#[derive(Debug)]
pub struct FieldFailure {
    pub task_id: i64,
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for FieldFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "task {} field '{}': {}",
            self.task_id, self.field, self.message
        )
    }
}
