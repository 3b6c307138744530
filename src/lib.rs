//! Reconciles a standards working group's kanban workboard with issue and
//! merge-request activity on the group's forge.
//!
//! The board is the source of truth for workflow position (column,
//! swimlane) and the forge is the source of truth for everything derived
//! from review activity: titles, categories, tag-backed flags, owners.
//! One reconciliation run fetches both sides, computes per-field updates,
//! and applies them with per-task failure isolation.

pub mod actions;
pub mod collection;
pub mod errors;
pub mod forge;
pub mod kanban;
pub mod links;
pub mod reconcile;
pub mod schema;
pub mod task;

#[cfg(test)]
pub(crate) mod testutil;
