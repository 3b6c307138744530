//! Idempotent creation of typed relations between two tasks.

use anyhow::Result;
use tracing::{info, warn};

use crate::kanban::KanbanApi;
use crate::schema::{LinkKind, SchemaIndex};
use crate::task::Task;

/// Create a typed link from `a` to `b` unless one already exists.
///
/// Returns `Ok(true)` only when a link was actually created. A self-link
/// is always a caller bug and is rejected without a remote call. Any
/// existing link between the pair, regardless of kind, suppresses
/// creation.
///
/// Caller must refresh `a`'s internal links before calling, or the
/// duplicate check runs against stale state.
pub async fn add_link(
    api: &dyn KanbanApi,
    schema: &SchemaIndex,
    a: &Task,
    b: &Task,
    kind: LinkKind,
    dry_run: bool,
) -> Result<bool> {
    if a.id() == b.id() {
        warn!(
            task_id = a.id(),
            kind = kind.as_str(),
            "refusing to self-link task"
        );
        return Ok(false);
    }

    let existing: Vec<&str> = a
        .internal_links
        .iter()
        .filter(|link| link.other_task_id == b.id())
        .map(|link| link.label.as_str())
        .collect();
    if !existing.is_empty() {
        info!(
            from = a.id(),
            to = b.id(),
            existing = ?existing,
            "link already present, skipping creation"
        );
        return Ok(false);
    }

    let link_type_id = schema.link_type_id(kind)?;
    if dry_run {
        info!(
            from = a.id(),
            to = b.id(),
            kind = kind.as_str(),
            "dry run: would create link"
        );
        return Ok(false);
    }

    api.create_internal_link(a.id(), b.id(), link_type_id).await?;
    info!(from = a.id(), to = b.id(), kind = kind.as_str(), "created link");
    Ok(true)
}
