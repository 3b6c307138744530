//! Task model: decoding board records and hydrating the derived fields.
//!
//! A task comes out of the bulk listing with only its cheap fields
//! ([`TaskBase`]). Hydration issues the three auxiliary fetches (external
//! links, tags, internal links) concurrently and produces a [`Task`],
//! which is not mutated afterwards except through
//! [`Task::refresh_internal_links`].

use anyhow::Result;
use tracing::debug;

use crate::errors::BoardError;
use crate::forge::{RefPatterns, WorkItemRef, labels};
use crate::kanban::{KanbanApi, TaskCreateRequest, TaskId, TaskRecord};
use crate::schema::{Category, Column, LinkKind, SchemaIndex, Swimlane, TaskTag};

/// Booleans derived from presence/absence of the recognized tags.
///
/// `blocked_on_spec` and `contractor_reviewed` are only ever set by hand
/// on the board; the rest track forge labels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFlags {
    pub blocked_on_spec: bool,
    pub contractor_reviewed: bool,
    pub api_frozen: bool,
    pub spec_review_complete: bool,
    pub design_review_complete: bool,
    pub needs_author_action: bool,
}

impl TaskFlags {
    /// Project a tag-name set onto flags. Unrecognized tags are ignored.
    pub fn from_tags<S: AsRef<str>>(tags: &[S]) -> Self {
        let mut flags = TaskFlags::default();
        for tag in tags {
            match TaskTag::from_name(tag.as_ref()) {
                Some(TaskTag::BlockedOnSpec) => flags.blocked_on_spec = true,
                Some(TaskTag::ContractorReviewed) => flags.contractor_reviewed = true,
                Some(TaskTag::ApiFrozen) => flags.api_frozen = true,
                Some(TaskTag::InitialSpecReviewComplete) => flags.spec_review_complete = true,
                Some(TaskTag::InitialDesignReviewComplete) => flags.design_review_complete = true,
                Some(TaskTag::NeedsAuthorAction) => flags.needs_author_action = true,
                None => {}
            }
        }
        flags
    }

    pub fn to_tags(self) -> Vec<TaskTag> {
        let mut tags = Vec::new();
        if self.blocked_on_spec {
            tags.push(TaskTag::BlockedOnSpec);
        }
        if self.contractor_reviewed {
            tags.push(TaskTag::ContractorReviewed);
        }
        if self.api_frozen {
            tags.push(TaskTag::ApiFrozen);
        }
        if self.spec_review_complete {
            tags.push(TaskTag::InitialSpecReviewComplete);
        }
        if self.design_review_complete {
            tags.push(TaskTag::InitialDesignReviewComplete);
        }
        if self.needs_author_action {
            tags.push(TaskTag::NeedsAuthorAction);
        }
        tags
    }

    pub fn to_tag_names(self) -> Vec<String> {
        self.to_tags()
            .into_iter()
            .map(|t| t.as_str().to_string())
            .collect()
    }

    /// Fold forge labels into the flags. Review-complete and frozen flags
    /// are sticky (a label can set them, never clear them), the
    /// author-action flag mirrors its label, and the manual flags are left
    /// alone.
    pub fn apply_labels<S: AsRef<str>>(&mut self, item_labels: &[S]) {
        let has = |name: &str| item_labels.iter().any(|l| l.as_ref() == name);
        if has(labels::API_FROZEN) {
            self.api_frozen = true;
        }
        if has(labels::INITIAL_SPEC_REVIEW_COMPLETE) {
            self.spec_review_complete = true;
        }
        if has(labels::INITIAL_DESIGN_REVIEW_COMPLETE) {
            self.design_review_complete = true;
        }
        self.needs_author_action = has(labels::NEEDS_AUTHOR_ACTION);
    }
}

/// One internal task-to-task relation from this task's perspective.
#[derive(Debug, Clone)]
pub struct InternalLink {
    /// Link record id, needed for removal.
    pub link_id: i64,
    pub other_task_id: TaskId,
    /// `None` when the remote label is outside our relation vocabulary.
    pub kind: Option<LinkKind>,
    pub label: String,
}

/// The cheap fields, decoded synchronously from one listing record.
#[derive(Debug, Clone)]
pub struct TaskBase {
    pub id: TaskId,
    pub column: Column,
    pub swimlane: Swimlane,
    pub category: Option<Category>,
    pub title: String,
    pub description: String,
    pub color_id: String,
    pub owner_id: Option<i64>,
    pub url: Option<String>,
}

impl TaskBase {
    /// Decode a listing record. A column or swimlane id the index does not
    /// know is schema drift and fails the load.
    pub fn from_listing(schema: &SchemaIndex, record: &TaskRecord) -> Result<Self, BoardError> {
        let column = schema.column_for_id(record.column_id)?;
        let swimlane = schema.swimlane_for_id(record.swimlane_id)?;
        let category = match record.category_id {
            Some(id) => schema.category_for_id(id)?,
            None => None,
        };
        Ok(TaskBase {
            id: record.id,
            column,
            swimlane,
            category,
            title: record.title.clone(),
            description: record.description.clone(),
            color_id: record.color_id.clone(),
            owner_id: record.owner_id,
            url: record.url.clone(),
        })
    }
}

/// A fully hydrated task.
#[derive(Debug, Clone)]
pub struct Task {
    pub base: TaskBase,
    /// The one work item this task tracks.
    pub reference: WorkItemRef,
    pub flags: TaskFlags,
    pub internal_links: Vec<InternalLink>,
    /// Raw tag names, including ones outside the recognized set.
    pub tags: Vec<String>,
}

impl Task {
    pub fn id(&self) -> TaskId {
        self.base.id
    }

    /// Issue the three auxiliary fetches concurrently and merge them in.
    ///
    /// The external reference is the first external link (in listing
    /// order) whose URL matches the project's issue or merge-request
    /// patterns; a task with no such link is a data-integrity error.
    pub async fn hydrate(
        base: TaskBase,
        api: &dyn KanbanApi,
        patterns: &RefPatterns,
    ) -> Result<Self, BoardError> {
        let task_id = base.id;
        let (external_links, tag_names, internal_links) = tokio::try_join!(
            api.get_external_links(task_id),
            api.get_task_tags(task_id),
            api.get_internal_links(task_id),
        )?;

        let reference = external_links
            .iter()
            .find_map(|link| patterns.parse_url(&link.url))
            .ok_or_else(|| BoardError::MissingExternalRef {
                task_id,
                urls: external_links.iter().map(|l| l.url.clone()).collect(),
            })?;

        let flags = TaskFlags::from_tags(&tag_names);
        let internal_links = parse_internal_links(task_id, internal_links);
        debug!(task_id, reference = %reference, "hydrated task");

        Ok(Task {
            base,
            reference,
            flags,
            internal_links,
            tags: tag_names,
        })
    }

    /// Re-fetch the internal links, for callers about to run the
    /// duplicate-link check against fresh state.
    pub async fn refresh_internal_links(&mut self, api: &dyn KanbanApi) -> Result<()> {
        let records = api.get_internal_links(self.base.id).await?;
        self.internal_links = parse_internal_links(self.base.id, records);
        Ok(())
    }

    pub fn has_link_to(&self, other: TaskId) -> bool {
        self.internal_links.iter().any(|l| l.other_task_id == other)
    }
}

fn parse_internal_links(
    task_id: TaskId,
    records: Vec<crate::kanban::InternalLinkRecord>,
) -> Vec<InternalLink> {
    records
        .into_iter()
        .filter(|rec| rec.task_id != task_id)
        .map(|rec| InternalLink {
            link_id: rec.id,
            other_task_id: rec.task_id,
            kind: LinkKind::from_name(&rec.label),
            label: rec.label,
        })
        .collect()
}

/// Full desired state for a task that does not exist yet. Creation is one
/// call, followed by attaching the forge URL as an external link.
#[derive(Debug, Clone)]
pub struct TaskCreation {
    pub reference: WorkItemRef,
    pub column: Column,
    pub swimlane: Swimlane,
    pub category: Option<Category>,
    pub title: String,
    pub description: String,
    pub flags: TaskFlags,
    pub color_id: String,
}

impl TaskCreation {
    pub async fn create(
        &self,
        api: &dyn KanbanApi,
        schema: &SchemaIndex,
        patterns: &RefPatterns,
    ) -> Result<TaskId, BoardError> {
        let request = TaskCreateRequest {
            project_id: schema.project_id,
            title: self.title.clone(),
            description: self.description.clone(),
            column_id: schema.column_id(self.column)?,
            swimlane_id: schema.swimlane_id(self.swimlane)?,
            category_id: match self.category {
                Some(cat) => Some(schema.category_id(cat)?),
                None => None,
            },
            color_id: self.color_id.clone(),
            tags: self.flags.to_tag_names(),
        };
        let task_id = api.create_task(&request).await?;
        api.create_external_link(
            task_id,
            &patterns.url_for(self.reference),
            &self.reference.describe(),
        )
        .await?;
        Ok(task_id)
    }
}
