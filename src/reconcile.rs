//! The reconciliation engine: per-field diff between a task's board state
//! and the state derived from its forge item, applying only authorized
//! deltas.
//!
//! The run is two-phase: every forge item is fetched before any update is
//! computed, then all task updates fan out concurrently in bounded
//! chunks. A failed call is isolated to its task and field; siblings are
//! unaffected and nothing is retried.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use futures::future::join_all;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::collection::TaskCollection;
use crate::errors::{BoardError, FieldFailure};
use crate::forge::{ForgeApi, RefPatterns, WorkItem, WorkItemRef, fetch_item, labels};
use crate::kanban::{KanbanApi, TaskId, TaskUpdate};
use crate::links::add_link;
use crate::schema::{Category, Column, LinkKind, SchemaIndex, Swimlane};
use crate::task::{Task, TaskCreation, TaskFlags};

/// Bound on concurrently updating tasks.
pub const UPDATE_CHUNK: usize = 16;

/// Assignments to these forge accounts never drive the owner field.
const BOT_USERNAMES: &[&str] = &["merge-bot"];

/// Per-field authorization. A disabled field still goes through the full
/// decision logic and logs what it would have done, so dry-run output is
/// a trustworthy preview.
#[derive(Debug, Clone, Copy)]
pub struct UpdateOptions {
    pub update_title: bool,
    pub update_category: bool,
    pub update_tags: bool,
    pub update_color: bool,
    pub update_owner: bool,
    pub update_column: bool,
    pub create_task: bool,
    pub add_links: bool,
    pub modify_forge_desc: bool,
}

impl UpdateOptions {
    pub fn all_true() -> Self {
        Self {
            update_title: true,
            update_category: true,
            update_tags: true,
            update_color: true,
            update_owner: true,
            update_column: true,
            create_task: true,
            add_links: true,
            modify_forge_desc: true,
        }
    }

    /// Dry-run: every decision is made, nothing is written.
    pub fn all_false() -> Self {
        Self {
            update_title: false,
            update_category: false,
            update_tags: false,
            update_color: false,
            update_owner: false,
            update_column: false,
            create_task: false,
            add_links: false,
            modify_forge_desc: false,
        }
    }
}

/// Board color for a task, by the kind of item it tracks.
pub fn color_for_ref(reference: WorkItemRef) -> &'static str {
    if reference.is_merge_request() { "blue" } else { "grey" }
}

fn category_from_labels(item: &WorkItem) -> Option<Category> {
    if item.has_label(labels::CONTRACTOR_APPROVED) {
        Some(Category::Contractor)
    } else {
        None
    }
}

/// Pick the owner the task should carry: the first active assignee unless
/// it is the MR's reviewer, falling back to an MR's author.
fn desired_owner(item: &WorkItem) -> Option<&crate::forge::Account> {
    let reviewer = item
        .reviewers
        .first()
        .filter(|r| r.active)
        .map(|r| r.username.as_str());

    if let Some(assignee) = item.assignees.iter().find(|a| a.active) {
        if reviewer.is_none_or(|r| r != assignee.username) {
            return Some(assignee);
        }
    }
    if item.reference.is_merge_request() && item.author.active {
        return Some(&item.author);
    }
    None
}

/// The target state for one task, computed from its forge item.
#[derive(Debug, Clone)]
pub struct DesiredState {
    pub title: String,
    pub category: Option<Category>,
    pub flags: TaskFlags,
    pub color_id: &'static str,
    pub move_to_done: bool,
}

impl DesiredState {
    /// Starts from the task's current flags so manually set ones survive.
    pub fn from_work_item(task: &Task, item: &WorkItem) -> Self {
        let mut flags = task.flags;
        flags.apply_labels(&item.labels);
        DesiredState {
            title: item.decorated_title(),
            category: category_from_labels(item),
            flags,
            color_id: color_for_ref(item.reference),
            move_to_done: item.state.is_finished()
                && !matches!(task.base.column, Column::Done | Column::OnHold),
        }
    }
}

/// What one run did.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub tasks_processed: usize,
    pub fields_updated: usize,
    pub tasks_created: usize,
    pub links_created: usize,
    pub descriptions_updated: usize,
    pub failures: Vec<FieldFailure>,
}

impl ReconcileReport {
    pub fn changes_made(&self) -> bool {
        self.fields_updated > 0
            || self.tasks_created > 0
            || self.links_created > 0
            || self.descriptions_updated > 0
    }

    fn absorb(&mut self, other: TaskReport) {
        self.tasks_processed += 1;
        self.fields_updated += other.applied;
        self.failures.extend(other.failures);
    }
}

/// Outcome for a single task's pass.
#[derive(Debug, Default)]
pub struct TaskReport {
    pub applied: usize,
    pub failures: Vec<FieldFailure>,
}

impl TaskReport {
    fn record(&mut self, task_id: TaskId, field: &'static str, result: anyhow::Result<()>) {
        match result {
            Ok(()) => self.applied += 1,
            Err(err) => self.failures.push(FieldFailure {
                task_id,
                field,
                message: format!("{err:#}"),
            }),
        }
    }
}

static BACKLINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Workboard Task: \S+").expect("backlink pattern"));

fn backlink_line(task_url: &str) -> String {
    format!("Workboard Task: {task_url}")
}

/// Compute the repaired item description, or `None` when no edit is
/// needed. The backlink line is kept at the top of the description.
fn updated_description(current: &str, task_url: &str) -> Option<String> {
    let front = backlink_line(task_url);
    if current.trim() == front {
        return None;
    }
    if let Some(found) = BACKLINK.find(current) {
        if found.as_str() == front {
            return None;
        }
        let stripped = BACKLINK.replace(current, "").trim().to_string();
        return Some(format!("{front}\n\n{stripped}"));
    }
    Some(format!("{front}\n\n{current}"))
}

/// Drives one reconciliation run against the two remote APIs.
pub struct Reconciler<'a> {
    pub kanban: &'a dyn KanbanApi,
    pub forge: &'a dyn ForgeApi,
    pub schema: &'a SchemaIndex,
    pub patterns: &'a RefPatterns,
    pub options: UpdateOptions,
}

impl<'a> Reconciler<'a> {
    /// Reconcile every indexed task: fetch phase strictly before update
    /// phase, then the forge-description backlink pass.
    pub async fn reconcile_all(
        &self,
        collection: &mut TaskCollection,
    ) -> Result<ReconcileReport, BoardError> {
        let mut report = ReconcileReport::default();
        let items = self.fetch_phase(collection, &mut report).await;
        self.update_phase(collection, &items, &mut report).await;
        let descriptions = self
            .sync_forge_descriptions(collection, &items, &mut report)
            .await;
        report.descriptions_updated = descriptions;
        Ok(report)
    }

    /// Fetch every tracked forge item, memoized by reference. A failed
    /// fetch drops that task from the update phase and is reported.
    async fn fetch_phase(
        &self,
        collection: &TaskCollection,
        report: &mut ReconcileReport,
    ) -> BTreeMap<TaskId, WorkItem> {
        let references = collection.references();
        info!(count = references.len(), "fetching forge items for tracked tasks");

        let mut items = BTreeMap::new();
        for chunk in references.chunks(UPDATE_CHUNK) {
            let fetched = join_all(
                chunk
                    .iter()
                    .map(|(reference, _)| fetch_item(self.forge, *reference)),
            )
            .await;
            for ((reference, task_id), result) in chunk.iter().zip(fetched) {
                match result {
                    Ok(item) => {
                        items.insert(*task_id, item);
                    }
                    Err(err) => {
                        warn!(%reference, error = %err, "failed to fetch forge item");
                        report.failures.push(FieldFailure {
                            task_id: *task_id,
                            field: "fetch",
                            message: format!("{reference}: {err:#}"),
                        });
                    }
                }
            }
        }
        items
    }

    async fn update_phase(
        &self,
        collection: &TaskCollection,
        items: &BTreeMap<TaskId, WorkItem>,
        report: &mut ReconcileReport,
    ) {
        let pairs: Vec<(&Task, &WorkItem)> = items
            .iter()
            .filter_map(|(task_id, item)| collection.get(*task_id).map(|task| (task, item)))
            .collect();
        info!(count = pairs.len(), "updating board tasks");

        for chunk in pairs.chunks(UPDATE_CHUNK) {
            let outcomes = join_all(chunk.iter().map(|(task, item)| self.update_task(task, item)))
                .await;
            for outcome in outcomes {
                report.absorb(outcome);
            }
        }
    }

    /// Reconcile one task field by field. Fields are independent: a skip
    /// or failure on one never blocks another.
    pub async fn update_task(&self, task: &Task, item: &WorkItem) -> TaskReport {
        let desired = DesiredState::from_work_item(task, item);
        let task_id = task.id();
        let mut outcome = TaskReport::default();

        // Title.
        if desired.title.trim() == task.base.title.trim() {
            debug!(task_id, "no title update needed");
        } else if !self.options.update_title {
            info!(
                task_id,
                old = %task.base.title,
                new = %desired.title,
                "skipping title update by request"
            );
        } else {
            info!(task_id, old = %task.base.title, new = %desired.title, "updating title");
            let update = TaskUpdate {
                title: Some(desired.title.clone()),
                ..Default::default()
            };
            outcome.record(task_id, "title", self.kanban.update_task(task_id, &update).await);
        }

        // Category. A task marked outside the IPR policy keeps that
        // category even when no label maps to one.
        let keep_category = desired.category.is_none()
            && task.base.category == Some(Category::OutsideIprPolicy);
        if desired.category == task.base.category || keep_category {
            debug!(task_id, "no category update needed");
        } else if !self.options.update_category {
            info!(
                task_id,
                old = ?task.base.category,
                new = ?desired.category,
                "skipping category update by request"
            );
        } else {
            info!(task_id, old = ?task.base.category, new = ?desired.category, "updating category");
            match self.schema.optional_category_id(desired.category) {
                Ok(category_id) => {
                    let update = TaskUpdate {
                        category_id: Some(category_id),
                        ..Default::default()
                    };
                    outcome.record(
                        task_id,
                        "category",
                        self.kanban.update_task(task_id, &update).await,
                    );
                }
                Err(err) => outcome.record(task_id, "category", Err(err.into())),
            }
        }

        // Tags (via the flag projection).
        if desired.flags == task.flags {
            debug!(task_id, "no tag update needed");
        } else if !self.options.update_tags {
            info!(
                task_id,
                old = ?task.flags,
                new = ?desired.flags,
                "skipping tag update by request"
            );
        } else {
            info!(task_id, old = ?task.flags, new = ?desired.flags, "updating tags");
            let update = TaskUpdate {
                tags: Some(desired.flags.to_tag_names()),
                ..Default::default()
            };
            outcome.record(task_id, "tags", self.kanban.update_task(task_id, &update).await);
        }

        // Color.
        if desired.color_id == task.base.color_id {
            debug!(task_id, "no color update needed");
        } else if !self.options.update_color {
            info!(
                task_id,
                old = %task.base.color_id,
                new = desired.color_id,
                "skipping color update by request"
            );
        } else {
            info!(task_id, old = %task.base.color_id, new = desired.color_id, "updating color");
            let update = TaskUpdate {
                color_id: Some(desired.color_id.to_string()),
                ..Default::default()
            };
            outcome.record(task_id, "color", self.kanban.update_task(task_id, &update).await);
        }

        self.try_update_owner(task, item, &mut outcome).await;

        // Column: moving into Done when the item is finished is the only
        // automatic move.
        if desired.move_to_done {
            if self.options.update_column {
                info!(task_id, from = %task.base.column, "moving task to Done");
                let result = async {
                    let column_id = self.schema.column_id(Column::Done)?;
                    let swimlane_id = self.schema.swimlane_id(task.base.swimlane)?;
                    self.kanban
                        .move_task(self.schema.project_id, task_id, column_id, swimlane_id, 1)
                        .await
                        .map_err(BoardError::from)
                }
                .await;
                outcome.record(task_id, "column", result.map_err(Into::into));
            } else {
                info!(
                    task_id,
                    from = %task.base.column,
                    "skipping move to Done by request"
                );
            }
        }

        outcome
    }

    /// The owner field never tracks finished items or bot assignments,
    /// and an owner with no board account is left unchanged.
    async fn try_update_owner(&self, task: &Task, item: &WorkItem, outcome: &mut TaskReport) {
        let task_id = task.id();
        if item.state.is_finished() {
            return;
        }
        let desired = desired_owner(item);
        let desired_username = desired.map(|a| a.username.as_str());
        if desired_username.is_some_and(|u| BOT_USERNAMES.contains(&u)) {
            debug!(task_id, owner = ?desired_username, "assigned to a bot, leaving owner alone");
            return;
        }
        let current_username = task.base.owner_id.and_then(|id| self.schema.username_for_id(id));
        if current_username == desired_username {
            return;
        }
        let Some(account) = desired else {
            return;
        };
        let Some(owner_id) = self.schema.user_id_for_username(&account.username) else {
            warn!(
                task_id,
                username = %account.username,
                name = %account.name,
                "no board account for desired owner, probably has not logged in yet"
            );
            return;
        };
        if !self.options.update_owner {
            info!(
                task_id,
                old = ?current_username,
                new = %account.username,
                "skipping owner update by request"
            );
            return;
        }
        info!(task_id, old = ?current_username, new = %account.username, "updating owner");
        let update = TaskUpdate {
            owner_id: Some(owner_id),
            ..Default::default()
        };
        outcome.record(task_id, "owner", self.kanban.update_task(task_id, &update).await);
    }

    /// Compute creation data for a work item in one shot.
    pub fn creation_for(
        &self,
        item: &WorkItem,
        column: Column,
        swimlane: Swimlane,
        starting_flags: TaskFlags,
    ) -> TaskCreation {
        let mut flags = starting_flags;
        flags.apply_labels(&item.labels);
        TaskCreation {
            reference: item.reference,
            column,
            swimlane,
            category: category_from_labels(item),
            title: item.decorated_title(),
            description: String::new(),
            flags,
            color_id: color_for_ref(item.reference).to_string(),
        }
    }

    /// Create the task (unless creation is unauthorized) and fold it into
    /// the collection.
    pub async fn create_task(
        &self,
        collection: &mut TaskCollection,
        creation: &TaskCreation,
    ) -> Result<Option<TaskId>, BoardError> {
        if !self.options.create_task {
            info!(
                reference = %creation.reference,
                title = %creation.title,
                "skipping task creation by request"
            );
            return Ok(None);
        }
        let task_id = creation.create(self.kanban, self.schema, self.patterns).await?;
        info!(reference = %creation.reference, task_id, "created task");
        collection
            .load_task_id(self.kanban, self.schema, self.patterns, task_id)
            .await?;
        Ok(Some(task_id))
    }

    /// Search the forge for labeled items with no tracking task yet:
    /// create their tasks and link issue tasks as blocked by the tasks of
    /// their closing merge requests.
    pub async fn discover_new_tasks(
        &self,
        collection: &mut TaskCollection,
        report: &mut ReconcileReport,
    ) -> Result<(), BoardError> {
        info!("searching forge for unworked labeled issues");
        let issues = self
            .forge
            .list_issues(&[labels::CONTRACTOR_APPROVED, labels::CONFORMANCE])
            .await?;
        for issue in issues {
            self.handle_discovered_issue(collection, report, &issue).await?;
        }

        info!("searching forge for untracked labeled merge requests");
        let merge_requests = self.forge.list_merge_requests(&[labels::CONFORMANCE]).await?;
        for mr in merge_requests {
            if collection.get_by_ref(mr.reference).is_some() {
                debug!(reference = %mr.reference, "merge request already tracked");
                continue;
            }
            info!(reference = %mr.reference, title = %mr.title, "untracked merge request");
            let creation = self.creation_for(
                &mr,
                guess_mr_column(&mr),
                guess_swimlane(&mr),
                TaskFlags::default(),
            );
            if self.create_task(collection, &creation).await?.is_some() {
                report.tasks_created += 1;
            }
        }
        Ok(())
    }

    async fn handle_discovered_issue(
        &self,
        collection: &mut TaskCollection,
        report: &mut ReconcileReport,
        issue: &WorkItem,
    ) -> Result<(), BoardError> {
        let issue_number = issue.reference.number();
        if collection.get_by_ref(issue.reference).is_none() {
            info!(reference = %issue.reference, title = %issue.title, "issue needs a task");
            let creation = self.creation_for(
                issue,
                Column::Backlog,
                Swimlane::SpecReview,
                TaskFlags::default(),
            );
            if self.create_task(collection, &creation).await?.is_some() {
                report.tasks_created += 1;
            }
        }

        let closers = self.forge.issue_closers(issue_number).await?;
        if closers.is_empty() {
            return Ok(());
        }

        // Make sure every closing MR has a task before linking.
        let mut closer_ids = Vec::new();
        for mr in &closers {
            if let Some(task) = collection.get_by_ref(mr.reference) {
                closer_ids.push(task.id());
                continue;
            }
            info!(
                reference = %mr.reference,
                issue = %issue.reference,
                "creating task for closing merge request"
            );
            let creation = self.creation_for(
                mr,
                guess_mr_column(mr),
                Swimlane::SpecReview,
                TaskFlags::default(),
            );
            if let Some(task_id) = self.create_task(collection, &creation).await? {
                report.tasks_created += 1;
                closer_ids.push(task_id);
            }
        }

        let Some(issue_task_id) = collection.get_by_ref(issue.reference).map(Task::id) else {
            return Ok(());
        };
        // Fresh link state, per the link manager contract.
        if let Some(task) = collection.get_mut(issue_task_id) {
            task.refresh_internal_links(self.kanban).await?;
        }
        for closer_id in closer_ids {
            let (Some(issue_task), Some(mr_task)) =
                (collection.get(issue_task_id), collection.get(closer_id))
            else {
                continue;
            };
            let created = add_link(
                self.kanban,
                self.schema,
                issue_task,
                mr_task,
                LinkKind::IsBlockedBy,
                !self.options.add_links,
            )
            .await?;
            if created {
                report.links_created += 1;
                if let Some(task) = collection.get_mut(issue_task_id) {
                    task.refresh_internal_links(self.kanban).await?;
                }
            }
        }
        Ok(())
    }

    /// Keep the backlink to the tracking task at the top of each open
    /// item's forge description, visiting items oldest-updated first.
    async fn sync_forge_descriptions(
        &self,
        collection: &TaskCollection,
        items: &BTreeMap<TaskId, WorkItem>,
        report: &mut ReconcileReport,
    ) -> usize {
        let mut pairs: Vec<(&TaskId, &WorkItem)> = items
            .iter()
            .filter(|(_, item)| !item.state.is_finished())
            .collect();
        pairs.sort_by_key(|(_, item)| item.updated_at);

        let mut updated = 0;
        for (task_id, item) in pairs {
            let Some(task_url) = collection.get(*task_id).and_then(|t| t.base.url.clone()) else {
                continue;
            };
            let Some(new_desc) = updated_description(&item.description, &task_url) else {
                debug!(task_id, "forge description already carries the backlink");
                continue;
            };
            if !self.options.modify_forge_desc {
                info!(
                    task_id,
                    reference = %item.reference,
                    "skipping forge description update by request"
                );
                continue;
            }
            info!(task_id, reference = %item.reference, "repairing forge description backlink");
            match self.forge.set_description(item.reference, &new_desc).await {
                Ok(()) => updated += 1,
                Err(err) => report.failures.push(FieldFailure {
                    task_id: *task_id,
                    field: "forge_description",
                    message: format!("{err:#}"),
                }),
            }
        }
        updated
    }
}

/// A draft or author-action MR goes to In Progress; anything else awaits
/// review.
fn guess_mr_column(mr: &WorkItem) -> Column {
    if mr.draft || mr.has_label(labels::NEEDS_AUTHOR_ACTION) {
        Column::InProgress
    } else {
        Column::AwaitingReview
    }
}

fn guess_swimlane(item: &WorkItem) -> Swimlane {
    if item.has_label(labels::CONTRACTOR_APPROVED) {
        Swimlane::SpecReview
    } else {
        Swimlane::General
    }
}
