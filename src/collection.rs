//! The loaded-task index: by task id and by external reference.

use std::collections::BTreeMap;

use futures::future::join_all;
use tracing::{info, warn};

use crate::errors::BoardError;
use crate::forge::{RefPatterns, WorkItemRef};
use crate::kanban::{KanbanApi, TaskId};
use crate::schema::SchemaIndex;
use crate::task::{Task, TaskBase};

/// Bound on concurrently hydrating tasks.
pub const HYDRATE_CHUNK: usize = 16;

/// Outcome of a bulk load: tasks that hydrated plus the per-task failures
/// that did not abort their siblings.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub loaded: usize,
    pub failures: Vec<(TaskId, BoardError)>,
}

/// All loaded tasks, indexed by id and by external reference.
///
/// Mutated only during load (and by `load_task_id` after a creation);
/// reconciliation reads it through `&`.
#[derive(Default)]
pub struct TaskCollection {
    tasks: BTreeMap<TaskId, Task>,
    issue_to_task_id: BTreeMap<u64, TaskId>,
    mr_to_task_id: BTreeMap<u64, TaskId>,
}

impl TaskCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// List every task on the project and hydrate them in bounded chunks.
    ///
    /// An unknown column/swimlane id in the listing is schema drift and
    /// fails the whole load; a task that fails hydration (bad data or a
    /// failed auxiliary call) is reported in the outcome and skipped.
    pub async fn load_project(
        &mut self,
        api: &dyn KanbanApi,
        schema: &SchemaIndex,
        patterns: &RefPatterns,
        only_open: bool,
    ) -> Result<LoadOutcome, BoardError> {
        let records = api.get_all_tasks(schema.project_id, only_open).await?;
        info!(count = records.len(), "loading board tasks");

        let mut bases = Vec::with_capacity(records.len());
        for record in &records {
            bases.push(TaskBase::from_listing(schema, record)?);
        }

        let mut outcome = LoadOutcome::default();
        for chunk in bases.chunks(HYDRATE_CHUNK) {
            let hydrated = join_all(
                chunk
                    .iter()
                    .map(|base| Task::hydrate(base.clone(), api, patterns)),
            )
            .await;
            for (base, result) in chunk.iter().zip(hydrated) {
                match result {
                    Ok(task) => {
                        self.insert(task);
                        outcome.loaded += 1;
                    }
                    Err(err) => {
                        warn!(task_id = base.id, error = %err, "failed to hydrate task");
                        outcome.failures.push((base.id, err));
                    }
                }
            }
        }
        Ok(outcome)
    }

    /// Load one task by id, keeping the collection consistent after a
    /// task creation without a full reload.
    pub async fn load_task_id(
        &mut self,
        api: &dyn KanbanApi,
        schema: &SchemaIndex,
        patterns: &RefPatterns,
        task_id: TaskId,
    ) -> Result<(), BoardError> {
        let record = api.get_task(task_id).await?;
        let base = TaskBase::from_listing(schema, &record)?;
        let task = Task::hydrate(base, api, patterns).await?;
        self.insert(task);
        Ok(())
    }

    fn insert(&mut self, task: Task) {
        let task_id = task.id();
        let occupied = match task.reference {
            WorkItemRef::Issue(n) => self
                .issue_to_task_id
                .get(&n)
                .is_some_and(|&existing| existing != task_id),
            WorkItemRef::MergeRequest(n) => self
                .mr_to_task_id
                .get(&n)
                .is_some_and(|&existing| existing != task_id),
        };
        if occupied {
            // One task per external ref; keep the first one indexed.
            warn!(
                task_id,
                reference = %task.reference,
                "duplicate tracking task for external reference, not indexing"
            );
            self.tasks.insert(task_id, task);
            return;
        }
        match task.reference {
            WorkItemRef::Issue(n) => {
                self.issue_to_task_id.insert(n, task_id);
            }
            WorkItemRef::MergeRequest(n) => {
                self.mr_to_task_id.insert(n, task_id);
            }
        }
        self.tasks.insert(task_id, task);
    }

    pub fn get(&self, task_id: TaskId) -> Option<&Task> {
        self.tasks.get(&task_id)
    }

    pub fn get_mut(&mut self, task_id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&task_id)
    }

    /// A miss means "no tracking task yet", never an error.
    pub fn get_by_issue(&self, number: u64) -> Option<&Task> {
        self.issue_to_task_id
            .get(&number)
            .and_then(|id| self.tasks.get(id))
    }

    pub fn get_by_mr(&self, number: u64) -> Option<&Task> {
        self.mr_to_task_id
            .get(&number)
            .and_then(|id| self.tasks.get(id))
    }

    pub fn get_by_ref(&self, reference: WorkItemRef) -> Option<&Task> {
        match reference {
            WorkItemRef::Issue(n) => self.get_by_issue(n),
            WorkItemRef::MergeRequest(n) => self.get_by_mr(n),
        }
    }

    /// Every indexed external reference with its task id, issues first.
    pub fn references(&self) -> Vec<(WorkItemRef, TaskId)> {
        let issues = self
            .issue_to_task_id
            .iter()
            .map(|(&n, &id)| (WorkItemRef::Issue(n), id));
        let mrs = self
            .mr_to_task_id
            .iter()
            .map(|(&n, &id)| (WorkItemRef::MergeRequest(n), id));
        issues.chain(mrs).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
