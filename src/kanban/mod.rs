//! Kanban board API surface.
//!
//! The reconciliation engine talks to the board exclusively through the
//! [`KanbanApi`] trait, so the engine can be exercised against in-memory
//! fakes; [`client::KanbanClient`] is the JSON-RPC implementation used by
//! the binary.

pub mod client;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;

pub use client::{KanbanClient, KanbanConfig};
pub use types::{
    ActionCreateRequest, ActionId, ActionRecord, ExternalLinkRecord, InternalLinkRecord, NamedId,
    ProjectId, ProjectRecord, TaskCreateRequest, TaskId, TaskRecord, TaskUpdate, UserRecord,
};

/// Everything the engine needs from the kanban server. Each method is one
/// remote call and therefore one suspension point.
#[async_trait]
pub trait KanbanApi: Send + Sync {
    async fn get_project_by_name(&self, name: &str) -> Result<Option<ProjectRecord>>;

    // Schema dimensions.
    async fn get_columns(&self, project_id: ProjectId) -> Result<Vec<NamedId>>;
    async fn get_swimlanes(&self, project_id: ProjectId) -> Result<Vec<NamedId>>;
    async fn get_categories(&self, project_id: ProjectId) -> Result<Vec<NamedId>>;
    async fn get_tags(&self, project_id: ProjectId) -> Result<Vec<NamedId>>;
    async fn get_link_types(&self) -> Result<Vec<NamedId>>;
    async fn get_users(&self) -> Result<Vec<UserRecord>>;

    // Tasks.
    async fn get_task(&self, task_id: TaskId) -> Result<TaskRecord>;
    async fn get_all_tasks(&self, project_id: ProjectId, only_open: bool)
    -> Result<Vec<TaskRecord>>;
    async fn create_task(&self, req: &TaskCreateRequest) -> Result<TaskId>;
    async fn update_task(&self, task_id: TaskId, update: &TaskUpdate) -> Result<()>;
    async fn move_task(
        &self,
        project_id: ProjectId,
        task_id: TaskId,
        column_id: i64,
        swimlane_id: i64,
        position: i64,
    ) -> Result<()>;
    async fn close_task(&self, task_id: TaskId) -> Result<()>;

    // Per-task auxiliary data.
    async fn get_task_tags(&self, task_id: TaskId) -> Result<Vec<String>>;
    async fn get_external_links(&self, task_id: TaskId) -> Result<Vec<ExternalLinkRecord>>;
    async fn get_internal_links(&self, task_id: TaskId) -> Result<Vec<InternalLinkRecord>>;
    async fn create_internal_link(
        &self,
        task_id: TaskId,
        opposite_task_id: TaskId,
        link_type_id: i64,
    ) -> Result<i64>;
    async fn create_external_link(&self, task_id: TaskId, url: &str, title: &str) -> Result<()>;
    async fn create_comment(&self, task_id: TaskId, content: &str) -> Result<()>;

    // Project automation entries.
    async fn get_actions(&self, project_id: ProjectId) -> Result<Vec<ActionRecord>>;
    async fn create_action(
        &self,
        project_id: ProjectId,
        req: &ActionCreateRequest,
    ) -> Result<ActionId>;
    async fn remove_action(&self, action_id: ActionId) -> Result<()>;
}
