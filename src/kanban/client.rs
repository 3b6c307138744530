//! JSON-RPC client for the kanban server.
//!
//! The server speaks JSON-RPC 2.0 on a single endpoint with HTTP basic
//! auth. Some procedures return `false` instead of an error object on
//! failure, so results are decoded through `serde_json::Value` first.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::KanbanApi;
use super::types::{
    ActionCreateRequest, ActionId, ActionRecord, ExternalLinkRecord, InternalLinkRecord, NamedId,
    ProjectId, ProjectRecord, TaskCreateRequest, TaskId, TaskRecord, TaskUpdate, UserRecord,
};

/// Connection settings for the kanban server, loaded from the environment.
#[derive(Debug, Clone)]
pub struct KanbanConfig {
    pub url: String,
    pub username: String,
    pub token: String,
}

impl KanbanConfig {
    /// Read `KANBAN_URL`, `KANBAN_USER`, and `KANBAN_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("KANBAN_URL").context("KANBAN_URL is not set")?;
        let username =
            std::env::var("KANBAN_USER").unwrap_or_else(|_| "workboard-bot".to_string());
        let token = std::env::var("KANBAN_TOKEN").context("KANBAN_TOKEN is not set")?;
        Ok(Self {
            url,
            username,
            token,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

/// The JSON-RPC implementation of [`KanbanApi`].
pub struct KanbanClient {
    http: reqwest::Client,
    config: KanbanConfig,
}

impl KanbanClient {
    pub fn new(config: KanbanConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Issue one RPC call and return the raw `result` value.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "id": 1,
            "params": params,
        });
        let resp: RpcResponse = self
            .http
            .post(&self.config.url)
            .basic_auth(&self.config.username, Some(&self.config.token))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to send kanban RPC '{method}'"))?
            .error_for_status()
            .with_context(|| format!("Kanban RPC '{method}' returned error status"))?
            .json()
            .await
            .with_context(|| format!("Failed to parse kanban RPC '{method}' response"))?;

        if let Some(err) = resp.error {
            bail!("kanban RPC '{method}' failed: {} ({})", err.message, err.code);
        }
        resp.result
            .ok_or_else(|| anyhow!("kanban RPC '{method}' returned no result"))
    }

    /// Call and decode into a typed result.
    async fn call_as<T: serde::de::DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value)
            .with_context(|| format!("Failed to decode kanban RPC '{method}' result"))
    }

    /// Call a mutation whose result is `true`/`false`.
    async fn call_ok(&self, method: &str, params: Value) -> Result<()> {
        let value = self.call(method, params).await?;
        if value == Value::Bool(false) {
            bail!("kanban RPC '{method}' reported failure");
        }
        Ok(())
    }

    /// Call a creation procedure that returns an id, or `false` on failure.
    async fn call_id(&self, method: &str, params: Value) -> Result<i64> {
        let value = self.call(method, params).await?;
        match &value {
            Value::Bool(false) => bail!("kanban RPC '{method}' reported failure"),
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| anyhow!("kanban RPC '{method}' returned a non-integer id")),
            Value::String(s) => s
                .parse::<i64>()
                .with_context(|| format!("kanban RPC '{method}' returned a non-integer id")),
            other => bail!("kanban RPC '{method}' returned unexpected result: {other}"),
        }
    }
}

#[async_trait]
impl KanbanApi for KanbanClient {
    async fn get_project_by_name(&self, name: &str) -> Result<Option<ProjectRecord>> {
        // Returns `false` when no such project exists.
        let value = self
            .call("getProjectByName", json!({"name": name}))
            .await?;
        if value == Value::Bool(false) {
            return Ok(None);
        }
        let proj: ProjectRecord =
            serde_json::from_value(value).context("Failed to decode project record")?;
        Ok(Some(proj))
    }

    async fn get_columns(&self, project_id: ProjectId) -> Result<Vec<NamedId>> {
        self.call_as("getColumns", json!({"project_id": project_id}))
            .await
    }

    async fn get_swimlanes(&self, project_id: ProjectId) -> Result<Vec<NamedId>> {
        self.call_as("getAllSwimlanes", json!({"project_id": project_id}))
            .await
    }

    async fn get_categories(&self, project_id: ProjectId) -> Result<Vec<NamedId>> {
        self.call_as("getAllCategories", json!({"project_id": project_id}))
            .await
    }

    async fn get_tags(&self, project_id: ProjectId) -> Result<Vec<NamedId>> {
        self.call_as("getTagsByProject", json!({"project_id": project_id}))
            .await
    }

    async fn get_link_types(&self) -> Result<Vec<NamedId>> {
        // Link types are {id, label, opposite_id}; NamedId has no alias for
        // "label" so decode by hand.
        let value = self.call("getAllLinks", json!({})).await?;
        #[derive(Deserialize)]
        struct LinkType {
            #[serde(deserialize_with = "super::types::string_or_int")]
            id: i64,
            label: String,
        }
        let raw: Vec<LinkType> =
            serde_json::from_value(value).context("Failed to decode link types")?;
        Ok(raw
            .into_iter()
            .map(|lt| NamedId {
                id: lt.id,
                name: lt.label,
            })
            .collect())
    }

    async fn get_users(&self) -> Result<Vec<UserRecord>> {
        self.call_as("getAllUsers", json!({})).await
    }

    async fn get_task(&self, task_id: TaskId) -> Result<TaskRecord> {
        self.call_as("getTask", json!({"task_id": task_id})).await
    }

    async fn get_all_tasks(
        &self,
        project_id: ProjectId,
        only_open: bool,
    ) -> Result<Vec<TaskRecord>> {
        let status_id = if only_open { 1 } else { 0 };
        self.call_as(
            "getAllTasks",
            json!({"project_id": project_id, "status_id": status_id}),
        )
        .await
    }

    async fn create_task(&self, req: &TaskCreateRequest) -> Result<TaskId> {
        self.call_id(
            "createTask",
            json!({
                "title": req.title,
                "project_id": req.project_id,
                "description": req.description,
                "column_id": req.column_id,
                "swimlane_id": req.swimlane_id,
                "category_id": req.category_id,
                "color_id": req.color_id,
                "tags": req.tags,
            }),
        )
        .await
    }

    async fn update_task(&self, task_id: TaskId, update: &TaskUpdate) -> Result<()> {
        let mut params = serde_json::Map::new();
        params.insert("id".into(), json!(task_id));
        if let Some(title) = &update.title {
            params.insert("title".into(), json!(title));
        }
        if let Some(category_id) = update.category_id {
            params.insert("category_id".into(), json!(category_id));
        }
        if let Some(tags) = &update.tags {
            params.insert("tags".into(), json!(tags));
        }
        if let Some(color_id) = &update.color_id {
            params.insert("color_id".into(), json!(color_id));
        }
        if let Some(owner_id) = update.owner_id {
            params.insert("owner_id".into(), json!(owner_id));
        }
        self.call_ok("updateTask", Value::Object(params)).await
    }

    async fn move_task(
        &self,
        project_id: ProjectId,
        task_id: TaskId,
        column_id: i64,
        swimlane_id: i64,
        position: i64,
    ) -> Result<()> {
        self.call_ok(
            "moveTaskPosition",
            json!({
                "project_id": project_id,
                "task_id": task_id,
                "column_id": column_id,
                "swimlane_id": swimlane_id,
                "position": position,
            }),
        )
        .await
    }

    async fn close_task(&self, task_id: TaskId) -> Result<()> {
        self.call_ok("closeTask", json!({"task_id": task_id})).await
    }

    async fn get_task_tags(&self, task_id: TaskId) -> Result<Vec<String>> {
        // Returned as a map of tag id (string) to tag name.
        let value = self.call("getTaskTags", json!({"task_id": task_id})).await?;
        // An empty tag set comes back as an empty array instead of a map.
        if let Value::Array(entries) = &value {
            if entries.is_empty() {
                return Ok(Vec::new());
            }
        }
        let map: std::collections::BTreeMap<String, String> =
            serde_json::from_value(value).context("Failed to decode task tags")?;
        Ok(map.into_values().collect())
    }

    async fn get_external_links(&self, task_id: TaskId) -> Result<Vec<ExternalLinkRecord>> {
        self.call_as("getAllExternalTaskLinks", json!({"task_id": task_id}))
            .await
    }

    async fn get_internal_links(&self, task_id: TaskId) -> Result<Vec<InternalLinkRecord>> {
        self.call_as("getAllTaskLinks", json!({"task_id": task_id}))
            .await
    }

    async fn create_internal_link(
        &self,
        task_id: TaskId,
        opposite_task_id: TaskId,
        link_type_id: i64,
    ) -> Result<i64> {
        self.call_id(
            "createTaskLink",
            json!({
                "task_id": task_id,
                "opposite_task_id": opposite_task_id,
                "link_id": link_type_id,
            }),
        )
        .await
    }

    async fn create_external_link(&self, task_id: TaskId, url: &str, title: &str) -> Result<()> {
        self.call_ok(
            "createExternalTaskLink",
            json!({
                "task_id": task_id,
                "url": url,
                "dependency": "related",
                "type": "weblink",
                "title": title,
            }),
        )
        .await
    }

    async fn create_comment(&self, task_id: TaskId, content: &str) -> Result<()> {
        self.call_ok(
            "createComment",
            json!({"task_id": task_id, "content": content}),
        )
        .await
    }

    async fn get_actions(&self, project_id: ProjectId) -> Result<Vec<ActionRecord>> {
        self.call_as("getActions", json!({"project_id": project_id}))
            .await
    }

    async fn create_action(
        &self,
        project_id: ProjectId,
        req: &ActionCreateRequest,
    ) -> Result<ActionId> {
        self.call_id(
            "createAction",
            json!({
                "project_id": project_id,
                "event_name": req.event_name,
                "action_name": req.action_name,
                "params": req.params,
            }),
        )
        .await
    }

    async fn remove_action(&self, action_id: ActionId) -> Result<()> {
        self.call_ok("removeAction", json!({"action_id": action_id}))
            .await
    }
}
