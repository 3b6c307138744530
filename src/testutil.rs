//! In-memory fakes for the two remote APIs, shared by unit tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;

use crate::forge::{Account, ForgeApi, ItemState, WorkItem, WorkItemRef};
use crate::kanban::{
    ActionCreateRequest, ActionId, ActionRecord, ExternalLinkRecord, InternalLinkRecord, KanbanApi,
    NamedId, ProjectId, ProjectRecord, TaskCreateRequest, TaskId, TaskRecord, TaskUpdate,
    UserRecord,
};
use crate::schema::{Category, Column, LinkKind, Swimlane, TaskTag};

/// Mutable board state behind the fake, plus a log of every mutating call.
#[derive(Default)]
struct BoardState {
    tasks: BTreeMap<TaskId, TaskRecord>,
    tags: BTreeMap<TaskId, Vec<String>>,
    external_links: BTreeMap<TaskId, Vec<ExternalLinkRecord>>,
    internal_links: BTreeMap<TaskId, Vec<InternalLinkRecord>>,
    actions: Vec<ActionRecord>,
    next_task_id: TaskId,
    next_link_id: i64,
    next_action_id: ActionId,
    calls: Vec<String>,
    /// Task ids whose next update call fails.
    fail_update_for: Vec<TaskId>,
}

/// An in-memory [`KanbanApi`] whose schema ids match
/// [`crate::schema::test_index::populated`].
pub struct FakeKanban {
    state: Mutex<BoardState>,
}

impl FakeKanban {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BoardState {
                next_task_id: 1000,
                next_link_id: 5000,
                next_action_id: 9000,
                ..Default::default()
            }),
        }
    }

    pub fn add_task(&self, record: TaskRecord, tags: &[&str], external_url: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        let task_id = record.id;
        state
            .tags
            .insert(task_id, tags.iter().map(|t| t.to_string()).collect());
        if let Some(url) = external_url {
            let link_id = state.next_link_id;
            state.next_link_id += 1;
            state.external_links.insert(
                task_id,
                vec![ExternalLinkRecord {
                    id: link_id,
                    url: url.to_string(),
                    title: String::new(),
                }],
            );
        }
        state.tasks.insert(task_id, record);
    }

    pub fn add_action(&self, event_name: &str, action_name: &str, params: &[(&str, &str)]) -> ActionId {
        let mut state = self.state.lock().unwrap();
        let id = state.next_action_id;
        state.next_action_id += 1;
        state.actions.push(ActionRecord {
            id,
            event_name: event_name.to_string(),
            action_name: action_name.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        id
    }

    pub fn fail_next_update_for(&self, task_id: TaskId) {
        self.state.lock().unwrap().fail_update_for.push(task_id);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn task(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.state.lock().unwrap().tasks.get(&task_id).cloned()
    }

    pub fn task_tags(&self, task_id: TaskId) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .tags
            .get(&task_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn internal_link_count(&self, task_id: TaskId) -> usize {
        self.state
            .lock()
            .unwrap()
            .internal_links
            .get(&task_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn actions(&self) -> Vec<ActionRecord> {
        self.state.lock().unwrap().actions.clone()
    }
}

/// Schema listings with the same ids as `test_index::populated`.
fn schema_named_ids(kind: &str) -> Vec<NamedId> {
    match kind {
        "columns" => Column::ALL
            .iter()
            .enumerate()
            .map(|(i, c)| NamedId {
                id: 1 + i as i64,
                name: c.as_str().to_string(),
            })
            .collect(),
        "swimlanes" => Swimlane::ALL
            .iter()
            .enumerate()
            .map(|(i, s)| NamedId {
                id: 11 + i as i64,
                name: s.as_str().to_string(),
            })
            .collect(),
        "categories" => Category::ALL
            .iter()
            .enumerate()
            .map(|(i, c)| NamedId {
                id: 21 + i as i64,
                name: c.as_str().to_string(),
            })
            .collect(),
        "link_types" => LinkKind::ALL
            .iter()
            .enumerate()
            .map(|(i, k)| NamedId {
                id: 31 + i as i64,
                name: k.as_str().to_string(),
            })
            .collect(),
        "tags" => TaskTag::ALL
            .iter()
            .enumerate()
            .map(|(i, t)| NamedId {
                id: 41 + i as i64,
                name: t.as_str().to_string(),
            })
            .collect(),
        _ => unreachable!(),
    }
}

#[async_trait]
impl KanbanApi for FakeKanban {
    async fn get_project_by_name(&self, name: &str) -> Result<Option<ProjectRecord>> {
        Ok(Some(ProjectRecord {
            id: 1,
            name: name.to_string(),
        }))
    }

    async fn get_columns(&self, _project_id: ProjectId) -> Result<Vec<NamedId>> {
        Ok(schema_named_ids("columns"))
    }

    async fn get_swimlanes(&self, _project_id: ProjectId) -> Result<Vec<NamedId>> {
        Ok(schema_named_ids("swimlanes"))
    }

    async fn get_categories(&self, _project_id: ProjectId) -> Result<Vec<NamedId>> {
        Ok(schema_named_ids("categories"))
    }

    async fn get_tags(&self, _project_id: ProjectId) -> Result<Vec<NamedId>> {
        Ok(schema_named_ids("tags"))
    }

    async fn get_link_types(&self) -> Result<Vec<NamedId>> {
        Ok(schema_named_ids("link_types"))
    }

    async fn get_users(&self) -> Result<Vec<UserRecord>> {
        Ok(vec![
            UserRecord {
                id: 101,
                username: "alice".into(),
                name: "Alice Example".into(),
            },
            UserRecord {
                id: 102,
                username: "bob".into(),
                name: "Bob Example".into(),
            },
        ])
    }

    async fn get_task(&self, task_id: TaskId) -> Result<TaskRecord> {
        let state = self.state.lock().unwrap();
        state
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no task {task_id}"))
    }

    async fn get_all_tasks(
        &self,
        _project_id: ProjectId,
        _only_open: bool,
    ) -> Result<Vec<TaskRecord>> {
        Ok(self.state.lock().unwrap().tasks.values().cloned().collect())
    }

    async fn create_task(&self, req: &TaskCreateRequest) -> Result<TaskId> {
        let mut state = self.state.lock().unwrap();
        let task_id = state.next_task_id;
        state.next_task_id += 1;
        state.calls.push(format!("create_task:{}", req.title));
        state.tasks.insert(
            task_id,
            TaskRecord {
                id: task_id,
                title: req.title.clone(),
                description: req.description.clone(),
                column_id: req.column_id,
                swimlane_id: req.swimlane_id,
                category_id: Some(req.category_id.unwrap_or(0)),
                owner_id: None,
                color_id: req.color_id.clone(),
                url: Some(format!("https://boards.example.org/task/{task_id}")),
            },
        );
        state.tags.insert(task_id, req.tags.clone());
        Ok(task_id)
    }

    async fn update_task(&self, task_id: TaskId, update: &TaskUpdate) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(pos) = state.fail_update_for.iter().position(|&t| t == task_id) {
            state.fail_update_for.remove(pos);
            state.calls.push(format!("update_task_failed:{task_id}"));
            bail!("injected update failure for task {task_id}");
        }
        let mut fields = Vec::new();
        if update.title.is_some() {
            fields.push("title");
        }
        if update.category_id.is_some() {
            fields.push("category");
        }
        if update.tags.is_some() {
            fields.push("tags");
        }
        if update.color_id.is_some() {
            fields.push("color");
        }
        if update.owner_id.is_some() {
            fields.push("owner");
        }
        state
            .calls
            .push(format!("update_task:{task_id}:{}", fields.join("+")));
        let record = state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| anyhow::anyhow!("no task {task_id}"))?;
        if let Some(title) = &update.title {
            record.title = title.clone();
        }
        if let Some(category_id) = update.category_id {
            record.category_id = Some(category_id);
        }
        if let Some(color) = &update.color_id {
            record.color_id = color.clone();
        }
        if let Some(owner_id) = update.owner_id {
            record.owner_id = Some(owner_id);
        }
        if let Some(tags) = update.tags.clone() {
            state.tags.insert(task_id, tags);
        }
        Ok(())
    }

    async fn move_task(
        &self,
        _project_id: ProjectId,
        task_id: TaskId,
        column_id: i64,
        swimlane_id: i64,
        _position: i64,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("move_task:{task_id}:{column_id}"));
        let record = state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| anyhow::anyhow!("no task {task_id}"))?;
        record.column_id = column_id;
        record.swimlane_id = swimlane_id;
        Ok(())
    }

    async fn close_task(&self, task_id: TaskId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("close_task:{task_id}"));
        Ok(())
    }

    async fn get_task_tags(&self, task_id: TaskId) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tags
            .get(&task_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_external_links(&self, task_id: TaskId) -> Result<Vec<ExternalLinkRecord>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .external_links
            .get(&task_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_internal_links(&self, task_id: TaskId) -> Result<Vec<InternalLinkRecord>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .internal_links
            .get(&task_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_internal_link(
        &self,
        task_id: TaskId,
        opposite_task_id: TaskId,
        link_type_id: i64,
    ) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        let link_id = state.next_link_id;
        state.next_link_id += 1;
        state
            .calls
            .push(format!("create_internal_link:{task_id}:{opposite_task_id}"));
        let label = LinkKind::ALL
            .iter()
            .enumerate()
            .find(|(i, _)| 31 + *i as i64 == link_type_id)
            .map(|(_, k)| k.as_str().to_string())
            .unwrap_or_default();
        state
            .internal_links
            .entry(task_id)
            .or_default()
            .push(InternalLinkRecord {
                id: link_id,
                task_id: opposite_task_id,
                label: label.clone(),
            });
        state
            .internal_links
            .entry(opposite_task_id)
            .or_default()
            .push(InternalLinkRecord {
                id: link_id + 1,
                task_id,
                label,
            });
        state.next_link_id += 1;
        Ok(link_id)
    }

    async fn create_external_link(&self, task_id: TaskId, url: &str, title: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let link_id = state.next_link_id;
        state.next_link_id += 1;
        state.calls.push(format!("create_external_link:{task_id}"));
        state
            .external_links
            .entry(task_id)
            .or_default()
            .push(ExternalLinkRecord {
                id: link_id,
                url: url.to_string(),
                title: title.to_string(),
            });
        Ok(())
    }

    async fn create_comment(&self, task_id: TaskId, _content: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_comment:{task_id}"));
        Ok(())
    }

    async fn get_actions(&self, _project_id: ProjectId) -> Result<Vec<ActionRecord>> {
        Ok(self.state.lock().unwrap().actions.clone())
    }

    async fn create_action(
        &self,
        _project_id: ProjectId,
        req: &ActionCreateRequest,
    ) -> Result<ActionId> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_action_id;
        state.next_action_id += 1;
        state
            .calls
            .push(format!("create_action:{}", req.action_name));
        state.actions.push(ActionRecord {
            id,
            event_name: req.event_name.clone(),
            action_name: req.action_name.clone(),
            params: req.params.clone(),
        });
        Ok(id)
    }

    async fn remove_action(&self, action_id: ActionId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("remove_action:{action_id}"));
        state.actions.retain(|a| a.id != action_id);
        Ok(())
    }
}

/// An in-memory [`ForgeApi`] serving a fixed set of items.
#[derive(Default)]
pub struct FakeForge {
    items: Mutex<BTreeMap<WorkItemRef, WorkItem>>,
    closers: Mutex<BTreeMap<u64, Vec<WorkItemRef>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeForge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, item: WorkItem) {
        self.items.lock().unwrap().insert(item.reference, item);
    }

    pub fn set_closers(&self, issue: u64, closing_mrs: &[u64]) {
        self.closers.lock().unwrap().insert(
            issue,
            closing_mrs
                .iter()
                .map(|&n| WorkItemRef::MergeRequest(n))
                .collect(),
        );
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn get(&self, reference: WorkItemRef) -> Result<WorkItem> {
        self.items
            .lock()
            .unwrap()
            .get(&reference)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no forge item {reference}"))
    }
}

#[async_trait]
impl ForgeApi for FakeForge {
    async fn get_issue(&self, number: u64) -> Result<WorkItem> {
        self.get(WorkItemRef::Issue(number))
    }

    async fn get_merge_request(&self, number: u64) -> Result<WorkItem> {
        self.get(WorkItemRef::MergeRequest(number))
    }

    async fn list_issues(&self, item_labels: &[&str]) -> Result<Vec<WorkItem>> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .values()
            .filter(|item| {
                !item.reference.is_merge_request()
                    && item.state == ItemState::Open
                    && item_labels.iter().all(|l| item.has_label(l))
            })
            .cloned()
            .collect())
    }

    async fn list_merge_requests(&self, item_labels: &[&str]) -> Result<Vec<WorkItem>> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .values()
            .filter(|item| {
                item.reference.is_merge_request()
                    && item.state == ItemState::Open
                    && item_labels.iter().all(|l| item.has_label(l))
            })
            .cloned()
            .collect())
    }

    async fn issue_closers(&self, number: u64) -> Result<Vec<WorkItem>> {
        let refs = self
            .closers
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .unwrap_or_default();
        refs.into_iter().map(|r| self.get(r)).collect()
    }

    async fn set_labels(&self, item: WorkItemRef, item_labels: &[String]) -> Result<()> {
        self.calls.lock().unwrap().push(format!("set_labels:{item}"));
        if let Some(stored) = self.items.lock().unwrap().get_mut(&item) {
            stored.labels = item_labels.to_vec();
        }
        Ok(())
    }

    async fn set_description(&self, item: WorkItemRef, description: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("set_description:{item}"));
        if let Some(stored) = self.items.lock().unwrap().get_mut(&item) {
            stored.description = description.to_string();
        }
        Ok(())
    }

    async fn post_comment(&self, item: WorkItemRef, _body: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("post_comment:{item}"));
        Ok(())
    }
}

pub const PROJECT_URL: &str = "https://forge.example.org/group/project";

pub fn work_item(reference: WorkItemRef, title: &str) -> WorkItem {
    WorkItem {
        reference,
        title: title.to_string(),
        state: ItemState::Open,
        author: Account {
            username: "alice".into(),
            name: "Alice Example".into(),
            active: true,
        },
        labels: Vec::new(),
        assignees: Vec::new(),
        reviewers: Vec::new(),
        upvotes: 0,
        downvotes: 0,
        has_conflicts: false,
        discussions_resolved: true,
        draft: false,
        description: String::new(),
        web_url: reference.url(PROJECT_URL),
        updated_at: Utc::now(),
    }
}

/// A listing record placed in the given column/swimlane, with the ids used
/// by `test_index::populated`. The owner is alice (the default item
/// author) so the owner field starts reconciled.
pub fn task_record(task_id: TaskId, title: &str, column: Column, swimlane: Swimlane) -> TaskRecord {
    let column_id = 1 + Column::ALL.iter().position(|&c| c == column).unwrap() as i64;
    let swimlane_id = 11 + Swimlane::ALL.iter().position(|&s| s == swimlane).unwrap() as i64;
    TaskRecord {
        id: task_id,
        title: title.to_string(),
        description: String::new(),
        column_id,
        swimlane_id,
        category_id: Some(0),
        owner_id: Some(101),
        color_id: "blue".into(),
        url: Some(format!("https://boards.example.org/task/{task_id}")),
    }
}
