//! Wire records for the kanban API.
//!
//! The kanban server returns most numeric fields as JSON strings, so every
//! id/number field deserializes through [`string_or_int`]. Only the fields
//! the reconciliation engine consumes are modeled.

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

pub type ProjectId = i64;
pub type TaskId = i64;
pub type ActionId = i64;

/// Accept either `5` or `"5"`, which the kanban API emits interchangeably.
pub fn string_or_int<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Int(v) => Ok(v),
        Raw::Str(s) => s.parse::<i64>().map_err(serde::de::Error::custom),
    }
}

fn opt_string_or_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(String),
        None,
    }
    match Option::<Raw>::deserialize(deserializer)? {
        None | Some(Raw::None) => Ok(None),
        Some(Raw::Int(v)) => Ok(Some(v)),
        Some(Raw::Str(s)) => {
            if s.is_empty() {
                Ok(None)
            } else {
                s.parse::<i64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
    }
}

/// A name/id pair: columns, swimlanes, categories, tags, link types.
///
/// Columns use `title` where the other dimensions use `name`; alias both.
#[derive(Debug, Clone, Deserialize)]
pub struct NamedId {
    #[serde(deserialize_with = "string_or_int")]
    pub id: i64,
    #[serde(alias = "title")]
    pub name: String,
}

/// A board user, for owner reconciliation.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    #[serde(deserialize_with = "string_or_int")]
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub name: String,
}

/// A project, as returned by the get-project calls.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectRecord {
    #[serde(deserialize_with = "string_or_int")]
    pub id: ProjectId,
    pub name: String,
}

/// One task as returned by the bulk listing or get-by-id calls.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskRecord {
    #[serde(deserialize_with = "string_or_int")]
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(deserialize_with = "string_or_int")]
    pub column_id: i64,
    #[serde(deserialize_with = "string_or_int")]
    pub swimlane_id: i64,
    #[serde(default, deserialize_with = "opt_string_or_int")]
    pub category_id: Option<i64>,
    #[serde(default, deserialize_with = "opt_string_or_int")]
    pub owner_id: Option<i64>,
    #[serde(default)]
    pub color_id: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// One external (web) link attached to a task.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalLinkRecord {
    #[serde(deserialize_with = "string_or_int")]
    pub id: i64,
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// One internal task-to-task link, as listed from a task's perspective.
#[derive(Debug, Clone, Deserialize)]
pub struct InternalLinkRecord {
    /// The link record's own id, needed for removal.
    #[serde(deserialize_with = "string_or_int")]
    pub id: i64,
    /// The task at the other end.
    #[serde(deserialize_with = "string_or_int")]
    pub task_id: TaskId,
    /// Relation label, e.g. "is blocked by".
    pub label: String,
}

/// One automation entry configured on the project.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRecord {
    #[serde(deserialize_with = "string_or_int")]
    pub id: ActionId,
    pub event_name: String,
    pub action_name: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// Request body for task creation. All placement is supplied atomically.
#[derive(Debug, Clone)]
pub struct TaskCreateRequest {
    pub project_id: ProjectId,
    pub title: String,
    pub description: String,
    pub column_id: i64,
    pub swimlane_id: i64,
    pub category_id: Option<i64>,
    pub color_id: String,
    pub tags: Vec<String>,
}

/// Partial update: only populated fields are sent.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub category_id: Option<i64>,
    pub tags: Option<Vec<String>>,
    pub color_id: Option<String>,
    pub owner_id: Option<i64>,
}

/// Request body for automation entry creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCreateRequest {
    pub event_name: String,
    pub action_name: String,
    pub params: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_record_accepts_stringly_ids() {
        let json = r#"{
            "id": "37",
            "title": "MR !100: Add action sets",
            "description": "",
            "column_id": "4",
            "swimlane_id": 2,
            "category_id": "0",
            "owner_id": "",
            "color_id": "blue",
            "url": "https://boards.example.org/task/37"
        }"#;
        let rec: TaskRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.id, 37);
        assert_eq!(rec.column_id, 4);
        assert_eq!(rec.swimlane_id, 2);
        assert_eq!(rec.category_id, Some(0));
        assert_eq!(rec.owner_id, None);
    }

    #[test]
    fn task_record_null_category() {
        let json = r#"{"id":1,"title":"t","column_id":1,"swimlane_id":1,"category_id":null}"#;
        let rec: TaskRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.category_id, None);
    }

    #[test]
    fn named_id_accepts_title_alias() {
        let col: NamedId = serde_json::from_str(r#"{"id":"3","title":"Awaiting Review"}"#).unwrap();
        assert_eq!(col.id, 3);
        assert_eq!(col.name, "Awaiting Review");
        let tag: NamedId = serde_json::from_str(r#"{"id":9,"name":"API Frozen"}"#).unwrap();
        assert_eq!(tag.name, "API Frozen");
    }

    #[test]
    fn action_record_params_deserialize() {
        let json = r#"{
            "id": "12",
            "event_name": "task.move.column",
            "action_name": "\\Kanboard\\Plugin\\AutoSubtasks\\Action\\AutoCreateSubtaskVanilla",
            "params": {"column_id": "4", "multitasktitles": "Review spec\nRun CTS"}
        }"#;
        let rec: ActionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.id, 12);
        assert_eq!(rec.params.get("column_id").unwrap(), "4");
    }
}
