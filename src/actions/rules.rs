//! The TOML rule file for automatic actions.
//!
//! Declares subtask groups and auto-tags, each with a condition over
//! column/swimlane/category and the events that trigger it. Enum-valued
//! fields use the board display names, e.g. `column = "Awaiting Review"`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::schema::{Category, Column, Swimlane};

/// Remote events an automatic action can fire on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    TaskCreate,
    TaskCreateOrUpdate,
    TaskMoveColumn,
}

impl TriggerEvent {
    pub fn event_name(self) -> &'static str {
        match self {
            TriggerEvent::TaskCreate => "task.create",
            TriggerEvent::TaskCreateOrUpdate => "task.create_update",
            TriggerEvent::TaskMoveColumn => "task.move.column",
        }
    }

    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "task.create" => Some(TriggerEvent::TaskCreate),
            "task.create_update" => Some(TriggerEvent::TaskCreateOrUpdate),
            "task.move.column" => Some(TriggerEvent::TaskMoveColumn),
            _ => None,
        }
    }
}

/// When a rule fires: all populated fields must match.
///
/// The category predicate has three states: absent (no constraint),
/// a specific category, or `exclude_categories = true` meaning the task
/// must carry no category at all.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    pub column: Option<Column>,
    pub swimlane: Option<Swimlane>,
    pub category: Option<Category>,
    #[serde(default)]
    pub exclude_categories: bool,
    #[serde(default)]
    pub allow_duplicate_subtasks: bool,
}

impl Condition {
    /// `None` when the condition does not constrain category at all;
    /// `Some(None)` for "must have no category"; `Some(Some(c))` for a
    /// specific one.
    pub fn category_predicate(&self) -> Option<Option<Category>> {
        if self.exclude_categories {
            Some(None)
        } else {
            self.category.map(Some)
        }
    }
}

/// A named group of subtasks to instantiate when the condition fires.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubtaskGroup {
    pub group_name: String,
    #[serde(default)]
    pub prefix: Option<String>,
    pub subtasks: Vec<String>,
    pub condition: Condition,
    #[serde(default)]
    pub events: Vec<TriggerEvent>,
}

impl SubtaskGroup {
    pub fn full_subtask_titles(&self) -> Vec<String> {
        self.subtasks
            .iter()
            .map(|name| match &self.prefix {
                Some(prefix) => format!("{prefix} {name}"),
                None => name.clone(),
            })
            .collect()
    }
}

/// A tag to apply automatically when the condition fires.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutoTag {
    pub tag: String,
    pub condition: Condition,
    #[serde(default)]
    pub events: Vec<TriggerEvent>,
}

/// The whole rule file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleFile {
    #[serde(default, rename = "subtask_group")]
    pub subtask_groups: Vec<SubtaskGroup>,
    #[serde(default, rename = "auto_tag")]
    pub auto_tags: Vec<AutoTag>,
}

impl RuleFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rule file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse rule file {}", path.display()))
    }
}
