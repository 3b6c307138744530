//! Reconciling declared automation rules against the remote project's
//! automatic-action entries.
//!
//! Identity between a declared rule and a remote entry is structural:
//! each remote entry is parsed into one of the known shapes (with its
//! numeric params translated back through the schema index) and compared
//! by equality. Entries that parse into no known shape are reported and
//! left untouched; the engine never destroys configuration it cannot
//! interpret.

pub mod rules;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::bail;
use futures::future::join_all;
use tracing::{info, warn};

use crate::errors::BoardError;
use crate::kanban::{ActionCreateRequest, ActionRecord, KanbanApi};
use crate::schema::{Category, Column, SchemaIndex, Swimlane};

pub use rules::{AutoTag, Condition, RuleFile, SubtaskGroup, TriggerEvent};

/// Action-name strings of the board plugins we manage.
mod plugin {
    pub const SUBTASKS_FROM_CATEGORY: &str =
        "\\Kanboard\\Plugin\\AutoSubtasks\\Action\\CategoryAutoSubtaskVanilla";
    pub const SUBTASKS_FROM_COLUMN: &str =
        "\\Kanboard\\Plugin\\AutoSubtasks\\Action\\AutoCreateSubtaskVanilla";
    pub const SUBTASKS_FROM_COLUMN_AND_CATEGORY: &str =
        "\\Kanboard\\Plugin\\AutoSubtasks\\Action\\CategoryColAutoSubtaskVanilla";
    pub const SUBTASKS_FROM_COLUMN_AND_SWIMLANE: &str =
        "\\Kanboard\\Plugin\\AutoSubtasks\\Action\\SwimlaneAutoCreateSubtaskVanilla";
    pub const SUBTASKS_FROM_COLUMN_SWIMLANE_CATEGORY: &str =
        "\\Kanboard\\Plugin\\AutoSubtasks\\Action\\SwimlaneCategoryColAutoSubtaskVanilla";
    pub const TAG_FROM_COLUMN: &str =
        "\\Kanboard\\Plugin\\TagAutomaticAction\\Action\\TaskAssignTagCol";
    pub const TAG_FROM_COLUMN_AND_SWIMLANE: &str =
        "\\Kanboard\\Plugin\\TagAutomaticAction\\Action\\TaskAssignTagColSwimlane";
}

/// Which of column/swimlane/category the entry constrains. A `None`
/// category inside a category-constrained shape means "no category".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionShape {
    SubtasksFromCategory {
        category: Option<Category>,
    },
    SubtasksFromColumn {
        column: Column,
    },
    SubtasksFromColumnAndCategory {
        column: Column,
        category: Option<Category>,
    },
    SubtasksFromColumnAndSwimlane {
        column: Column,
        swimlane: Swimlane,
    },
    SubtasksFromColumnSwimlaneCategory {
        column: Column,
        swimlane: Swimlane,
        category: Option<Category>,
    },
    TagFromColumn {
        column: Column,
    },
    TagFromColumnAndSwimlane {
        column: Column,
        swimlane: Swimlane,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionPayload {
    Subtasks {
        titles: Vec<String>,
        allow_duplicates: bool,
    },
    Tag(String),
}

/// One automation entry in schema terms, comparable structurally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAction {
    pub event: TriggerEvent,
    pub shape: ActionShape,
    pub payload: ActionPayload,
}

fn param_i64(params: &BTreeMap<String, String>, key: &str) -> Option<i64> {
    params.get(key)?.parse().ok()
}

impl ParsedAction {
    /// Translate a remote entry back into schema terms. `None` for
    /// anything we do not manage: an unknown action name, event, or a
    /// param id outside the schema.
    pub fn parse(schema: &SchemaIndex, record: &ActionRecord) -> Option<Self> {
        let event = TriggerEvent::from_event_name(&record.event_name)?;
        let params = &record.params;

        let column = || param_i64(params, "column_id").and_then(|id| schema.try_column_for_id(id));
        let swimlane =
            || param_i64(params, "swimlane_id").and_then(|id| schema.try_swimlane_for_id(id));
        let category = || -> Option<Option<Category>> {
            let id = param_i64(params, "category_id")?;
            if id == 0 {
                Some(None)
            } else {
                schema.try_category_for_id(id).map(Some)
            }
        };
        let subtasks = || -> Option<ActionPayload> {
            let titles = params
                .get("multitasktitles")?
                .split('\n')
                .map(str::to_string)
                .collect();
            let allow_duplicates = params
                .get("check_box_no_duplicates")
                .is_some_and(|v| v == "0");
            Some(ActionPayload::Subtasks {
                titles,
                allow_duplicates,
            })
        };

        let (shape, payload) = match record.action_name.as_str() {
            plugin::SUBTASKS_FROM_CATEGORY => (
                ActionShape::SubtasksFromCategory {
                    category: category()?,
                },
                subtasks()?,
            ),
            plugin::SUBTASKS_FROM_COLUMN => (
                ActionShape::SubtasksFromColumn { column: column()? },
                subtasks()?,
            ),
            plugin::SUBTASKS_FROM_COLUMN_AND_CATEGORY => (
                ActionShape::SubtasksFromColumnAndCategory {
                    column: column()?,
                    category: category()?,
                },
                subtasks()?,
            ),
            plugin::SUBTASKS_FROM_COLUMN_AND_SWIMLANE => (
                ActionShape::SubtasksFromColumnAndSwimlane {
                    column: column()?,
                    swimlane: swimlane()?,
                },
                subtasks()?,
            ),
            plugin::SUBTASKS_FROM_COLUMN_SWIMLANE_CATEGORY => (
                ActionShape::SubtasksFromColumnSwimlaneCategory {
                    column: column()?,
                    swimlane: swimlane()?,
                    category: category()?,
                },
                subtasks()?,
            ),
            plugin::TAG_FROM_COLUMN => (
                ActionShape::TagFromColumn { column: column()? },
                ActionPayload::Tag(params.get("tag")?.clone()),
            ),
            plugin::TAG_FROM_COLUMN_AND_SWIMLANE => (
                ActionShape::TagFromColumnAndSwimlane {
                    column: column()?,
                    swimlane: swimlane()?,
                },
                ActionPayload::Tag(params.get("tag")?.clone()),
            ),
            _ => return None,
        };
        Some(ParsedAction {
            event,
            shape,
            payload,
        })
    }

    /// The creation request for this entry, with ids from the schema.
    pub fn to_request(&self, schema: &SchemaIndex) -> Result<ActionCreateRequest, BoardError> {
        let mut params: BTreeMap<String, String> = BTreeMap::new();
        let action_name = match &self.shape {
            ActionShape::SubtasksFromCategory { category } => {
                params.insert(
                    "category_id".into(),
                    schema.optional_category_id(*category)?.to_string(),
                );
                plugin::SUBTASKS_FROM_CATEGORY
            }
            ActionShape::SubtasksFromColumn { column } => {
                params.insert("column_id".into(), schema.column_id(*column)?.to_string());
                params.insert("check_box_all_columns".into(), "0".into());
                plugin::SUBTASKS_FROM_COLUMN
            }
            ActionShape::SubtasksFromColumnAndCategory { column, category } => {
                params.insert("column_id".into(), schema.column_id(*column)?.to_string());
                params.insert(
                    "category_id".into(),
                    schema.optional_category_id(*category)?.to_string(),
                );
                plugin::SUBTASKS_FROM_COLUMN_AND_CATEGORY
            }
            ActionShape::SubtasksFromColumnAndSwimlane { column, swimlane } => {
                params.insert("column_id".into(), schema.column_id(*column)?.to_string());
                params.insert(
                    "swimlane_id".into(),
                    schema.swimlane_id(*swimlane)?.to_string(),
                );
                plugin::SUBTASKS_FROM_COLUMN_AND_SWIMLANE
            }
            ActionShape::SubtasksFromColumnSwimlaneCategory {
                column,
                swimlane,
                category,
            } => {
                params.insert("column_id".into(), schema.column_id(*column)?.to_string());
                params.insert(
                    "swimlane_id".into(),
                    schema.swimlane_id(*swimlane)?.to_string(),
                );
                params.insert(
                    "category_id".into(),
                    schema.optional_category_id(*category)?.to_string(),
                );
                plugin::SUBTASKS_FROM_COLUMN_SWIMLANE_CATEGORY
            }
            ActionShape::TagFromColumn { column } => {
                params.insert("column_id".into(), schema.column_id(*column)?.to_string());
                plugin::TAG_FROM_COLUMN
            }
            ActionShape::TagFromColumnAndSwimlane { column, swimlane } => {
                params.insert("column_id".into(), schema.column_id(*column)?.to_string());
                params.insert(
                    "swimlane_id".into(),
                    schema.swimlane_id(*swimlane)?.to_string(),
                );
                plugin::TAG_FROM_COLUMN_AND_SWIMLANE
            }
        };
        match &self.payload {
            ActionPayload::Subtasks {
                titles,
                allow_duplicates,
            } => {
                params.insert("user_id".into(), "0".into());
                params.insert("time_estimated".into(), "0".into());
                params.insert("multitasktitles".into(), titles.join("\n"));
                params.insert(
                    "check_box_no_duplicates".into(),
                    if *allow_duplicates { "0" } else { "1" }.into(),
                );
            }
            ActionPayload::Tag(tag) => {
                params.insert("tag".into(), tag.clone());
            }
        }
        Ok(ActionCreateRequest {
            event_name: self.event.event_name().to_string(),
            action_name: action_name.to_string(),
            params,
        })
    }
}

fn shape_from_condition(
    condition: &Condition,
    context: &str,
    for_tag: bool,
) -> anyhow::Result<ActionShape> {
    let category = condition.category_predicate();
    if for_tag {
        return match (condition.column, condition.swimlane, category) {
            (Some(column), None, None) => Ok(ActionShape::TagFromColumn { column }),
            (Some(column), Some(swimlane), None) => {
                Ok(ActionShape::TagFromColumnAndSwimlane { column, swimlane })
            }
            _ => bail!("auto-tag rule '{context}' needs a column condition and no category"),
        };
    }
    match (condition.column, condition.swimlane, category) {
        (None, None, Some(category)) => Ok(ActionShape::SubtasksFromCategory { category }),
        (Some(column), None, None) => Ok(ActionShape::SubtasksFromColumn { column }),
        (Some(column), None, Some(category)) => {
            Ok(ActionShape::SubtasksFromColumnAndCategory { column, category })
        }
        (Some(column), Some(swimlane), None) => {
            Ok(ActionShape::SubtasksFromColumnAndSwimlane { column, swimlane })
        }
        (Some(column), Some(swimlane), Some(category)) => {
            Ok(ActionShape::SubtasksFromColumnSwimlaneCategory {
                column,
                swimlane,
                category,
            })
        }
        _ => bail!("subtask rule '{context}' has a condition no action shape can express"),
    }
}

/// Expand the rule file into the expected automation entries, one per
/// rule per trigger event.
pub fn expected_from_rules(rules: &RuleFile) -> anyhow::Result<Vec<ParsedAction>> {
    let mut expected = Vec::new();
    for group in &rules.subtask_groups {
        let shape = shape_from_condition(&group.condition, &group.group_name, false)?;
        let payload = ActionPayload::Subtasks {
            titles: group.full_subtask_titles(),
            allow_duplicates: group.condition.allow_duplicate_subtasks,
        };
        for &event in &group.events {
            expected.push(ParsedAction {
                event,
                shape: shape.clone(),
                payload: payload.clone(),
            });
        }
    }
    for auto_tag in &rules.auto_tags {
        let shape = shape_from_condition(&auto_tag.condition, &auto_tag.tag, true)?;
        for &event in &auto_tag.events {
            expected.push(ParsedAction {
                event,
                shape: shape.clone(),
                payload: ActionPayload::Tag(auto_tag.tag.clone()),
            });
        }
    }
    Ok(expected)
}

/// What one action-sync run did (or would do, under dry run).
#[derive(Debug, Default)]
pub struct ActionSyncReport {
    pub matched: usize,
    pub unparsed: usize,
    pub scheduled_removals: usize,
    pub removed: usize,
    pub created: usize,
}

/// Reconcile the remote automation entries against the expected list.
///
/// Remote entries are visited in ascending action-id order so duplicate
/// resolution does not depend on the server's listing order: the
/// lowest-id entry matching a rule is kept.
pub async fn sync_actions(
    api: &dyn KanbanApi,
    schema: &SchemaIndex,
    expected: &[ParsedAction],
    remove_unexpected: bool,
    dry_run: bool,
) -> Result<ActionSyncReport, BoardError> {
    let mut records = api.get_actions(schema.project_id).await?;
    records.sort_by_key(|r| r.id);

    let mut report = ActionSyncReport::default();
    let mut matched_indices: BTreeSet<usize> = BTreeSet::new();
    let mut to_remove = Vec::new();

    for record in &records {
        let Some(parsed) = ParsedAction::parse(schema, record) else {
            warn!(
                action_id = record.id,
                action_name = %record.action_name,
                "leaving unrecognized automation entry untouched"
            );
            report.unparsed += 1;
            continue;
        };
        match expected.iter().position(|e| *e == parsed) {
            None => {
                info!(action_id = record.id, "automation entry matches no rule");
                to_remove.push(record.id);
            }
            Some(index) if matched_indices.contains(&index) => {
                info!(
                    action_id = record.id,
                    rule_index = index,
                    "automation entry duplicates an already matched rule"
                );
                to_remove.push(record.id);
            }
            Some(index) => {
                matched_indices.insert(index);
                report.matched += 1;
            }
        }
    }

    report.scheduled_removals = to_remove.len();
    if !to_remove.is_empty() {
        if !remove_unexpected {
            info!(count = to_remove.len(), "not removing entries (removal not requested)");
        } else if dry_run {
            info!(count = to_remove.len(), "dry run: would remove automation entries");
        } else {
            info!(count = to_remove.len(), "removing automation entries");
            let results = join_all(to_remove.iter().map(|&id| api.remove_action(id))).await;
            for (id, result) in to_remove.iter().zip(results) {
                match result {
                    Ok(()) => report.removed += 1,
                    Err(err) => warn!(action_id = id, error = %err, "failed to remove entry"),
                }
            }
        }
    }

    let missing: Vec<&ParsedAction> = expected
        .iter()
        .enumerate()
        .filter(|(i, _)| !matched_indices.contains(i))
        .map(|(_, e)| e)
        .collect();
    if !missing.is_empty() {
        if dry_run {
            info!(count = missing.len(), "dry run: would create automation entries");
        } else {
            info!(count = missing.len(), "creating automation entries");
            let mut requests = Vec::with_capacity(missing.len());
            for action in &missing {
                requests.push(action.to_request(schema)?);
            }
            let results = join_all(
                requests
                    .iter()
                    .map(|req| api.create_action(schema.project_id, req)),
            )
            .await;
            for (req, result) in requests.iter().zip(results) {
                match result {
                    Ok(_) => report.created += 1,
                    Err(err) => warn!(
                        action_name = %req.action_name,
                        error = %err,
                        "failed to create entry"
                    ),
                }
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::test_index;
    use crate::testutil::FakeKanban;

    fn expected_tag_rule() -> ParsedAction {
        ParsedAction {
            event: TriggerEvent::TaskMoveColumn,
            shape: ActionShape::TagFromColumn {
                column: Column::NeedsRevisions,
            },
            payload: ActionPayload::Tag("Needs Author Action".into()),
        }
    }

    /// Remote params matching `expected_tag_rule` under the test index.
    fn tag_rule_params(schema: &SchemaIndex) -> Vec<(String, String)> {
        vec![
            (
                "column_id".to_string(),
                schema.column_id(Column::NeedsRevisions).unwrap().to_string(),
            ),
            ("tag".to_string(), "Needs Author Action".to_string()),
        ]
    }

    #[tokio::test]
    async fn duplicate_entries_keep_only_the_lowest_id() {
        let api = FakeKanban::new();
        let schema = test_index::populated();
        let params = tag_rule_params(&schema);
        let param_refs: Vec<(&str, &str)> =
            params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let first = api.add_action(
            "task.move.column",
            super::plugin::TAG_FROM_COLUMN,
            &param_refs,
        );
        let second = api.add_action(
            "task.move.column",
            super::plugin::TAG_FROM_COLUMN,
            &param_refs,
        );
        assert!(first < second);

        let expected = vec![expected_tag_rule()];
        let report = sync_actions(&api, &schema, &expected, true, false)
            .await
            .unwrap();

        assert_eq!(report.matched, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(report.created, 0);
        let remaining = api.actions();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, first);
    }

    #[tokio::test]
    async fn unrecognized_entries_are_never_removed() {
        let api = FakeKanban::new();
        let schema = test_index::populated();
        api.add_action(
            "task.move.column",
            "\\Kanboard\\Action\\TaskAssignCurrentUserColumn",
            &[("column_id", "4")],
        );

        let report = sync_actions(&api, &schema, &[], true, false).await.unwrap();
        assert_eq!(report.unparsed, 1);
        assert_eq!(report.removed, 0);
        assert_eq!(api.actions().len(), 1);
    }

    #[tokio::test]
    async fn missing_rules_are_created_and_parse_back() {
        let api = FakeKanban::new();
        let schema = test_index::populated();
        let expected = vec![expected_tag_rule()];

        let report = sync_actions(&api, &schema, &expected, false, false)
            .await
            .unwrap();
        assert_eq!(report.created, 1);

        let created = &api.actions()[0];
        let parsed = ParsedAction::parse(&schema, created).unwrap();
        assert_eq!(parsed, expected[0]);

        // A second run matches what the first created.
        let report = sync_actions(&api, &schema, &expected, true, false)
            .await
            .unwrap();
        assert_eq!(report.matched, 1);
        assert_eq!(report.created, 0);
        assert_eq!(report.removed, 0);
    }

    #[tokio::test]
    async fn dry_run_schedules_but_does_not_mutate() {
        let api = FakeKanban::new();
        let schema = test_index::populated();
        api.add_action(
            "task.create_update",
            super::plugin::SUBTASKS_FROM_COLUMN,
            &[
                ("column_id", "2"),
                ("multitasktitles", "orphan subtask"),
                ("check_box_no_duplicates", "1"),
            ],
        );

        let expected = vec![expected_tag_rule()];
        let report = sync_actions(&api, &schema, &expected, true, true).await.unwrap();
        assert_eq!(report.scheduled_removals, 1);
        assert_eq!(report.removed, 0);
        assert_eq!(report.created, 0);
        assert_eq!(api.actions().len(), 1);
        assert!(api.calls_matching("create_action").is_empty());
    }

    #[test]
    fn rule_file_expands_per_event() {
        let toml = r#"
[[subtask_group]]
group_name = "contractor checklist"
subtasks = ["Verify CTS run", "Record results"]
events = ["task_create_or_update", "task_move_column"]

[subtask_group.condition]
column = "In Progress"
category = "Contractor Work"
"#;
        let rules: RuleFile = toml::from_str(toml).unwrap();
        let expected = expected_from_rules(&rules).unwrap();
        assert_eq!(expected.len(), 2);
        assert_eq!(expected[0].shape, expected[1].shape);
        assert_eq!(
            expected[0].shape,
            ActionShape::SubtasksFromColumnAndCategory {
                column: Column::InProgress,
                category: Some(Category::Contractor),
            }
        );
        assert_ne!(expected[0].event, expected[1].event);
    }

    #[test]
    fn swimlane_without_column_is_rejected() {
        let rules = RuleFile {
            subtask_groups: vec![SubtaskGroup {
                group_name: "bad".into(),
                prefix: None,
                subtasks: vec!["x".into()],
                condition: Condition {
                    swimlane: Some(Swimlane::General),
                    ..Default::default()
                },
                events: vec![TriggerEvent::TaskMoveColumn],
            }],
            auto_tags: Vec::new(),
        };
        assert!(expected_from_rules(&rules).is_err());
    }

    #[test]
    fn exclude_categories_round_trips_through_sentinel() {
        let schema = test_index::populated();
        let action = ParsedAction {
            event: TriggerEvent::TaskCreateOrUpdate,
            shape: ActionShape::SubtasksFromCategory { category: None },
            payload: ActionPayload::Subtasks {
                titles: vec!["triage".into()],
                allow_duplicates: false,
            },
        };
        let request = action.to_request(&schema).unwrap();
        assert_eq!(request.params.get("category_id").unwrap(), "0");

        let record = ActionRecord {
            id: 1,
            event_name: request.event_name.clone(),
            action_name: request.action_name.clone(),
            params: request.params.clone(),
        };
        assert_eq!(ParsedAction::parse(&schema, &record).unwrap(), action);
    }
}
