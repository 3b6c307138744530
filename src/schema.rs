//! Board schema enums and the name<->id index.
//!
//! The workflow vocabulary (columns, swimlanes, categories, tags, link
//! kinds) is a fixed, compile-time set. The remote board assigns numeric
//! ids to each value; the [`SchemaIndex`] is the one place those ids are
//! learned, in a single concurrent fetch at startup. A value we expect
//! that the board does not carry is an operator error and surfaces as
//! [`BoardError::SchemaLookup`], never silently tolerated.

use std::collections::HashMap;

use serde::Deserialize;

use crate::errors::BoardError;
use crate::kanban::{KanbanApi, ProjectId};

/// Workflow stages on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Column {
    Backlog,
    OnHold,
    InProgress,
    AwaitingReview,
    InReview,
    NeedsRevisions,
    Done,
}

impl Column {
    pub const ALL: [Column; 7] = [
        Column::Backlog,
        Column::OnHold,
        Column::InProgress,
        Column::AwaitingReview,
        Column::InReview,
        Column::NeedsRevisions,
        Column::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Column::Backlog => "Backlog",
            Column::OnHold => "On Hold",
            Column::InProgress => "In Progress",
            Column::AwaitingReview => "Awaiting Review",
            Column::InReview => "In Review",
            Column::NeedsRevisions => "Needs Revisions",
            Column::Done => "Done",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

/// Review tracks, orthogonal to column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Swimlane {
    SpecReview,
    DesignReview,
    General,
}

impl Swimlane {
    pub const ALL: [Swimlane; 3] = [Swimlane::SpecReview, Swimlane::DesignReview, Swimlane::General];

    pub fn as_str(self) -> &'static str {
        match self {
            Swimlane::SpecReview => "Spec Review",
            Swimlane::DesignReview => "Design Review",
            Swimlane::General => "General",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }
}

/// Policy categorization, optional per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Category {
    Contractor,
    OutsideIprPolicy,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Contractor, Category::OutsideIprPolicy];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Contractor => "Contractor Work",
            Category::OutsideIprPolicy => "Outside IPR Policy",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

/// Tags whose presence or absence the engine interprets as boolean flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskTag {
    BlockedOnSpec,
    ContractorReviewed,
    ApiFrozen,
    InitialSpecReviewComplete,
    InitialDesignReviewComplete,
    NeedsAuthorAction,
}

impl TaskTag {
    pub const ALL: [TaskTag; 6] = [
        TaskTag::BlockedOnSpec,
        TaskTag::ContractorReviewed,
        TaskTag::ApiFrozen,
        TaskTag::InitialSpecReviewComplete,
        TaskTag::InitialDesignReviewComplete,
        TaskTag::NeedsAuthorAction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskTag::BlockedOnSpec => "Blocked on Spec",
            TaskTag::ContractorReviewed => "Reviewed by Contractor",
            TaskTag::ApiFrozen => "API Frozen",
            TaskTag::InitialSpecReviewComplete => "Initial Spec Review Complete",
            TaskTag::InitialDesignReviewComplete => "Initial Design Review Complete",
            TaskTag::NeedsAuthorAction => "Needs Author Action",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

/// Typed relations between two tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    RelatesTo,
    Blocks,
    IsBlockedBy,
    Duplicates,
    IsDuplicatedBy,
}

impl LinkKind {
    pub const ALL: [LinkKind; 5] = [
        LinkKind::RelatesTo,
        LinkKind::Blocks,
        LinkKind::IsBlockedBy,
        LinkKind::Duplicates,
        LinkKind::IsDuplicatedBy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LinkKind::RelatesTo => "relates to",
            LinkKind::Blocks => "blocks",
            LinkKind::IsBlockedBy => "is blocked by",
            LinkKind::Duplicates => "duplicates",
            LinkKind::IsDuplicatedBy => "is duplicated by",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

macro_rules! display_via_as_str {
    ($($ty:ty),+) => {$(
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
        impl TryFrom<String> for $ty {
            type Error = String;
            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::from_name(&value)
                    .ok_or_else(|| format!("unrecognized {}: '{value}'", stringify!($ty)))
            }
        }
    )+};
}
display_via_as_str!(Column, Swimlane, Category, TaskTag, LinkKind);

/// Remote category id 0 encodes "no category" on update calls, distinct
/// from leaving the field unset.
pub const NO_CATEGORY_ID: i64 = 0;

/// Name<->id maps for one remote project, populated once per run.
///
/// Read-only after [`SchemaIndex::fetch`]; never partially refreshed. A
/// stale index after concurrent remote schema edits is an accepted
/// limitation.
#[derive(Debug, Default)]
pub struct SchemaIndex {
    pub project_id: ProjectId,
    columns: HashMap<Column, i64>,
    columns_by_id: HashMap<i64, Column>,
    swimlanes: HashMap<Swimlane, i64>,
    swimlanes_by_id: HashMap<i64, Swimlane>,
    categories: HashMap<Category, i64>,
    categories_by_id: HashMap<i64, Category>,
    tags: HashMap<String, i64>,
    link_types: HashMap<LinkKind, i64>,
    users_by_username: HashMap<String, i64>,
    usernames_by_id: HashMap<i64, String>,
}

impl SchemaIndex {
    /// Fetch every schema dimension in one concurrent batch and build the
    /// maps. Idempotent; the last call's data wins wholesale.
    pub async fn fetch(api: &dyn KanbanApi, project_id: ProjectId) -> Result<Self, BoardError> {
        let (columns, swimlanes, categories, tags, link_types, users) = tokio::try_join!(
            api.get_columns(project_id),
            api.get_swimlanes(project_id),
            api.get_categories(project_id),
            api.get_tags(project_id),
            api.get_link_types(),
            api.get_users(),
        )?;

        let mut index = SchemaIndex {
            project_id,
            ..Default::default()
        };
        for col in columns {
            // Remote columns outside our vocabulary are ignored here;
            // a task sitting in one shows up as UnknownRemoteId at load.
            if let Some(column) = Column::from_name(&col.name) {
                index.columns.insert(column, col.id);
                index.columns_by_id.insert(col.id, column);
            }
        }
        for lane in swimlanes {
            if let Some(swimlane) = Swimlane::from_name(&lane.name) {
                index.swimlanes.insert(swimlane, lane.id);
                index.swimlanes_by_id.insert(lane.id, swimlane);
            }
        }
        for cat in categories {
            if let Some(category) = Category::from_name(&cat.name) {
                index.categories.insert(category, cat.id);
                index.categories_by_id.insert(cat.id, category);
            }
        }
        for tag in tags {
            index.tags.insert(tag.name, tag.id);
        }
        for lt in link_types {
            if let Some(kind) = LinkKind::from_name(&lt.name) {
                index.link_types.insert(kind, lt.id);
            }
        }
        for user in users {
            index.users_by_username.insert(user.username.clone(), user.id);
            index.usernames_by_id.insert(user.id, user.username);
        }
        Ok(index)
    }

    pub fn column_id(&self, column: Column) -> Result<i64, BoardError> {
        self.columns
            .get(&column)
            .copied()
            .ok_or_else(|| BoardError::SchemaLookup {
                kind: "column",
                name: column.as_str().to_string(),
            })
    }

    pub fn column_for_id(&self, id: i64) -> Result<Column, BoardError> {
        self.columns_by_id
            .get(&id)
            .copied()
            .ok_or(BoardError::UnknownRemoteId { kind: "column", id })
    }

    pub fn swimlane_id(&self, swimlane: Swimlane) -> Result<i64, BoardError> {
        self.swimlanes
            .get(&swimlane)
            .copied()
            .ok_or_else(|| BoardError::SchemaLookup {
                kind: "swimlane",
                name: swimlane.as_str().to_string(),
            })
    }

    pub fn swimlane_for_id(&self, id: i64) -> Result<Swimlane, BoardError> {
        self.swimlanes_by_id
            .get(&id)
            .copied()
            .ok_or(BoardError::UnknownRemoteId { kind: "swimlane", id })
    }

    pub fn category_id(&self, category: Category) -> Result<i64, BoardError> {
        self.categories
            .get(&category)
            .copied()
            .ok_or_else(|| BoardError::SchemaLookup {
                kind: "category",
                name: category.as_str().to_string(),
            })
    }

    /// Translate an optional category for an update call, mapping `None`
    /// to the remote "no category" sentinel.
    pub fn optional_category_id(&self, category: Option<Category>) -> Result<i64, BoardError> {
        match category {
            Some(cat) => self.category_id(cat),
            None => Ok(NO_CATEGORY_ID),
        }
    }

    /// Decode a listed category id; the sentinel means "no category".
    pub fn category_for_id(&self, id: i64) -> Result<Option<Category>, BoardError> {
        if id == NO_CATEGORY_ID {
            return Ok(None);
        }
        self.categories_by_id
            .get(&id)
            .copied()
            .map(Some)
            .ok_or(BoardError::UnknownRemoteId { kind: "category", id })
    }

    pub fn tag_id(&self, name: &str) -> Result<i64, BoardError> {
        self.tags
            .get(name)
            .copied()
            .ok_or_else(|| BoardError::SchemaLookup {
                kind: "tag",
                name: name.to_string(),
            })
    }

    pub fn link_type_id(&self, kind: LinkKind) -> Result<i64, BoardError> {
        self.link_types
            .get(&kind)
            .copied()
            .ok_or_else(|| BoardError::SchemaLookup {
                kind: "link type",
                name: kind.as_str().to_string(),
            })
    }

    pub fn user_id_for_username(&self, username: &str) -> Option<i64> {
        self.users_by_username.get(username).copied()
    }

    pub fn username_for_id(&self, id: i64) -> Option<&str> {
        self.usernames_by_id.get(&id).map(String::as_str)
    }

    /// Reverse column lookup for automation-entry parsing: `None` when the
    /// id belongs to a column outside our vocabulary.
    pub fn try_column_for_id(&self, id: i64) -> Option<Column> {
        self.columns_by_id.get(&id).copied()
    }

    pub fn try_swimlane_for_id(&self, id: i64) -> Option<Swimlane> {
        self.swimlanes_by_id.get(&id).copied()
    }

    pub fn try_category_for_id(&self, id: i64) -> Option<Category> {
        self.categories_by_id.get(&id).copied()
    }
}
