//! Forge (issue/merge-request tracker) API surface.
//!
//! The forge is the source of truth for reconciliation: work item state,
//! labels, votes, and review activity flow from here onto the board. The
//! engine sees the forge only through [`ForgeApi`]; [`client::ForgeClient`]
//! is the REST implementation.

pub mod client;
pub mod refs;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use anyhow::Result;

pub use client::{ForgeClient, ForgeConfig};
pub use refs::RefPatterns;

/// Forge label names the engine interprets.
pub mod labels {
    pub const CONTRACTOR_APPROVED: &str = "Contractor:Approved";
    pub const CONFORMANCE: &str = "Conformance Implementation";
    pub const NEEDS_AUTHOR_ACTION: &str = "Needs Author Action";
    pub const API_FROZEN: &str = "api-frozen";
    pub const INITIAL_SPEC_REVIEW_COMPLETE: &str = "initial-review-complete";
    pub const INITIAL_DESIGN_REVIEW_COMPLETE: &str = "initial-design-review-complete";
}

/// A kind-tagged reference to one forge work item. The issue/MR decision
/// is made here, once, at the API boundary; everything downstream matches
/// on the variant instead of probing attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkItemRef {
    Issue(u64),
    MergeRequest(u64),
}

impl WorkItemRef {
    /// Parse a short ref like `#123` or `!45`.
    pub fn parse_short(short: &str) -> Option<Self> {
        if let Some(digits) = short.strip_prefix('#') {
            return digits.parse().ok().map(WorkItemRef::Issue);
        }
        if let Some(digits) = short.strip_prefix('!') {
            return digits.parse().ok().map(WorkItemRef::MergeRequest);
        }
        None
    }

    pub fn short_ref(&self) -> String {
        match self {
            WorkItemRef::Issue(n) => format!("#{n}"),
            WorkItemRef::MergeRequest(n) => format!("!{n}"),
        }
    }

    /// Display kind, e.g. "Issue #123" / "MR !45".
    pub fn describe(&self) -> String {
        match self {
            WorkItemRef::Issue(n) => format!("Issue #{n}"),
            WorkItemRef::MergeRequest(n) => format!("MR !{n}"),
        }
    }

    pub fn number(&self) -> u64 {
        match self {
            WorkItemRef::Issue(n) | WorkItemRef::MergeRequest(n) => *n,
        }
    }

    pub fn is_merge_request(&self) -> bool {
        matches!(self, WorkItemRef::MergeRequest(_))
    }

    /// Web URL under the given project base URL (no trailing slash).
    pub fn url(&self, project_base: &str) -> String {
        match self {
            WorkItemRef::Issue(n) => format!("{project_base}/issues/{n}"),
            WorkItemRef::MergeRequest(n) => format!("{project_base}/merge_requests/{n}"),
        }
    }
}

impl std::fmt::Display for WorkItemRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.short_ref())
    }
}

/// Lifecycle state of a work item. Issues never report `Merged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Open,
    Closed,
    Merged,
}

impl ItemState {
    /// Closed and merged items are both "finished" for column moves and
    /// description edits.
    pub fn is_finished(self) -> bool {
        matches!(self, ItemState::Closed | ItemState::Merged)
    }
}

/// A forge user as attached to an item (author, assignee, reviewer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub name: String,
    pub active: bool,
}

/// One forge work item with everything reconciliation consumes.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub reference: WorkItemRef,
    pub title: String,
    pub state: ItemState,
    pub author: Account,
    pub labels: Vec<String>,
    pub assignees: Vec<Account>,
    /// Empty for issues.
    pub reviewers: Vec<Account>,
    pub upvotes: i64,
    pub downvotes: i64,
    pub has_conflicts: bool,
    pub discussions_resolved: bool,
    pub draft: bool,
    pub description: String,
    pub web_url: String,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// The task title this item should carry on the board: kind and short
    /// ref, state markers, then the item's own title.
    ///
    /// Markers, in order: `(CLOSED)`/`(MERGED)`, one thumb per vote (MRs
    /// only), a conflict warning, an author-action marker, an
    /// unresolved-discussions marker.
    pub fn decorated_title(&self) -> String {
        let mut markers: Vec<String> = Vec::new();
        match self.state {
            ItemState::Closed => markers.push("(CLOSED)".to_string()),
            ItemState::Merged => markers.push("(MERGED)".to_string()),
            ItemState::Open => {}
        }
        if self.reference.is_merge_request() {
            if self.upvotes > 0 {
                markers.push("👍".repeat(self.upvotes as usize));
            }
            if self.downvotes > 0 {
                markers.push("👎".repeat(self.downvotes as usize));
            }
        }
        if self.has_conflicts {
            markers.push("⚠️".to_string());
        }
        if self.has_label(labels::NEEDS_AUTHOR_ACTION) {
            markers.push("🚧".to_string());
        }
        if !self.discussions_resolved {
            markers.push("💬".to_string());
        }

        let state_str = if markers.is_empty() {
            String::new()
        } else {
            format!("{} ", markers.join(" "))
        };
        format!("{}: {state_str}{}", self.reference.describe(), self.title)
    }
}

/// Everything the engine needs from the forge.
#[async_trait]
pub trait ForgeApi: Send + Sync {
    async fn get_issue(&self, number: u64) -> Result<WorkItem>;
    async fn get_merge_request(&self, number: u64) -> Result<WorkItem>;

    /// List open items carrying all of the given labels.
    async fn list_issues(&self, item_labels: &[&str]) -> Result<Vec<WorkItem>>;
    async fn list_merge_requests(&self, item_labels: &[&str]) -> Result<Vec<WorkItem>>;

    /// Merge requests that will close the given issue when merged.
    async fn issue_closers(&self, number: u64) -> Result<Vec<WorkItem>>;

    async fn set_labels(&self, item: WorkItemRef, item_labels: &[String]) -> Result<()>;
    async fn set_description(&self, item: WorkItemRef, description: &str) -> Result<()>;
    async fn post_comment(&self, item: WorkItemRef, body: &str) -> Result<()>;
}

/// Fetch whichever kind the ref names.
pub async fn fetch_item(api: &dyn ForgeApi, reference: WorkItemRef) -> Result<WorkItem> {
    match reference {
        WorkItemRef::Issue(n) => api.get_issue(n).await,
        WorkItemRef::MergeRequest(n) => api.get_merge_request(n).await,
    }
}
