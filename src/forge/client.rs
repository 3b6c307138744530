//! REST client for a GitLab-style forge (API v4).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{Account, ForgeApi, ItemState, WorkItem, WorkItemRef};

/// Connection settings for the forge, loaded from the environment.
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    /// Server base URL, e.g. `https://forge.example.org`.
    pub url: String,
    pub token: String,
    /// Project path, e.g. `group/project`.
    pub project: String,
}

impl ForgeConfig {
    /// Read `FORGE_URL`, `FORGE_TOKEN`, and `FORGE_PROJECT`.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("FORGE_URL").context("FORGE_URL is not set")?;
        let token = std::env::var("FORGE_TOKEN").context("FORGE_TOKEN is not set")?;
        let project = std::env::var("FORGE_PROJECT").context("FORGE_PROJECT is not set")?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            token,
            project,
        })
    }

    /// Web URL of the project, for building item links.
    pub fn project_web_url(&self) -> String {
        format!("{}/{}", self.url, self.project)
    }
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    username: String,
    #[serde(default)]
    name: String,
    #[serde(default = "active_state")]
    state: String,
}

fn active_state() -> String {
    "active".to_string()
}

impl From<RawAccount> for Account {
    fn from(raw: RawAccount) -> Self {
        Account {
            active: raw.state == "active",
            username: raw.username,
            name: raw.name,
        }
    }
}

fn resolved_default() -> bool {
    true
}

/// One issue or merge request as the REST API returns it. Issue responses
/// simply omit the merge-request-only fields.
#[derive(Debug, Deserialize)]
struct RawItem {
    iid: u64,
    title: String,
    state: String,
    #[serde(default)]
    labels: Vec<String>,
    author: RawAccount,
    #[serde(default)]
    assignees: Vec<RawAccount>,
    #[serde(default)]
    reviewers: Vec<RawAccount>,
    #[serde(default)]
    upvotes: i64,
    #[serde(default)]
    downvotes: i64,
    #[serde(default)]
    has_conflicts: bool,
    #[serde(default = "resolved_default")]
    blocking_discussions_resolved: bool,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    description: Option<String>,
    web_url: String,
    updated_at: DateTime<Utc>,
}

impl RawItem {
    fn into_work_item(self, merge_request: bool) -> WorkItem {
        let reference = if merge_request {
            WorkItemRef::MergeRequest(self.iid)
        } else {
            WorkItemRef::Issue(self.iid)
        };
        let state = match self.state.as_str() {
            "closed" => ItemState::Closed,
            "merged" => ItemState::Merged,
            _ => ItemState::Open,
        };
        WorkItem {
            reference,
            title: self.title,
            state,
            author: self.author.into(),
            labels: self.labels,
            assignees: self.assignees.into_iter().map(Account::from).collect(),
            reviewers: self.reviewers.into_iter().map(Account::from).collect(),
            upvotes: self.upvotes,
            downvotes: self.downvotes,
            has_conflicts: self.has_conflicts,
            discussions_resolved: self.blocking_discussions_resolved,
            draft: self.draft,
            description: self.description.unwrap_or_default(),
            web_url: self.web_url,
            updated_at: self.updated_at,
        }
    }
}

/// The REST implementation of [`ForgeApi`].
pub struct ForgeClient {
    http: reqwest::Client,
    config: ForgeConfig,
    api_base: String,
}

impl ForgeClient {
    pub fn new(config: ForgeConfig) -> Self {
        // Project paths are URL-encoded in the API path.
        let encoded = config.project.replace('/', "%2F");
        let api_base = format!("{}/api/v4/projects/{encoded}", config.url);
        Self {
            http: reqwest::Client::new(),
            config,
            api_base,
        }
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    async fn get_one(&self, path: &str, merge_request: bool) -> Result<WorkItem> {
        let url = format!("{}/{path}", self.api_base);
        let raw: RawItem = self
            .http
            .get(&url)
            .header("PRIVATE-TOKEN", &self.config.token)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {path} from forge"))?
            .error_for_status()
            .with_context(|| format!("Forge returned error status for {path}"))?
            .json()
            .await
            .with_context(|| format!("Failed to parse forge response for {path}"))?;
        Ok(raw.into_work_item(merge_request))
    }

    /// Paginates through all pages of a listing endpoint.
    async fn list(
        &self,
        path: &str,
        item_labels: &[&str],
        merge_request: bool,
    ) -> Result<Vec<WorkItem>> {
        let url = format!("{}/{path}", self.api_base);
        let labels_param = item_labels.join(",");
        let mut items = Vec::new();
        let mut page = 1u32;
        loop {
            let batch: Vec<RawItem> = self
                .http
                .get(&url)
                .header("PRIVATE-TOKEN", &self.config.token)
                .query(&[
                    ("labels", labels_param.as_str()),
                    ("state", "opened"),
                    ("per_page", "100"),
                    ("page", &page.to_string()),
                ])
                .send()
                .await
                .with_context(|| format!("Failed to list {path} from forge"))?
                .error_for_status()
                .with_context(|| format!("Forge returned error status listing {path}"))?
                .json()
                .await
                .with_context(|| format!("Failed to parse forge listing for {path}"))?;

            let last_page = batch.len() < 100;
            items.extend(batch.into_iter().map(|raw| raw.into_work_item(merge_request)));
            if last_page {
                break;
            }
            page += 1;
        }
        Ok(items)
    }

    fn item_path(reference: WorkItemRef) -> String {
        match reference {
            WorkItemRef::Issue(n) => format!("issues/{n}"),
            WorkItemRef::MergeRequest(n) => format!("merge_requests/{n}"),
        }
    }

    async fn put_item(&self, reference: WorkItemRef, body: serde_json::Value) -> Result<()> {
        let path = Self::item_path(reference);
        let url = format!("{}/{path}", self.api_base);
        self.http
            .put(&url)
            .header("PRIVATE-TOKEN", &self.config.token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to update forge item {reference}"))?
            .error_for_status()
            .with_context(|| format!("Forge rejected update of item {reference}"))?;
        Ok(())
    }
}

#[async_trait]
impl ForgeApi for ForgeClient {
    async fn get_issue(&self, number: u64) -> Result<WorkItem> {
        self.get_one(&format!("issues/{number}"), false).await
    }

    async fn get_merge_request(&self, number: u64) -> Result<WorkItem> {
        self.get_one(&format!("merge_requests/{number}"), true).await
    }

    async fn list_issues(&self, item_labels: &[&str]) -> Result<Vec<WorkItem>> {
        self.list("issues", item_labels, false).await
    }

    async fn list_merge_requests(&self, item_labels: &[&str]) -> Result<Vec<WorkItem>> {
        self.list("merge_requests", item_labels, true).await
    }

    async fn issue_closers(&self, number: u64) -> Result<Vec<WorkItem>> {
        let path = format!("issues/{number}/closed_by");
        let url = format!("{}/{path}", self.api_base);
        let raw: Vec<RawItem> = self
            .http
            .get(&url)
            .header("PRIVATE-TOKEN", &self.config.token)
            .send()
            .await
            .with_context(|| format!("Failed to fetch closers of issue #{number}"))?
            .error_for_status()
            .with_context(|| format!("Forge returned error status for closers of #{number}"))?
            .json()
            .await
            .with_context(|| format!("Failed to parse closers of issue #{number}"))?;
        Ok(raw.into_iter().map(|r| r.into_work_item(true)).collect())
    }

    async fn set_labels(&self, item: WorkItemRef, item_labels: &[String]) -> Result<()> {
        self.put_item(item, json!({"labels": item_labels.join(",")}))
            .await
    }

    async fn set_description(&self, item: WorkItemRef, description: &str) -> Result<()> {
        self.put_item(item, json!({"description": description})).await
    }

    async fn post_comment(&self, item: WorkItemRef, body: &str) -> Result<()> {
        let path = format!("{}/notes", Self::item_path(item));
        let url = format!("{}/{path}", self.api_base);
        self.http
            .post(&url)
            .header("PRIVATE-TOKEN", &self.config.token)
            .json(&json!({"body": body}))
            .send()
            .await
            .with_context(|| format!("Failed to post comment on {item}"))?
            .error_for_status()
            .with_context(|| format!("Forge rejected comment on {item}"))?;
        Ok(())
    }
}
