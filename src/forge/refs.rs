//! Recognizing issue/merge-request URLs attached to tasks.
//!
//! Tasks carry their external reference as a web link; these patterns
//! recover the [`WorkItemRef`] from the URL. The patterns are anchored to
//! the configured project URL so links to other projects never match.

use regex::Regex;

use super::WorkItemRef;

/// Compiled URL patterns for one forge project.
#[derive(Debug, Clone)]
pub struct RefPatterns {
    project_base: String,
    issue_url: Regex,
    mr_url: Regex,
}

impl RefPatterns {
    /// Build patterns for a project web URL such as
    /// `https://forge.example.org/group/project` (trailing slash tolerated).
    pub fn new(project_url: &str) -> Self {
        let project_base = project_url.trim_end_matches('/').to_string();
        let escaped = regex::escape(&project_base);
        // The "/-/" path segment appears in newer forge URLs.
        let issue_url = Regex::new(&format!(r"^{escaped}(/-)?/issues/(?P<num>[0-9]+)"))
            .expect("issue URL pattern");
        let mr_url = Regex::new(&format!(r"^{escaped}(/-)?/merge_requests/(?P<num>[0-9]+)"))
            .expect("merge request URL pattern");
        Self {
            project_base,
            issue_url,
            mr_url,
        }
    }

    pub fn project_base(&self) -> &str {
        &self.project_base
    }

    /// Recover the work item reference from a web URL, if it points at
    /// this project's issues or merge requests.
    pub fn parse_url(&self, url: &str) -> Option<WorkItemRef> {
        if let Some(caps) = self.mr_url.captures(url) {
            return caps["num"].parse().ok().map(WorkItemRef::MergeRequest);
        }
        if let Some(caps) = self.issue_url.captures(url) {
            return caps["num"].parse().ok().map(WorkItemRef::Issue);
        }
        None
    }

    pub fn url_for(&self, reference: WorkItemRef) -> String {
        reference.url(&self.project_base)
    }
}
