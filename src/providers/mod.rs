//! Issue tracker abstraction — one trait over two backends.
//!
//! GitHub Projects v2 and Linear share almost no mechanism (one is a
//! single-select field on a project board driven through the `gh` CLI, the
//! other a workflow-state GraphQL API), only the contract: fetch eligible
//! issues, mutate labels, post comments, move between columns, create
//! sub-issues. Each repo picks its backend via the `provider` discriminant in
//! its config entry.

pub mod github;
pub mod linear;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Provider, RepoConfig};

/// Model/executor override labels shared by both backends' vocabularies.
pub(crate) const OVERRIDE_LABELS: &[&str] = &[
    "model:auto",
    "model:claude-sonnet-4.5",
    "model:claude-sonnet-4",
    "model:claude-haiku-4.5",
    "model:claude-opus-4.5",
    "model:gpt-5.2-codex",
    "model:gpt-5.2",
    "model:gpt-5.1-codex-max",
    "model:gpt-5.1-codex-mini",
    "executor:kiro",
    "executor:codex",
];

/// A tracker issue, normalized across backends.
#[derive(Debug, Clone)]
pub struct Issue {
    /// Opaque provider key (GitHub node id, Linear issue id).
    pub id: String,
    /// GitHub issue number, or the numeric suffix of a Linear identifier.
    pub number: u64,
    /// Linear's human key (e.g. "ENG-123"); `None` for GitHub.
    pub identifier: Option<String>,
    pub title: String,
    pub body: String,
    pub url: String,
    /// The board row / card key used for column moves. Distinct from `id`.
    pub project_item_id: String,
    pub labels: Vec<String>,
    /// Model override parsed from a `model:` label.
    pub model: Option<String>,
    /// Executor override parsed from an `executor:` label.
    pub executor: Option<String>,
    /// Name of the owning repo config entry.
    pub repo: String,
}

impl Issue {
    /// Human-readable reference: the Linear identifier, or `#<number>`.
    pub fn display_ref(&self) -> String {
        match &self.identifier {
            Some(id) => id.clone(),
            None => format!("#{}", self.number),
        }
    }

    /// Planning request rather than implementation request.
    pub fn is_plan(&self) -> bool {
        self.labels.iter().any(|l| l.eq_ignore_ascii_case("plan"))
    }

    /// Skip the curated multi-phase prompt.
    pub fn is_no_curate(&self) -> bool {
        self.labels
            .iter()
            .any(|l| l.eq_ignore_ascii_case("no-curate"))
    }

    /// Carries the one-more-attempt marker from a previous failure.
    pub fn is_retry(&self) -> bool {
        has_label(&self.labels, "retry")
    }
}

/// Result of creating a sub-issue.
#[derive(Debug, Clone)]
pub struct SubIssue {
    pub id: String,
    pub number: u64,
}

/// Workflow column targets for `move_to_column`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Backlog,
    InProgress,
    InReview,
}

impl Column {
    pub fn as_str(&self) -> &'static str {
        match self {
            Column::Backlog => "backlog",
            Column::InProgress => "in_progress",
            Column::InReview => "in_review",
        }
    }
}

/// The contract each tracker backend implements.
///
/// Label mutations and column moves are idempotent; removing a label the
/// issue does not carry is not an error. Comment posting is best-effort from
/// the caller's point of view (failures get logged, never unwound through
/// the processing flow).
#[async_trait]
pub trait IssueProvider: Send + Sync {
    /// Backend name for log lines ("github", "linear").
    fn name(&self) -> &'static str;

    /// Eligible issues in the monitored Ready column, sorted by number.
    async fn get_issues(&self) -> anyhow::Result<Vec<Issue>>;

    async fn add_label(&self, issue: &Issue, label: &str) -> anyhow::Result<()>;

    async fn remove_label(&self, issue: &Issue, label: &str) -> anyhow::Result<()>;

    async fn post_comment(&self, issue: &Issue, body: &str) -> anyhow::Result<()>;

    /// Move the issue's card / workflow state. Silently no-ops when the
    /// target column has no configured identifier.
    async fn move_to_column(&self, issue: &Issue, column: Column) -> anyhow::Result<()>;

    /// Create a child issue in Backlog; the backend appends its own
    /// `*Part of <parent-ref>*` suffix to the body.
    async fn create_sub_issue(
        &self,
        parent: &Issue,
        title: &str,
        body: &str,
    ) -> anyhow::Result<SubIssue>;

    /// Idempotently create the backend's fixed label vocabulary.
    async fn ensure_labels_exist(&self) -> anyhow::Result<()>;

    /// Recent comments rendered `@author: body`, oldest first.
    ///
    /// Backends without comment context return nothing.
    async fn fetch_comments(&self, _issue: &Issue) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Attach a PR link to the issue (Linear attachments; no-op elsewhere).
    async fn attach_pr(&self, _issue: &Issue, _pr_url: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Build the backend for a repo config entry.
pub fn create_provider(repo: &RepoConfig) -> anyhow::Result<Arc<dyn IssueProvider>> {
    match repo.provider {
        Provider::Github => Ok(Arc::new(github::GithubProvider::new(repo.clone()))),
        Provider::Linear => Ok(Arc::new(linear::LinearProvider::new(repo.clone())?)),
    }
}

/// Scan a label set for the first `<prefix><value>` label and return the
/// value. Iteration order is whatever the provider returned; when duplicate
/// overrides exist the first one wins.
pub fn extract_override<'a>(labels: &'a [String], prefix: &str) -> Option<&'a str> {
    labels.iter().find_map(|l| l.strip_prefix(prefix))
}

/// Membership test for workflow labels, tolerating the `vibesprint:`
/// namespace Linear uses. `has_label(&labels, "retry")` matches both `retry`
/// and `vibesprint:retry`, so the state machine reads identically for both
/// backends.
pub fn has_label(labels: &[String], name: &str) -> bool {
    labels.iter().any(|l| {
        l == name
            || l.strip_prefix("vibesprint:")
                .is_some_and(|rest| rest == name)
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn extract_override_strips_prefix() {
        let l = labels(&["bug", "model:claude-haiku-4.5", "executor:codex"]);
        assert_eq!(extract_override(&l, "model:"), Some("claude-haiku-4.5"));
        assert_eq!(extract_override(&l, "executor:"), Some("codex"));
    }

    #[test]
    fn extract_override_absent_returns_none() {
        let l = labels(&["bug", "plan"]);
        assert_eq!(extract_override(&l, "model:"), None);
    }

    #[test]
    fn extract_override_first_match_wins() {
        let l = labels(&["model:auto", "model:claude-sonnet-4"]);
        assert_eq!(extract_override(&l, "model:"), Some("auto"));
    }

    #[test]
    fn has_label_matches_plain_and_namespaced() {
        assert!(has_label(&labels(&["retry"]), "retry"));
        assert!(has_label(&labels(&["vibesprint:retry"]), "retry"));
        assert!(!has_label(&labels(&["vibesprint:running"]), "retry"));
        assert!(!has_label(&labels(&["retrying"]), "retry"));
    }

    #[test]
    fn plan_detection_is_case_insensitive() {
        let mut issue = testing::issue(7, "Split the feature", vec!["Plan"]);
        assert!(issue.is_plan());
        issue.labels = labels(&["plan"]);
        assert!(issue.is_plan());
        issue.labels = labels(&["planning"]);
        assert!(!issue.is_plan());
    }

    #[test]
    fn display_ref_prefers_identifier() {
        let mut issue = testing::issue(42, "Add login", vec![]);
        assert_eq!(issue.display_ref(), "#42");
        issue.identifier = Some("ENG-42".into());
        assert_eq!(issue.display_ref(), "ENG-42");
    }

    #[test]
    fn factory_defaults_to_github() {
        let repo = RepoConfig {
            name: "api".into(),
            ..Default::default()
        };
        let provider = create_provider(&repo).unwrap();
        assert_eq!(provider.name(), "github");
    }

    #[test]
    fn column_as_str() {
        assert_eq!(Column::Backlog.as_str(), "backlog");
        assert_eq!(Column::InProgress.as_str(), "in_progress");
        assert_eq!(Column::InReview.as_str(), "in_review");
    }
}
