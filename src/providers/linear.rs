//! Linear backend over the GraphQL API with `reqwest`.
//!
//! Linear has no per-issue label namespace, so workflow labels are written as
//! `vibesprint:<name>` to keep them distinguishable from human labels. Label
//! ids are cached per provider since Linear mutates labels by id, not name.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tokio::sync::Mutex;

use super::{extract_override, Column, Issue, IssueProvider, SubIssue, OVERRIDE_LABELS};
use crate::config::RepoConfig;
use crate::intake;

const LINEAR_API: &str = "https://api.linear.app/graphql";
const LABEL_COLOR: &str = "#808080";

/// Workflow labels that get the `vibesprint:` prefix on Linear.
const NAMESPACED_LABELS: &[&str] = &[
    "running",
    "retry",
    "failed",
    "pr-opened",
    "plan-posted",
    "done",
];

/// Labels ensured on the team: namespaced workflow set plus the shared
/// pass-through vocabulary.
const TEAM_LABELS: &[&str] = &[
    "vibesprint:running",
    "vibesprint:retry",
    "vibesprint:failed",
    "vibesprint:pr-opened",
    "vibesprint:plan-posted",
    "plan",
    "no-curate",
];

static IDENTIFIER_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+$").expect("BUG: identifier number regex is invalid"));

/// `ENG-123` → 123. Identifiers without a numeric suffix map to 0.
fn identifier_number(identifier: &str) -> u64 {
    IDENTIFIER_NUMBER
        .find(identifier)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Prefix workflow labels with `vibesprint:`; overrides and opt-in labels
/// (`plan`, `no-curate`, `model:*`, `executor:*`) pass through untouched.
fn qualify(label: &str) -> String {
    if label.starts_with("vibesprint:") {
        label.to_string()
    } else if NAMESPACED_LABELS.contains(&label) {
        format!("vibesprint:{label}")
    } else {
        label.to_string()
    }
}

pub struct LinearProvider {
    repo: RepoConfig,
    client: Client,
    api_key: String,
    /// Label name → Linear label id.
    label_cache: Mutex<HashMap<String, String>>,
}

impl LinearProvider {
    pub fn new(repo: RepoConfig) -> anyhow::Result<Self> {
        let api_key = crate::config::linear_api_key()
            .context("LINEAR_API_KEY is not set - required for Linear repos")?;
        Ok(Self::with_key(repo, api_key))
    }

    fn with_key(repo: RepoConfig, api_key: String) -> Self {
        let client = Client::builder()
            .user_agent("vibesprint/0.1 (reqwest)")
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client");
        Self {
            repo,
            client,
            api_key,
            label_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Workflow state id configured for a column. None means the team
    /// linkage never filled it in.
    fn state_id_for(&self, column: Column) -> Option<&str> {
        match column {
            Column::Backlog => self.repo.linear_backlog_state_id.as_deref(),
            Column::InProgress => self.repo.linear_in_progress_state_id.as_deref(),
            Column::InReview => self.repo.linear_in_review_state_id.as_deref(),
        }
    }

    async fn graphql(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let body = serde_json::json!({ "query": query, "variables": variables });
        let resp = self
            .client
            .post(LINEAR_API)
            .json(&body)
            .header("Authorization", &self.api_key)
            .send()
            .await
            .context("Linear API request failed")?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("Linear API failed ({status}): {text}");
        }
        let value: serde_json::Value =
            serde_json::from_str(&text).context("Linear API returned invalid JSON")?;
        if let Some(errors) = value.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                anyhow::bail!(
                    "Linear GraphQL errors: {}",
                    serde_json::Value::Array(errors.clone())
                );
            }
        }
        Ok(value)
    }

    /// Map issue nodes from the ready-state query to eligible issues.
    fn collect_issues(&self, nodes: &[serde_json::Value]) -> Vec<Issue> {
        let mut issues: Vec<Issue> = nodes
            .iter()
            .filter_map(|node| {
                let labels: Vec<String> = node
                    .pointer("/labels/nodes")
                    .and_then(|n| n.as_array())
                    .map(|nodes| {
                        nodes
                            .iter()
                            .filter_map(|l| l.get("name").and_then(|n| n.as_str()))
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();
                if !intake::eligible(&labels, true, self.repo.linear_repo_label.as_deref()) {
                    return None;
                }

                let id = node.get("id")?.as_str()?.to_string();
                let identifier = node
                    .get("identifier")
                    .and_then(|i| i.as_str())
                    .unwrap_or_default()
                    .to_string();
                Some(Issue {
                    project_item_id: id.clone(),
                    id,
                    number: identifier_number(&identifier),
                    identifier: Some(identifier),
                    title: node
                        .get("title")
                        .and_then(|t| t.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    body: node
                        .get("description")
                        .and_then(|d| d.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    url: node
                        .get("url")
                        .and_then(|u| u.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    model: extract_override(&labels, "model:").map(String::from),
                    executor: extract_override(&labels, "executor:").map(String::from),
                    labels,
                    repo: self.repo.name.clone(),
                })
            })
            .collect();

        issues.sort_by_key(|i| i.number);
        issues
    }

    /// Resolve a label name to its team-scoped id, creating the label when
    /// the team does not have it yet.
    async fn get_or_create_label(&self, name: &str) -> anyhow::Result<String> {
        let mut cache = self.label_cache.lock().await;
        if let Some(id) = cache.get(name) {
            return Ok(id.clone());
        }

        let team_id = self
            .repo
            .linear_team_id
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("repo '{}' has no Linear team id", self.repo.name))?;

        let data = self
            .graphql(
                "query($teamId: String!) { team(id: $teamId) { labels { nodes { id name } } } }",
                serde_json::json!({ "teamId": team_id }),
            )
            .await?;
        if let Some(nodes) = data.pointer("/data/team/labels/nodes").and_then(|n| n.as_array()) {
            for node in nodes {
                let (Some(id), Some(label_name)) = (
                    node.get("id").and_then(|i| i.as_str()),
                    node.get("name").and_then(|n| n.as_str()),
                ) else {
                    continue;
                };
                cache.insert(label_name.to_string(), id.to_string());
            }
        }
        if let Some(id) = cache.get(name) {
            return Ok(id.clone());
        }

        let created = self
            .graphql(
                "mutation($name: String!, $teamId: String!, $color: String!) { issueLabelCreate(input: { name: $name, teamId: $teamId, color: $color }) { issueLabel { id } } }",
                serde_json::json!({ "name": name, "teamId": team_id, "color": LABEL_COLOR }),
            )
            .await?;
        let id = created
            .pointer("/data/issueLabelCreate/issueLabel/id")
            .and_then(|i| i.as_str())
            .ok_or_else(|| anyhow::anyhow!("issueLabelCreate returned no label id"))?
            .to_string();
        tracing::info!(label = name, "created Linear label");
        cache.insert(name.to_string(), id.clone());
        Ok(id)
    }

    /// Current label ids on an issue, paired with their names.
    async fn issue_label_ids(&self, issue_id: &str) -> anyhow::Result<Vec<(String, String)>> {
        let data = self
            .graphql(
                "query($id: String!) { issue(id: $id) { labels { nodes { id name } } } }",
                serde_json::json!({ "id": issue_id }),
            )
            .await?;
        Ok(data
            .pointer("/data/issue/labels/nodes")
            .and_then(|n| n.as_array())
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(|l| {
                        Some((
                            l.get("id")?.as_str()?.to_string(),
                            l.get("name")?.as_str()?.to_string(),
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn set_issue_labels(&self, issue_id: &str, label_ids: Vec<String>) -> anyhow::Result<()> {
        self.graphql(
            "mutation($id: String!, $labelIds: [String!]) { issueUpdate(id: $id, input: { labelIds: $labelIds }) { success } }",
            serde_json::json!({ "id": issue_id, "labelIds": label_ids }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl IssueProvider for LinearProvider {
    fn name(&self) -> &'static str {
        "linear"
    }

    async fn get_issues(&self) -> anyhow::Result<Vec<Issue>> {
        let (Some(team_id), Some(ready_state)) = (
            self.repo.linear_team_id.as_deref(),
            self.repo.linear_ready_state_id.as_deref(),
        ) else {
            tracing::warn!(
                repo = %self.repo.name,
                "Linear team or Ready state not configured, skipping"
            );
            return Ok(vec![]);
        };

        let query = r#"query($teamId: ID!, $stateId: ID!) {
            issues(filter: { team: { id: { eq: $teamId } }, state: { id: { eq: $stateId } } }) {
                nodes {
                    id identifier title description url
                    labels { nodes { name } }
                }
            }
        }"#;
        let data = match self
            .graphql(
                query,
                serde_json::json!({ "teamId": team_id, "stateId": ready_state }),
            )
            .await
        {
            Ok(data) => data,
            // A Linear outage should not take down polling for other repos.
            Err(e) => {
                tracing::warn!(repo = %self.repo.name, error = %e, "failed to fetch Linear issues");
                return Ok(vec![]);
            }
        };

        let nodes = data
            .pointer("/data/issues/nodes")
            .and_then(|n| n.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(self.collect_issues(&nodes))
    }

    async fn add_label(&self, issue: &Issue, label: &str) -> anyhow::Result<()> {
        let name = qualify(label);
        let label_id = self.get_or_create_label(&name).await?;
        let current = self.issue_label_ids(&issue.id).await?;
        if current.iter().any(|(id, _)| id == &label_id) {
            return Ok(());
        }
        let mut ids: Vec<String> = current.into_iter().map(|(id, _)| id).collect();
        ids.push(label_id);
        self.set_issue_labels(&issue.id, ids).await
    }

    async fn remove_label(&self, issue: &Issue, label: &str) -> anyhow::Result<()> {
        let name = qualify(label);
        let current = self.issue_label_ids(&issue.id).await?;
        let remaining: Vec<String> = current
            .iter()
            .filter(|(_, n)| n != &name)
            .map(|(id, _)| id.clone())
            .collect();
        if remaining.len() == current.len() {
            return Ok(());
        }
        self.set_issue_labels(&issue.id, remaining).await
    }

    async fn post_comment(&self, issue: &Issue, body: &str) -> anyhow::Result<()> {
        self.graphql(
            "mutation($issueId: String!, $body: String!) { commentCreate(input: { issueId: $issueId, body: $body }) { success } }",
            serde_json::json!({ "issueId": issue.id, "body": body }),
        )
        .await?;
        Ok(())
    }

    async fn move_to_column(&self, issue: &Issue, column: Column) -> anyhow::Result<()> {
        let Some(state_id) = self.state_id_for(column) else {
            tracing::warn!(
                repo = %self.repo.name,
                column = column.as_str(),
                "no Linear state configured for column, skipping move"
            );
            return Ok(());
        };
        self.graphql(
            "mutation($id: String!, $stateId: String!) { issueUpdate(id: $id, input: { stateId: $stateId }) { success } }",
            serde_json::json!({ "id": issue.id, "stateId": state_id }),
        )
        .await?;
        Ok(())
    }

    async fn create_sub_issue(
        &self,
        parent: &Issue,
        title: &str,
        body: &str,
    ) -> anyhow::Result<SubIssue> {
        let team_id = self
            .repo
            .linear_team_id
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("repo '{}' has no Linear team id", self.repo.name))?;
        let description = format!("{body}\n\n---\n*Part of {}*", parent.display_ref());
        let state_id = self
            .state_id_for(Column::Backlog)
            .map(serde_json::Value::from)
            .unwrap_or(serde_json::Value::Null);

        let data = self
            .graphql(
                "mutation($teamId: String!, $title: String!, $description: String!, $parentId: String, $stateId: String) { issueCreate(input: { teamId: $teamId, title: $title, description: $description, parentId: $parentId, stateId: $stateId }) { issue { id identifier } } }",
                serde_json::json!({
                    "teamId": team_id,
                    "title": title,
                    "description": description,
                    "parentId": parent.id,
                    "stateId": state_id,
                }),
            )
            .await?;
        let issue = data
            .pointer("/data/issueCreate/issue")
            .ok_or_else(|| anyhow::anyhow!("issueCreate returned no issue"))?;
        let id = issue
            .get("id")
            .and_then(|i| i.as_str())
            .ok_or_else(|| anyhow::anyhow!("issueCreate returned no issue id"))?
            .to_string();
        let identifier = issue
            .get("identifier")
            .and_then(|i| i.as_str())
            .unwrap_or_default();
        Ok(SubIssue {
            id,
            number: identifier_number(identifier),
        })
    }

    async fn ensure_labels_exist(&self) -> anyhow::Result<()> {
        for label in TEAM_LABELS.iter().chain(OVERRIDE_LABELS) {
            if let Err(e) = self.get_or_create_label(label).await {
                tracing::warn!(label, error = %e, "failed to ensure Linear label, continuing");
            }
        }
        if let Some(repo_label) = self.repo.linear_repo_label.as_deref() {
            if let Err(e) = self.get_or_create_label(repo_label).await {
                tracing::warn!(label = repo_label, error = %e, "failed to ensure repo label");
            }
        }
        Ok(())
    }

    async fn attach_pr(&self, issue: &Issue, url: &str) -> anyhow::Result<()> {
        self.graphql(
            "mutation($issueId: String!, $url: String!, $title: String!) { attachmentCreate(input: { issueId: $issueId, url: $url, title: $title }) { success } }",
            serde_json::json!({ "issueId": issue.id, "url": url, "title": "Pull Request" }),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepoConfig {
        RepoConfig {
            name: "api".into(),
            provider: crate::config::Provider::Linear,
            linear_team_id: Some("team-1".into()),
            linear_ready_state_id: Some("state-ready".into()),
            ..Default::default()
        }
    }

    fn provider(repo: RepoConfig) -> LinearProvider {
        LinearProvider::with_key(repo, "lin_api_test".into())
    }

    fn node(identifier: &str, labels: &[&str]) -> serde_json::Value {
        serde_json::json!({
            "id": format!("lin-{identifier}"),
            "identifier": identifier,
            "title": format!("Issue {identifier}"),
            "description": "do the thing",
            "url": format!("https://linear.app/acme/issue/{identifier}"),
            "labels": { "nodes": labels.iter().map(|l| serde_json::json!({"name": l})).collect::<Vec<_>>() }
        })
    }

    #[test]
    fn qualify_namespaces_workflow_labels() {
        assert_eq!(qualify("running"), "vibesprint:running");
        assert_eq!(qualify("retry"), "vibesprint:retry");
        assert_eq!(qualify("done"), "vibesprint:done");
        assert_eq!(qualify("vibesprint:failed"), "vibesprint:failed");
    }

    #[test]
    fn qualify_passes_through_overrides() {
        assert_eq!(qualify("plan"), "plan");
        assert_eq!(qualify("no-curate"), "no-curate");
        assert_eq!(qualify("model:auto"), "model:auto");
        assert_eq!(qualify("executor:codex"), "executor:codex");
    }

    #[test]
    fn identifier_number_takes_numeric_suffix() {
        assert_eq!(identifier_number("ENG-123"), 123);
        assert_eq!(identifier_number("OPS-7"), 7);
        assert_eq!(identifier_number("NONUMERIC"), 0);
        assert_eq!(identifier_number(""), 0);
    }

    #[test]
    fn collect_issues_skips_busy_and_done() {
        let p = provider(repo());
        let nodes = vec![
            node("ENG-5", &[]),
            node("ENG-2", &["vibesprint:running"]),
            node("ENG-3", &["vibesprint:done"]),
            node("ENG-4", &["vibesprint:failed"]),
            node("ENG-1", &["vibesprint:failed", "vibesprint:retry"]),
        ];
        let issues = p.collect_issues(&nodes);
        assert_eq!(
            issues.iter().map(|i| i.number).collect::<Vec<_>>(),
            vec![1, 5]
        );
        assert_eq!(issues[0].identifier.as_deref(), Some("ENG-1"));
        assert_eq!(issues[0].display_ref(), "ENG-1");
    }

    #[test]
    fn collect_issues_honors_repo_label_filter() {
        let mut cfg = repo();
        cfg.linear_repo_label = Some("repo:api".into());
        let p = provider(cfg);
        let nodes = vec![node("ENG-1", &["repo:api"]), node("ENG-2", &["repo:web"])];
        let issues = p.collect_issues(&nodes);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].number, 1);
    }

    #[test]
    fn collect_issues_extracts_overrides() {
        let p = provider(repo());
        let nodes = vec![node("ENG-9", &["model:gpt-5.2-codex", "executor:codex"])];
        let issues = p.collect_issues(&nodes);
        assert_eq!(issues[0].model.as_deref(), Some("gpt-5.2-codex"));
        assert_eq!(issues[0].executor.as_deref(), Some("codex"));
    }

    #[test]
    fn column_states_come_from_team_linkage() {
        let mut cfg = repo();
        cfg.linear_backlog_state_id = Some("state-backlog".into());
        cfg.linear_in_review_state_id = Some("state-review".into());
        let p = provider(cfg);
        assert_eq!(p.state_id_for(Column::Backlog), Some("state-backlog"));
        assert_eq!(p.state_id_for(Column::InReview), Some("state-review"));
        // An unconfigured state skips the move rather than erroring.
        assert_eq!(p.state_id_for(Column::InProgress), None);
    }

    #[test]
    fn team_label_vocabulary_is_complete() {
        let all: Vec<&str> = TEAM_LABELS.iter().chain(OVERRIDE_LABELS).copied().collect();
        assert_eq!(all.len(), 18);
        assert!(all.contains(&"vibesprint:pr-opened"));
        assert!(all.contains(&"plan"));
        assert!(all.contains(&"executor:kiro"));
    }
}
