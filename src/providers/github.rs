//! GitHub Projects v2 backend, driven through the `gh` CLI.
//!
//! Item listing and column moves go through `gh api graphql`; label and
//! comment mutations go through the REST endpoints with `--input -` payloads
//! so multiline markdown bodies survive the trip.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::{extract_override, Column, Issue, IssueProvider, SubIssue, OVERRIDE_LABELS};
use crate::cmd::CommandErrorContext;
use crate::config::RepoConfig;
use crate::intake;

/// Workflow labels created on every GitHub repo, plus the shared overrides.
const WORKFLOW_LABELS: &[&str] = &[
    "running",
    "retry",
    "failed",
    "pr-opened",
    "plan-posted",
    "plan",
    "no-curate",
];

const LABEL_COLOR: &str = "ededed";

/// REST response for a created issue.
#[derive(Debug, Deserialize)]
struct CreatedIssue {
    id: u64,
    number: u64,
    node_id: String,
}

#[derive(Debug, Deserialize)]
struct RepoLabel {
    name: String,
}

pub struct GithubProvider {
    repo: RepoConfig,
    /// Resolved path to `gh`. Daemon environments (launchd/systemd) run with
    /// a minimal PATH that misses the usual install prefixes.
    gh_path: PathBuf,
}

impl GithubProvider {
    pub fn new(repo: RepoConfig) -> Self {
        let gh_path = which::which("gh").unwrap_or_else(|_| {
            let candidates = ["/opt/homebrew/bin/gh", "/usr/local/bin/gh"];
            candidates
                .iter()
                .map(PathBuf::from)
                .find(|p| p.exists())
                .unwrap_or_else(|| PathBuf::from("gh"))
        });
        Self { repo, gh_path }
    }

    fn cmd(&self) -> Command {
        Command::new(&self.gh_path)
    }

    fn slug(&self) -> String {
        format!("{}/{}", self.repo.owner, self.repo.repo)
    }

    async fn graphql(&self, query: &str) -> anyhow::Result<serde_json::Value> {
        let output = self
            .cmd()
            .arg("api")
            .arg("graphql")
            .arg("-f")
            .arg(format!("query={}", urlencoding::encode(query)))
            .output_with_context()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("gh api graphql failed: {stderr}");
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    /// `gh api <endpoint> -X <method> --input -` with a JSON payload on stdin.
    async fn api_input(
        &self,
        endpoint: &str,
        method: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<Vec<u8>> {
        let mut child = self
            .cmd()
            .arg("api")
            .args([endpoint, "-X", method, "--input", "-"])
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn_with_context()?;
        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            stdin.write_all(payload.to_string().as_bytes()).await?;
            drop(stdin);
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("gh api failed: {stderr}");
        }
        Ok(output.stdout)
    }

    async fn api_get(&self, endpoint: &str) -> anyhow::Result<Vec<u8>> {
        let output = self
            .cmd()
            .arg("api")
            .arg(endpoint)
            .output_with_context()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("gh api failed: {stderr}");
        }
        Ok(output.stdout)
    }

    /// Map project items (GraphQL response) to eligible issues.
    fn collect_issues(&self, data: &serde_json::Value) -> Vec<Issue> {
        let ready_option = self.repo.column_option_id.as_deref().unwrap_or_default();
        let nodes = data
            .pointer("/data/node/items/nodes")
            .and_then(|n| n.as_array())
            .cloned()
            .unwrap_or_default();

        let mut issues: Vec<Issue> = nodes
            .iter()
            .filter_map(|item| {
                let content = item.get("content")?;
                if content.get("__typename").and_then(|t| t.as_str()) != Some("Issue") {
                    return None;
                }
                // Closed issues can linger on the board; never dispatch them.
                if content.get("state").and_then(|s| s.as_str()) != Some("OPEN") {
                    return None;
                }
                let option_id = item
                    .pointer("/fieldValueByName/optionId")
                    .and_then(|o| o.as_str())
                    .unwrap_or_default();
                if option_id != ready_option {
                    return None;
                }

                let labels: Vec<String> = content
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
                if !intake::eligible(&labels, true, None) {
                    return None;
                }

                Some(Issue {
                    id: content.get("id")?.as_str()?.to_string(),
                    number: content.get("number")?.as_u64()?,
                    identifier: None,
                    title: content
                        .get("title")
                        .and_then(|t| t.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    body: content
                        .get("body")
                        .and_then(|b| b.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    url: content
                        .get("url")
                        .and_then(|u| u.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    project_item_id: item
                        .get("id")
                        .and_then(|i| i.as_str())
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

    /// Single-select option id configured for a column. None means the
    /// board linkage never filled it in, and column moves become no-ops.
    fn column_option_id(&self, column: Column) -> Option<&str> {
        match column {
            Column::Backlog => self.repo.backlog_option_id.as_deref(),
            Column::InProgress => self.repo.in_progress_option_id.as_deref(),
            Column::InReview => self.repo.in_review_option_id.as_deref(),
        }
    }

    async fn set_item_column(&self, item_id: &str, option_id: &str) -> anyhow::Result<()> {
        let project_id = self
            .repo
            .project_id
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("repo '{}' has no project linked", self.repo.name))?;
        let Some(field_id) = self.repo.column_field_id.as_deref() else {
            return Ok(());
        };
        let query = format!(
            r#"mutation {{
                updateProjectV2ItemFieldValue(input: {{
                    projectId: "{project_id}"
                    itemId: "{item_id}"
                    fieldId: "{field_id}"
                    value: {{ singleSelectOptionId: "{option_id}" }}
                }}) {{ projectV2Item {{ id }} }}
            }}"#
        );
        self.graphql(&query).await?;
        Ok(())
    }
}

#[async_trait]
impl IssueProvider for GithubProvider {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn get_issues(&self) -> anyhow::Result<Vec<Issue>> {
        let project_id = self.repo.project_id.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "repo '{}' has no project linked - re-run `vibesprint config add-repo`",
                self.repo.name
            )
        })?;
        let query = format!(
            r#"query {{
                node(id: "{project_id}") {{
                    ... on ProjectV2 {{
                        items(first: 100) {{
                            nodes {{
                                id
                                fieldValueByName(name: "Status") {{
                                    ... on ProjectV2ItemFieldSingleSelectValue {{ optionId }}
                                }}
                                content {{
                                    __typename
                                    ... on Issue {{
                                        id number title body url state
                                        labels(first: 10) {{ nodes {{ name }} }}
                                    }}
                                }}
                            }}
                        }}
                    }}
                }}
            }}"#
        );
        let data = self.graphql(&query).await?;
        Ok(self.collect_issues(&data))
    }

    async fn add_label(&self, issue: &Issue, label: &str) -> anyhow::Result<()> {
        let endpoint = format!("repos/{}/issues/{}/labels", self.slug(), issue.number);
        let payload = serde_json::json!({ "labels": [label] });
        if let Err(e) = self.api_input(&endpoint, "POST", payload).await {
            tracing::warn!(
                issue = issue.number,
                label,
                error = %e,
                hint = hint_for_status(&e.to_string()),
                "failed to add label"
            );
        }
        Ok(())
    }

    async fn remove_label(&self, issue: &Issue, label: &str) -> anyhow::Result<()> {
        let encoded = urlencoding::encode(label);
        let endpoint = format!(
            "repos/{}/issues/{}/labels/{encoded}",
            self.slug(),
            issue.number
        );
        let output = self
            .cmd()
            .arg("api")
            .args([&endpoint, "-X", "DELETE"])
            .output_with_context()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Removing a label the issue never had is expected.
            if stderr.contains("404") {
                tracing::debug!(issue = issue.number, label, "label already removed (404)");
                return Ok(());
            }
            anyhow::bail!("gh api failed: {stderr}");
        }
        Ok(())
    }

    async fn post_comment(&self, issue: &Issue, body: &str) -> anyhow::Result<()> {
        let endpoint = format!("repos/{}/issues/{}/comments", self.slug(), issue.number);
        self.api_input(&endpoint, "POST", serde_json::json!({ "body": body }))
            .await?;
        Ok(())
    }

    async fn move_to_column(&self, issue: &Issue, column: Column) -> anyhow::Result<()> {
        let Some(option_id) = self.column_option_id(column) else {
            return Ok(());
        };
        self.set_item_column(&issue.project_item_id, option_id).await
    }

    async fn create_sub_issue(
        &self,
        parent: &Issue,
        title: &str,
        body: &str,
    ) -> anyhow::Result<SubIssue> {
        let endpoint = format!("repos/{}/issues", self.slug());
        let full_body = format!("{body}\n\n---\n*Part of #{}*", parent.number);
        let raw = self
            .api_input(
                &endpoint,
                "POST",
                serde_json::json!({ "title": title, "body": full_body }),
            )
            .await?;
        let created: CreatedIssue = serde_json::from_slice(&raw)?;

        // Native parent/child linking is not available on every GitHub plan.
        let link_endpoint = format!("repos/{}/issues/{}/sub_issues", self.slug(), parent.number);
        if let Err(e) = self
            .api_input(
                &link_endpoint,
                "POST",
                serde_json::json!({ "sub_issue_id": created.id }),
            )
            .await
        {
            tracing::warn!(
                parent = parent.number,
                child = created.number,
                error = %e,
                "could not link as sub-issue (feature may not be available)"
            );
        }

        if let Some(project_id) = self.repo.project_id.as_deref() {
            let query = format!(
                r#"mutation {{
                    addProjectV2ItemById(input: {{ projectId: "{project_id}", contentId: "{content_id}" }}) {{
                        item {{ id }}
                    }}
                }}"#,
                content_id = created.node_id
            );
            let data = self.graphql(&query).await?;
            let item_id = data
                .pointer("/data/addProjectV2ItemById/item/id")
                .and_then(|i| i.as_str())
                .ok_or_else(|| anyhow::anyhow!("addProjectV2ItemById returned no item id"))?
                .to_string();

            if let Some(backlog) = self.column_option_id(Column::Backlog) {
                self.set_item_column(&item_id, backlog).await?;
            }
        }

        Ok(SubIssue {
            id: created.id.to_string(),
            number: created.number,
        })
    }

    async fn ensure_labels_exist(&self) -> anyhow::Result<()> {
        let endpoint = format!("repos/{}/labels?per_page=100", self.slug());
        let raw = self.api_get(&endpoint).await?;
        let existing: Vec<RepoLabel> = serde_json::from_slice(&raw)?;
        let existing: std::collections::HashSet<&str> =
            existing.iter().map(|l| l.name.as_str()).collect();

        let create_endpoint = format!("repos/{}/labels", self.slug());
        for label in WORKFLOW_LABELS.iter().chain(OVERRIDE_LABELS) {
            if existing.contains(label) {
                continue;
            }
            let payload = serde_json::json!({ "name": label, "color": LABEL_COLOR });
            match self.api_input(&create_endpoint, "POST", payload).await {
                Ok(_) => tracing::info!(label, repo = %self.repo.name, "created label"),
                // 422 means another process created it between list and POST.
                Err(e) if e.to_string().contains("422") => {}
                Err(e) => {
                    tracing::warn!(label, error = %e, "failed to create label, continuing")
                }
            }
        }
        Ok(())
    }

    async fn fetch_comments(&self, issue: &Issue) -> anyhow::Result<Vec<String>> {
        let query = format!(
            r#"query {{
                node(id: "{id}") {{
                    ... on Issue {{
                        comments(last: 10) {{
                            nodes {{ body author {{ login }} }}
                        }}
                    }}
                }}
            }}"#,
            id = issue.id
        );
        let data = self.graphql(&query).await?;
        let nodes = data
            .pointer("/data/node/comments/nodes")
            .and_then(|n| n.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(nodes
            .iter()
            .map(|c| {
                let author = c
                    .pointer("/author/login")
                    .and_then(|l| l.as_str())
                    .unwrap_or("unknown");
                let body = c.get("body").and_then(|b| b.as_str()).unwrap_or_default();
                format!("@{author}: {body}")
            })
            .collect())
    }
}

/// Remediation hint for a failed mutation, keyed off the HTTP status in gh's
/// stderr.
fn hint_for_status(error: &str) -> &'static str {
    if error.contains("404") {
        "Not found - check owner/repo and permissions"
    } else if error.contains("403") {
        "Forbidden - token may lack required permissions"
    } else if error.contains("401") {
        "Unauthorized - check GITHUB_TOKEN is valid"
    } else {
        ""
    }
}
