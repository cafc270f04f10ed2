//! Issue intake: which board items are eligible for dispatch, and the
//! cross-repo gather used by each poll tick.

use std::sync::Arc;

use crate::config::RepoConfig;
use crate::providers::{has_label, Issue, IssueProvider};

/// Whether an issue in the Ready column may be dispatched.
///
/// Both backends funnel through this so the workflow reads identically on
/// GitHub (bare labels) and Linear (`vibesprint:` prefixed):
/// - `running` and `done` always exclude;
/// - a `failed` issue is only picked up again once a human adds `retry`;
/// - on Linear, a configured repo label scopes the team's board to one repo.
pub fn eligible(labels: &[String], in_ready: bool, repo_label: Option<&str>) -> bool {
    if !in_ready {
        return false;
    }
    if let Some(repo_label) = repo_label {
        if !labels.iter().any(|l| l == repo_label) {
            return false;
        }
    }
    if has_label(labels, "running") || has_label(labels, "done") {
        return false;
    }
    if has_label(labels, "failed") && !has_label(labels, "retry") {
        return false;
    }
    true
}

/// Poll every configured repo and return eligible issues in dispatch order:
/// repo name, then issue number. One repo failing (API outage, bad token)
/// must not stop the others from being served.
pub async fn gather(repos: &[(RepoConfig, Arc<dyn IssueProvider>)]) -> Vec<Issue> {
    let mut all = Vec::new();
    for (repo, provider) in repos {
        match provider.get_issues().await {
            Ok(issues) => all.extend(issues),
            Err(e) => {
                tracing::warn!(repo = %repo.name, error = %e, "failed to poll repo, skipping");
            }
        }
    }
    all.sort_by(|a, b| a.repo.cmp(&b.repo).then(a.number.cmp(&b.number)));
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::{issue, MockProvider};
    use crate::providers::{Column, SubIssue};
    use async_trait::async_trait;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn plain_ready_issue_is_eligible() {
        assert!(eligible(&labels(&[]), true, None));
        assert!(eligible(&labels(&["bug", "plan"]), true, None));
    }

    #[test]
    fn outside_ready_is_never_eligible() {
        assert!(!eligible(&labels(&[]), false, None));
    }

    #[test]
    fn running_and_done_exclude() {
        assert!(!eligible(&labels(&["running"]), true, None));
        assert!(!eligible(&labels(&["done"]), true, None));
        assert!(!eligible(&labels(&["vibesprint:running"]), true, None));
        assert!(!eligible(&labels(&["vibesprint:done"]), true, None));
    }

    #[test]
    fn failed_needs_retry() {
        assert!(!eligible(&labels(&["failed"]), true, None));
        assert!(eligible(&labels(&["failed", "retry"]), true, None));
        assert!(!eligible(&labels(&["vibesprint:failed"]), true, None));
        assert!(eligible(
            &labels(&["vibesprint:failed", "vibesprint:retry"]),
            true,
            None
        ));
    }

    #[test]
    fn repo_label_scopes_linear_boards() {
        assert!(eligible(&labels(&["repo:api"]), true, Some("repo:api")));
        assert!(!eligible(&labels(&["repo:web"]), true, Some("repo:api")));
        assert!(!eligible(&labels(&[]), true, Some("repo:api")));
    }

    #[test]
    fn retry_alone_is_eligible() {
        assert!(eligible(&labels(&["retry"]), true, None));
    }

    fn repo_named(name: &str) -> RepoConfig {
        RepoConfig {
            name: name.into(),
            ..Default::default()
        }
    }

    fn tagged(mut i: Issue, repo: &str) -> Issue {
        i.repo = repo.into();
        i
    }

    #[tokio::test]
    async fn gather_orders_by_repo_then_number() {
        let api = Arc::new(MockProvider::with_issues(vec![
            tagged(issue(9, "nine", vec![]), "api"),
            tagged(issue(2, "two", vec![]), "api"),
        ]));
        let web = Arc::new(MockProvider::with_issues(vec![tagged(
            issue(5, "five", vec![]),
            "web",
        )]));
        let repos: Vec<(RepoConfig, Arc<dyn IssueProvider>)> = vec![
            (repo_named("web"), web),
            (repo_named("api"), api),
        ];

        let issues = gather(&repos).await;
        let order: Vec<(String, u64)> = issues
            .iter()
            .map(|i| (i.repo.clone(), i.number))
            .collect();
        assert_eq!(
            order,
            vec![
                ("api".to_string(), 2),
                ("api".to_string(), 9),
                ("web".to_string(), 5)
            ]
        );
    }

    struct FailingProvider;

    #[async_trait]
    impl IssueProvider for FailingProvider {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn get_issues(&self) -> anyhow::Result<Vec<Issue>> {
            anyhow::bail!("boom")
        }
        async fn add_label(&self, _: &Issue, _: &str) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn remove_label(&self, _: &Issue, _: &str) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn post_comment(&self, _: &Issue, _: &str) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn move_to_column(&self, _: &Issue, _: Column) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn create_sub_issue(
            &self,
            _: &Issue,
            _: &str,
            _: &str,
        ) -> anyhow::Result<SubIssue> {
            unimplemented!()
        }
        async fn ensure_labels_exist(&self) -> anyhow::Result<()> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn gather_survives_a_failing_repo() {
        let ok = Arc::new(MockProvider::with_issues(vec![tagged(
            issue(1, "one", vec![]),
            "api",
        )]));
        let repos: Vec<(RepoConfig, Arc<dyn IssueProvider>)> = vec![
            (repo_named("down"), Arc::new(FailingProvider)),
            (repo_named("api"), ok),
        ];
        let issues = gather(&repos).await;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].number, 1);
    }
}
