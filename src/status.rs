//! Workflow status: run ids, tracker comments, and the label/column
//! transitions issues go through while being processed.
//!
//! Every transition here is best-effort. A tracker hiccup while removing
//! `running` must not unwind a run that already pushed a branch, so failures
//! are logged and swallowed.

use crate::parser::PlanTask;
use crate::providers::{Column, Issue, IssueProvider};

const MAX_COMMENT_OUTPUT: usize = 2000;

/// Short id correlating log lines, error comments, and issue logs for one run.
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

/// Label applied when a run fails: first failures get `retry` (one automatic
/// second attempt), failed retries get `failed` and wait for a human.
pub fn failure_label(is_retry: bool) -> &'static str {
    if is_retry {
        "failed"
    } else {
        "retry"
    }
}

/// Bracketed tag string for dry-run listings, e.g. `[plan][model:auto]`.
pub fn issue_tags(issue: &Issue) -> String {
    let mut tags = Vec::new();
    if issue.is_plan() {
        tags.push("plan".to_string());
    }
    if issue.is_no_curate() {
        tags.push("no-curate".to_string());
    }
    if let Some(model) = &issue.model {
        tags.push(format!("model:{model}"));
    }
    if let Some(executor) = &issue.executor {
        tags.push(format!("executor:{executor}"));
    }
    if issue.is_retry() {
        tags.push("retry".to_string());
    }
    tags.iter().map(|t| format!("[{t}]")).collect()
}

/// Failure comment posted to the issue. Shows stderr when present, stdout
/// otherwise, clipped to the last 2000 chars inside a details block.
pub fn error_comment(run_id: &str, exit_code: i32, stdout: &str, stderr: &str) -> String {
    let output = if stderr.is_empty() { stdout } else { stderr };
    let output = tail_chars(output, MAX_COMMENT_OUTPUT);
    let output = if output.is_empty() {
        "No output captured".to_string()
    } else {
        output
    };
    format!(
        "## ❌ VibeSprint Run Failed\n\n\
         **Run ID:** `{run_id}`\n\
         **Exit Code:** {exit_code}\n\n\
         <details>\n\
         <summary>Output (last 2000 chars)</summary>\n\n\
         ```\n{output}\n```\n\n\
         </details>"
    )
}

/// Plan comment posted to the parent issue before sub-issues are created.
pub fn plan_comment(tasks: &[PlanTask]) -> String {
    let rendered: Vec<String> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| format!("## Task {}: {}\n{}", i + 1, t.title, t.body))
        .collect();
    format!(
        "## 📋 Plan Generated\n\n{}\n\n---\n*{} sub-issue(s) will be created in Backlog.*",
        rendered.join("\n\n"),
        tasks.len()
    )
}

fn tail_chars(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count <= max {
        s.to_string()
    } else {
        s.chars().skip(count - max).collect()
    }
}

async fn warn_on_error(issue: &Issue, what: &str, result: anyhow::Result<()>) {
    if let Err(e) = result {
        tracing::warn!(issue = %issue.display_ref(), error = %e, "failed to {what}");
    }
}

/// Claim an issue before dispatching it.
pub async fn mark_running(provider: &dyn IssueProvider, issue: &Issue) {
    warn_on_error(issue, "add running label", provider.add_label(issue, "running").await).await;
}

/// Record a failed run: drop `running`, apply `retry` or `failed`, and post
/// the error comment.
pub async fn mark_failure(
    provider: &dyn IssueProvider,
    issue: &Issue,
    is_retry: bool,
    run_id: &str,
    exit_code: i32,
    stdout: &str,
    stderr: &str,
) {
    warn_on_error(
        issue,
        "remove running label",
        provider.remove_label(issue, "running").await,
    )
    .await;
    let label = failure_label(is_retry);
    warn_on_error(
        issue,
        "add failure label",
        provider.add_label(issue, label).await,
    )
    .await;
    warn_on_error(
        issue,
        "post error comment",
        provider
            .post_comment(issue, &error_comment(run_id, exit_code, stdout, stderr))
            .await,
    )
    .await;
}

/// Record a completed implementation run: `pr-opened` and over to In Review.
pub async fn finish_implementation(provider: &dyn IssueProvider, issue: &Issue) {
    warn_on_error(
        issue,
        "remove running label",
        provider.remove_label(issue, "running").await,
    )
    .await;
    warn_on_error(
        issue,
        "add pr-opened label",
        provider.add_label(issue, "pr-opened").await,
    )
    .await;
    warn_on_error(
        issue,
        "move to In Review",
        provider.move_to_column(issue, Column::InReview).await,
    )
    .await;
}

/// Record a completed planning run: `plan-posted` and over to In Progress.
pub async fn finish_plan(provider: &dyn IssueProvider, issue: &Issue) {
    warn_on_error(
        issue,
        "remove running label",
        provider.remove_label(issue, "running").await,
    )
    .await;
    warn_on_error(
        issue,
        "add plan-posted label",
        provider.add_label(issue, "plan-posted").await,
    )
    .await;
    warn_on_error(
        issue,
        "move to In Progress",
        provider.move_to_column(issue, Column::InProgress).await,
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::{issue, MockProvider};

    #[test]
    fn run_ids_are_short_and_distinct() {
        let a = new_run_id();
        let b = new_run_id();
        assert_eq!(a.len(), 8);
        assert_eq!(b.len(), 8);
        assert_ne!(a, b);
    }

    #[test]
    fn failure_label_first_attempt_gets_retry() {
        assert_eq!(failure_label(false), "retry");
        assert_eq!(failure_label(true), "failed");
    }

    #[test]
    fn tags_render_in_brackets() {
        let i = issue(3, "t", vec!["plan", "model:auto", "executor:codex"]);
        assert_eq!(issue_tags(&i), "[plan][model:auto][executor:codex]");
        let bare = issue(4, "t", vec![]);
        assert_eq!(issue_tags(&bare), "");
    }

    #[test]
    fn error_comment_prefers_stderr() {
        let c = error_comment("abc12345", 2, "out text", "err text");
        assert!(c.contains("`abc12345`"));
        assert!(c.contains("**Exit Code:** 2"));
        assert!(c.contains("err text"));
        assert!(!c.contains("out text"));
    }

    #[test]
    fn error_comment_falls_back_to_stdout() {
        let c = error_comment("abc12345", 1, "only stdout", "");
        assert!(c.contains("only stdout"));
    }

    #[test]
    fn error_comment_handles_no_output() {
        let c = error_comment("abc12345", 1, "", "");
        assert!(c.contains("No output captured"));
    }

    #[test]
    fn error_comment_clips_to_last_2000_chars() {
        let long = format!("{}{}", "a".repeat(1500), "b".repeat(1500));
        let c = error_comment("abc12345", 1, "", &long);
        assert!(!c.contains("aaaa"));
        assert!(c.contains(&"b".repeat(1500)));
    }

    #[test]
    fn plan_comment_numbers_tasks() {
        let tasks = vec![
            PlanTask {
                title: "Add schema".into(),
                body: "### Description\nCreate tables".into(),
            },
            PlanTask {
                title: "Wire API".into(),
                body: "### Description\nExpose endpoints".into(),
            },
        ];
        let c = plan_comment(&tasks);
        assert!(c.starts_with("## 📋 Plan Generated"));
        assert!(c.contains("## Task 1: Add schema"));
        assert!(c.contains("## Task 2: Wire API"));
        assert!(c.contains("*2 sub-issue(s) will be created in Backlog.*"));
    }

    #[tokio::test]
    async fn first_failure_transitions_to_retry() {
        let provider = MockProvider::with_labels(vec!["running"]);
        let i = issue(7, "t", vec![]);
        mark_failure(&provider, &i, false, "run00001", 1, "", "boom").await;
        assert_eq!(provider.current_labels(), vec!["retry"]);
        let comments = provider.posted_comments();
        assert_eq!(comments.len(), 1);
        assert!(comments[0].contains("boom"));
    }

    #[tokio::test]
    async fn failed_retry_transitions_to_failed() {
        let provider = MockProvider::with_labels(vec!["running", "retry"]);
        let i = issue(7, "t", vec!["retry"]);
        mark_failure(&provider, &i, true, "run00001", 1, "", "boom").await;
        assert_eq!(provider.current_labels(), vec!["retry", "failed"]);
    }

    #[tokio::test]
    async fn namespaced_failure_uses_prefixed_labels() {
        let provider = MockProvider::with_labels(vec!["vibesprint:running"]).namespaced();
        let i = issue(7, "t", vec![]);
        mark_failure(&provider, &i, true, "run00001", 1, "", "boom").await;
        assert_eq!(provider.current_labels(), vec!["vibesprint:failed"]);
    }

    #[tokio::test]
    async fn implementation_success_choreography() {
        let provider = MockProvider::with_labels(vec!["running"]);
        let i = issue(42, "Add login", vec![]);
        finish_implementation(&provider, &i).await;
        assert_eq!(provider.current_labels(), vec!["pr-opened"]);
        assert_eq!(provider.columns_moved_to(), vec![Column::InReview]);
    }

    #[tokio::test]
    async fn plan_success_choreography() {
        let provider = MockProvider::with_labels(vec!["running"]);
        let i = issue(42, "Big feature", vec!["plan"]);
        finish_plan(&provider, &i).await;
        assert_eq!(provider.current_labels(), vec!["plan-posted"]);
        assert_eq!(provider.columns_moved_to(), vec![Column::InProgress]);
    }
}
