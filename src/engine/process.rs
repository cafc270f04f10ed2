//! Dispatch of a single claimed issue through an executor run.
//!
//! `process_issue` is the one entry point: it claims the issue on the
//! tracker, builds the prompt, runs the executor in the repo checkout, and
//! records the outcome. Planning issues fan out into sub-issues; everything
//! else ends in a pull request.
//!
//! Nothing in here returns an error. A run that goes wrong is recorded on
//! the issue itself (`retry` or `failed` plus an error comment) so the poll
//! loop can move on to the next issue without unwinding.

use crate::config::RepoConfig;
use crate::executors::{Executor, ExecutorOptions};
use crate::providers::{Issue, IssueProvider};
use crate::{context, git_ops, issue_logs, parser, status};

/// Run one issue end to end.
pub async fn process_issue(
    repo: &RepoConfig,
    provider: &dyn IssueProvider,
    executor: &dyn Executor,
    issue: &Issue,
    options: &ExecutorOptions,
) {
    let run_id = status::new_run_id();
    let is_retry = issue.is_retry();
    tracing::info!(
        issue = %issue.display_ref(),
        repo = %issue.repo,
        run_id = %run_id,
        executor = executor.name(),
        tags = %status::issue_tags(issue),
        "processing issue"
    );

    // Consume the retry marker up front so a second failure is terminal.
    if is_retry {
        if let Err(e) = provider.remove_label(issue, "retry").await {
            tracing::warn!(issue = %issue.display_ref(), error = %e, "failed to remove retry label");
        }
    }

    status::mark_running(provider, issue).await;
    issue_logs::start_log(&issue.repo, issue.number, &issue.display_ref(), &issue.title);
    issue_logs::append_log(
        &issue.repo,
        issue.number,
        &format!(
            "run {run_id} executor={} model={}",
            executor.name(),
            options.model.as_deref().unwrap_or("auto")
        ),
    );

    if issue.is_plan() {
        process_plan(repo, provider, executor, issue, options, &run_id, is_retry).await;
    } else {
        process_implementation(repo, provider, executor, issue, options, &run_id, is_retry).await;
    }
}

/// Planning run: the executor writes a plan block, we turn it into
/// sub-issues in Backlog and park the parent in In Progress.
async fn process_plan(
    repo: &RepoConfig,
    provider: &dyn IssueProvider,
    executor: &dyn Executor,
    issue: &Issue,
    options: &ExecutorOptions,
    run_id: &str,
    is_retry: bool,
) {
    let prompt = context::build_plan_context(provider, issue).await;
    let result = executor.execute(&prompt, &repo.path, options).await;

    if !result.success {
        record_failure(
            provider,
            issue,
            is_retry,
            run_id,
            result.exit_code,
            &result.stdout,
            &result.stderr,
        )
        .await;
        return;
    }

    let tasks = parser::parse_plan_output(&result.stdout);
    if tasks.is_empty() {
        tracing::warn!(issue = %issue.display_ref(), "plan run finished without a plan block");
        record_failure(
            provider,
            issue,
            is_retry,
            run_id,
            1,
            &result.stdout,
            "No tasks found in plan output",
        )
        .await;
        return;
    }

    if let Err(e) = provider
        .post_comment(issue, &status::plan_comment(&tasks))
        .await
    {
        tracing::warn!(issue = %issue.display_ref(), error = %e, "failed to post plan comment");
    }

    // Sub-issues are created in order so their numbers read like the plan.
    for task in &tasks {
        match provider.create_sub_issue(issue, &task.title, &task.body).await {
            Ok(sub) => {
                issue_logs::append_log(
                    &issue.repo,
                    issue.number,
                    &format!("sub-issue #{} ({}): {}", sub.number, sub.id, task.title),
                );
                tracing::info!(
                    issue = %issue.display_ref(),
                    sub_issue = sub.number,
                    title = %task.title,
                    "created sub-issue"
                );
            }
            Err(e) => {
                record_failure(
                    provider,
                    issue,
                    is_retry,
                    run_id,
                    1,
                    "",
                    &format!("Failed to create sub-issue '{}': {e}", task.title),
                )
                .await;
                return;
            }
        }
    }

    status::finish_plan(provider, issue).await;
    issue_logs::append_log(
        &issue.repo,
        issue.number,
        &format!("plan posted: {} sub-issue(s)", tasks.len()),
    );
    tracing::info!(issue = %issue.display_ref(), tasks = tasks.len(), "plan posted");
}

/// Implementation run: the executor edits the checkout, we publish a branch
/// and pull request and move the issue to In Review.
async fn process_implementation(
    repo: &RepoConfig,
    provider: &dyn IssueProvider,
    executor: &dyn Executor,
    issue: &Issue,
    options: &ExecutorOptions,
    run_id: &str,
    is_retry: bool,
) {
    let prompt = context::build_context(provider, issue).await;
    let result = executor.execute(&prompt, &repo.path, options).await;
    tracing::debug!(
        issue = %issue.display_ref(),
        exit_code = result.exit_code,
        stdout_len = result.stdout.len(),
        credits = ?result.credits,
        tokens = ?result.tokens_used,
        "executor finished"
    );

    if !result.success {
        record_failure(
            provider,
            issue,
            is_retry,
            run_id,
            result.exit_code,
            &result.stdout,
            &result.stderr,
        )
        .await;
        return;
    }

    let description = parser::parse_pr_description(&result.stdout);
    match git_ops::create_branch_and_pr(
        repo,
        issue,
        description,
        result.credits,
        result.time_seconds,
        executor.name(),
        provider,
    )
    .await
    {
        Ok(url) => {
            issue_logs::append_log(&issue.repo, issue.number, &format!("PR: {url}"));
            status::finish_implementation(provider, issue).await;
            tracing::info!(issue = %issue.display_ref(), pr = %url, "pull request ready");
        }
        Err(e) => {
            tracing::warn!(issue = %issue.display_ref(), error = %e, "failed to publish branch");
            record_failure(provider, issue, is_retry, run_id, 1, "", &e.to_string()).await;
        }
    }
}

/// Put the same text in the issue log that `mark_failure` puts in the error
/// comment, so a run can be diagnosed without tracker access.
async fn record_failure(
    provider: &dyn IssueProvider,
    issue: &Issue,
    is_retry: bool,
    run_id: &str,
    exit_code: i32,
    stdout: &str,
    stderr: &str,
) {
    issue_logs::append_log(
        &issue.repo,
        issue.number,
        &status::error_comment(run_id, exit_code, stdout, stderr),
    );
    status::mark_failure(provider, issue, is_retry, run_id, exit_code, stdout, stderr).await;
}
