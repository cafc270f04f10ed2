//! Git operations — branch, commit, push, PR creation.
//!
//! These run after a successful implementation run to turn the executor's
//! working-tree changes into an open PR. The repo's default branch is
//! restored afterwards whether or not publication succeeded.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;

use crate::cmd::CommandErrorContext;
use crate::config::RepoConfig;
use crate::providers::{Issue, IssueProvider};

static PR_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://github\.com/\S+").expect("BUG: pr url regex is invalid")
});

/// Branch-safe slug from an issue title: lowercase, dash-separated, at most
/// 30 chars, never empty.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    let mut prev_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash && !slug.is_empty() {
            slug.push('-');
            prev_dash = true;
        }
    }
    let mut slug = slug.trim_end_matches('-').to_string();
    slug.truncate(30);
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "issue".to_string()
    } else {
        slug.to_string()
    }
}

/// Conventional prefix for the branch name and commit subject.
pub fn branch_prefix(labels: &[String]) -> &'static str {
    let has = |names: &[&str]| labels.iter().any(|l| names.contains(&l.as_str()));
    if has(&["bug", "fix"]) {
        "fix"
    } else if has(&["docs", "documentation"]) {
        "docs"
    } else if has(&["chore", "maintenance"]) {
        "chore"
    } else if has(&["refactor"]) {
        "refactor"
    } else if has(&["test", "testing"]) {
        "test"
    } else {
        "feat"
    }
}

/// `feat/42-add-login` (GitHub) or `feat/eng-42-add-login` (Linear).
pub fn branch_name(issue: &Issue) -> String {
    let prefix = branch_prefix(&issue.labels);
    let issue_ref = issue.display_ref().trim_start_matches('#').to_lowercase();
    format!("{prefix}/{issue_ref}-{}", slugify(&issue.title))
}

pub fn commit_message(issue: &Issue) -> String {
    let prefix = branch_prefix(&issue.labels);
    format!("{prefix}: {}\n\nRefs {}", issue.title, issue.display_ref())
}

/// PR body: the executor's own description when it produced one, otherwise a
/// summary built from the issue. Always carries the issue link (so merging
/// closes GitHub issues) and the credits footer when usage was reported.
pub fn build_pr_body(
    issue: &Issue,
    description: Option<&str>,
    credits: Option<f64>,
    time_seconds: Option<u64>,
) -> String {
    let mut body = match description {
        Some(d) if !d.trim().is_empty() => d.trim().to_string(),
        _ => {
            let summary = if issue.body.trim().is_empty() {
                "Auto-generated from issue."
            } else {
                issue.body.trim()
            };
            format!("## Summary\n\n{summary}")
        }
    };

    match &issue.identifier {
        Some(identifier) => {
            body.push_str(&format!("\n\nRefs Linear: [{identifier}]({})", issue.url))
        }
        None => body.push_str(&format!("\n\nFixes #{}", issue.number)),
    }

    if let Some(credits) = credits {
        body.push_str(&format!(
            "\n\n---\n🤖 *Generated by VibeSprint* • Credits: {credits}"
        ));
        if let Some(t) = time_seconds {
            body.push_str(&format!(" • Time: {t}s"));
        }
    }
    body
}

fn extract_pr_url(output: &str) -> Option<String> {
    PR_URL_PATTERN.find(output).map(|m| m.as_str().to_string())
}

async fn git(path: &Path, args: &[&str]) -> anyhow::Result<std::process::Output> {
    Command::new("git")
        .args(args)
        .current_dir(path)
        .output_with_context()
        .await
}

async fn gh(repo: &RepoConfig, path: &Path, args: &[&str]) -> anyhow::Result<std::process::Output> {
    let slug = format!("{}/{}", repo.owner, repo.repo);
    Command::new("gh")
        .args(["-R", &slug])
        .args(args)
        .current_dir(path)
        .output_with_context()
        .await
}

/// Run a git step whose failure is expected in some states (nothing stashed,
/// branch absent) and never worth surfacing.
async fn tolerated(path: &Path, args: &[&str]) {
    match git(path, args).await {
        Ok(out) if out.status.success() => {}
        Ok(out) => {
            let stderr = String::from_utf8_lossy(&out.stderr);
            tracing::debug!(args = ?args, stderr = %stderr.trim(), "git step failed, continuing");
        }
        Err(e) => tracing::debug!(args = ?args, error = %e, "git step failed, continuing"),
    }
}

/// Bring the default branch up to date, stashing the executor's uncommitted
/// changes around the pull so they survive onto the new work branch.
async fn refresh_default_branch(path: &Path, base: &str) {
    tolerated(path, &["stash", "--include-untracked"]).await;
    // A crashed run can leave the tree on an old work branch.
    tolerated(path, &["checkout", base]).await;
    match git(path, &["pull", "--rebase"]).await {
        Ok(out) if out.status.success() => {}
        Ok(out) => {
            let stderr = String::from_utf8_lossy(&out.stderr);
            tracing::warn!(stderr = %stderr.trim(), "pull --rebase failed, continuing with local state");
        }
        Err(e) => tracing::warn!(error = %e, "pull --rebase failed, continuing with local state"),
    }
    // A pop conflict means the changes are already applied; keep going.
    tolerated(path, &["stash", "pop"]).await;
}

async fn default_branch(path: &Path) -> String {
    if let Ok(out) = git(path, &["symbolic-ref", "refs/remotes/origin/HEAD", "--short"]).await {
        if out.status.success() {
            let full = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if let Some(name) = full.strip_prefix("origin/") {
                if !name.is_empty() {
                    return name.to_string();
                }
            }
        }
    }
    "main".to_string()
}

async fn checkout_work_branch(
    repo: &RepoConfig,
    issue: &Issue,
    branch: &str,
) -> anyhow::Result<()> {
    let path = repo.path.as_path();
    // A stale local branch from an earlier run would make checkout -b fail.
    // Deleting it can itself fail (in use by another worktree), hence the
    // checkout fallback below.
    tolerated(path, &["branch", "-D", branch]).await;

    // `gh issue develop` links issue and branch in the GitHub UI. Only
    // GitHub-sourced issues have a number gh can resolve.
    if issue.identifier.is_none() {
        let number = issue.number.to_string();
        if let Ok(out) = gh(
            repo,
            path,
            &["issue", "develop", &number, "--name", branch, "--checkout"],
        )
        .await
        {
            if out.status.success() {
                return Ok(());
            }
            let stderr = String::from_utf8_lossy(&out.stderr);
            tracing::debug!(branch, stderr = %stderr.trim(), "gh issue develop failed, using plain checkout");
        }
    }

    let created = git(path, &["checkout", "-b", branch]).await?;
    if created.status.success() {
        return Ok(());
    }
    let out = git(path, &["checkout", branch]).await?;
    if out.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&out.stderr);
    anyhow::bail!("failed to check out branch {branch}: {}", stderr.trim())
}

async fn find_existing_pr(
    repo: &RepoConfig,
    path: &Path,
    branch: &str,
) -> anyhow::Result<Option<u64>> {
    let out = gh(
        repo,
        path,
        &["pr", "list", "--head", branch, "--state", "open", "--json", "number"],
    )
    .await?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        tracing::debug!(branch, stderr = %stderr.trim(), "gh pr list failed");
        return Ok(None);
    }
    let prs: Vec<serde_json::Value> = serde_json::from_slice(&out.stdout).unwrap_or_default();
    Ok(prs
        .first()
        .and_then(|p| p.get("number"))
        .and_then(|n| n.as_u64()))
}

#[allow(clippy::too_many_arguments)]
async fn publish_branch(
    repo: &RepoConfig,
    issue: &Issue,
    branch: &str,
    base: &str,
    description: Option<&str>,
    credits: Option<f64>,
    time_seconds: Option<u64>,
    executor_name: &str,
) -> anyhow::Result<String> {
    let path = repo.path.as_path();

    let add = git(path, &["add", "-A"]).await?;
    if !add.status.success() {
        let stderr = String::from_utf8_lossy(&add.stderr);
        anyhow::bail!("git add -A failed: {}", stderr.trim());
    }

    let status = git(path, &["status", "--porcelain"]).await?;
    if String::from_utf8_lossy(&status.stdout).trim().is_empty() {
        // An earlier run may already have pushed this branch and opened a PR.
        if let Some(number) = find_existing_pr(repo, path, branch).await? {
            let url = format!(
                "https://github.com/{}/{}/pull/{number}",
                repo.owner, repo.repo
            );
            tracing::info!(issue = %issue.display_ref(), url = %url, "no new changes, reusing existing PR");
            return Ok(url);
        }
        anyhow::bail!(
            "No changes were made by {executor_name}. Check if the issue was already resolved or needs clearer instructions."
        );
    }

    let message = commit_message(issue);
    let commit = git(path, &["commit", "-m", &message]).await?;
    if !commit.status.success() {
        let stderr = String::from_utf8_lossy(&commit.stderr);
        anyhow::bail!(
            "Failed to commit changes: {}\n\n\
             Ensure git user.name and user.email are configured:\n  \
             git config --global user.name \"Your Name\"\n  \
             git config --global user.email \"your@email.com\"",
            stderr.trim()
        );
    }

    let push = git(path, &["push", "-u", "origin", branch, "--force-with-lease"]).await?;
    if !push.status.success() {
        tracing::warn!(branch, "push with lease failed, retrying with --force");
        let force = git(path, &["push", "-u", "origin", branch, "--force"]).await?;
        if !force.status.success() {
            let stderr = String::from_utf8_lossy(&force.stderr);
            anyhow::bail!("Failed to push branch {branch}: {}", stderr.trim());
        }
    }

    let body = build_pr_body(issue, description, credits, time_seconds);
    if let Some(number) = find_existing_pr(repo, path, branch).await? {
        let edit = gh(
            repo,
            path,
            &["pr", "edit", &number.to_string(), "--body", &body],
        )
        .await?;
        if !edit.status.success() {
            let stderr = String::from_utf8_lossy(&edit.stderr);
            tracing::warn!(pr = number, stderr = %stderr.trim(), "failed to update existing PR body");
        }
        return Ok(format!(
            "https://github.com/{}/{}/pull/{number}",
            repo.owner, repo.repo
        ));
    }

    let create = gh(
        repo,
        path,
        &[
            "pr", "create", "--title", &issue.title, "--body", &body, "--head", branch, "--base",
            base,
        ],
    )
    .await?;
    if !create.status.success() {
        let stderr = String::from_utf8_lossy(&create.stderr);
        anyhow::bail!("Failed to create PR: {}", stderr.trim());
    }
    let stdout = String::from_utf8_lossy(&create.stdout);
    Ok(extract_pr_url(&stdout)
        .unwrap_or_else(|| format!("https://github.com/{}/{}/pulls", repo.owner, repo.repo)))
}

/// Publish the executor's changes: fresh branch off the default branch,
/// commit, push, and an opened (or updated) PR. Returns the PR URL.
pub async fn create_branch_and_pr(
    repo: &RepoConfig,
    issue: &Issue,
    description: Option<String>,
    credits: Option<f64>,
    time_seconds: Option<u64>,
    executor_name: &str,
    provider: &dyn IssueProvider,
) -> anyhow::Result<String> {
    let path = repo.path.as_path();
    let branch = branch_name(issue);
    let base = default_branch(path).await;

    refresh_default_branch(path, &base).await;
    checkout_work_branch(repo, issue, &branch).await?;

    let result = publish_branch(
        repo,
        issue,
        &branch,
        &base,
        description.as_deref(),
        credits,
        time_seconds,
        executor_name,
    )
    .await;

    // Land back on the default branch whatever happened above.
    match git(path, &["checkout", &base]).await {
        Ok(out) if out.status.success() => {}
        Ok(out) => {
            let stderr = String::from_utf8_lossy(&out.stderr);
            tracing::warn!(base, stderr = %stderr.trim(), "failed to restore default branch");
        }
        Err(e) => tracing::warn!(base, error = %e, "failed to restore default branch"),
    }

    let url = result?;

    // GitHub links the PR through "Fixes #n"; Linear needs it attached.
    if provider.name() == "linear" {
        if let Err(e) = provider.attach_pr(issue, &url).await {
            tracing::warn!(issue = %issue.display_ref(), error = %e, "failed to attach PR to Linear issue");
        }
        if let Err(e) = provider
            .post_comment(issue, &format!("🔗 PR created: {url}"))
            .await
        {
            tracing::warn!(issue = %issue.display_ref(), error = %e, "failed to post PR link comment");
        }
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::issue;

    #[test]
    fn slugify_basics() {
        assert_eq!(slugify("Add Login Page!"), "add-login-page");
        assert_eq!(slugify("fix: crash on startup"), "fix-crash-on-startup");
        assert_eq!(slugify("already-a-slug"), "already-a-slug");
    }

    #[test]
    fn slugify_is_idempotent() {
        for title in ["Add Login Page!", "fix: crash on startup", "!!!"] {
            let once = slugify(title);
            assert_eq!(slugify(&once), once);
        }
    }

    #[test]
    fn slugify_clips_without_trailing_dash() {
        let slug = slugify("A very long title that keeps going and going and going");
        assert!(slug.len() <= 30);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn slugify_empty_falls_back() {
        assert_eq!(slugify("!!!"), "issue");
        assert_eq!(slugify(""), "issue");
    }

    #[test]
    fn prefix_follows_labels() {
        let l = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(branch_prefix(&l(&["bug"])), "fix");
        assert_eq!(branch_prefix(&l(&["fix"])), "fix");
        assert_eq!(branch_prefix(&l(&["documentation"])), "docs");
        assert_eq!(branch_prefix(&l(&["chore"])), "chore");
        assert_eq!(branch_prefix(&l(&["maintenance"])), "chore");
        assert_eq!(branch_prefix(&l(&["refactor"])), "refactor");
        assert_eq!(branch_prefix(&l(&["testing"])), "test");
        assert_eq!(branch_prefix(&l(&["enhancement"])), "feat");
        assert_eq!(branch_prefix(&l(&[])), "feat");
    }

    #[test]
    fn prefix_priority_bug_over_test() {
        let labels = vec!["testing".to_string(), "bug".to_string()];
        assert_eq!(branch_prefix(&labels), "fix");
    }

    #[test]
    fn branch_name_github() {
        let i = issue(42, "Add login", vec![]);
        assert_eq!(branch_name(&i), "feat/42-add-login");
    }

    #[test]
    fn branch_name_linear_uses_identifier() {
        let mut i = issue(42, "Add login", vec!["bug"]);
        i.identifier = Some("ENG-42".into());
        assert_eq!(branch_name(&i), "fix/eng-42-add-login");
    }

    #[test]
    fn commit_message_refs_issue() {
        let i = issue(42, "Add login", vec![]);
        assert_eq!(commit_message(&i), "feat: Add login\n\nRefs #42");
    }

    #[test]
    fn pr_body_fallback_closes_issue() {
        let mut i = issue(42, "Add login", vec![]);
        i.body = "Support OAuth".into();
        let body = build_pr_body(&i, None, None, None);
        assert!(body.starts_with("## Summary\n\nSupport OAuth"));
        assert!(body.contains("Fixes #42"));
    }

    #[test]
    fn pr_body_empty_issue_body() {
        let i = issue(42, "Add login", vec![]);
        let body = build_pr_body(&i, None, None, None);
        assert!(body.contains("Auto-generated from issue."));
    }

    #[test]
    fn pr_body_prefers_executor_description() {
        let i = issue(42, "Add login", vec![]);
        let body = build_pr_body(&i, Some("Implemented OAuth login flow."), None, None);
        assert!(body.starts_with("Implemented OAuth login flow."));
        assert!(!body.contains("## Summary"));
        assert!(body.contains("Fixes #42"));
    }

    #[test]
    fn pr_body_linear_ref() {
        let mut i = issue(7, "Fix crash", vec![]);
        i.identifier = Some("ENG-7".into());
        i.url = "https://linear.app/acme/issue/ENG-7".into();
        let body = build_pr_body(&i, None, None, None);
        assert!(body.contains("Refs Linear: [ENG-7](https://linear.app/acme/issue/ENG-7)"));
        assert!(!body.contains("Fixes #"));
    }

    #[test]
    fn pr_body_credits_footer() {
        let i = issue(42, "Add login", vec![]);
        let body = build_pr_body(&i, None, Some(2.5), Some(222));
        assert!(body.contains("🤖 *Generated by VibeSprint* • Credits: 2.5 • Time: 222s"));
        let without = build_pr_body(&i, None, None, Some(222));
        assert!(!without.contains("Generated by VibeSprint"));
    }

    #[test]
    fn pr_url_extraction() {
        let out = "Creating pull request...\nhttps://github.com/acme/api/pull/17\n";
        assert_eq!(
            extract_pr_url(out),
            Some("https://github.com/acme/api/pull/17".to_string())
        );
        assert_eq!(extract_pr_url("no url in here"), None);
    }
}
