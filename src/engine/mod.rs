//! The poll loop.
//!
//! One async loop owns the whole workflow: gather ready issues across every
//! configured repo, dispatch the first one through an executor, and repeat
//! until the round comes up empty, then sleep until the next tick. A failed
//! first attempt leaves `retry` on the issue, so the same drain round picks
//! it up for its second (and last) automatic attempt.
//!
//! Providers are constructed once at startup and reused across polls so
//! per-repo caches (Linear label ids) stay warm. SIGINT and SIGTERM end the
//! loop between runs; an in-flight executor run finishes first.

pub mod process;

use std::sync::Arc;

use anyhow::{bail, Context};

use crate::config::{self, Config, RepoConfig};
use crate::executors::{create_executor, Executor, ExecutorOptions};
use crate::providers::{create_provider, Issue, IssueProvider};
use crate::{intake, status};

/// Seconds between polls when neither the CLI nor the config says otherwise.
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

/// Flags carried from `vibesprint run` into the loop.
#[derive(Debug, Default)]
pub struct RunOptions {
    /// List ready issues and exit without touching anything.
    pub dry_run: bool,
    /// Poll interval override in seconds.
    pub interval: Option<u64>,
    /// Echo executor output as it streams.
    pub verbose: bool,
    /// Executor override for this invocation.
    pub executor: Option<String>,
}

/// Start polling. Blocks until SIGINT/SIGTERM (or returns immediately after
/// one listing pass under `--dry-run`).
pub async fn run(options: RunOptions) -> anyhow::Result<()> {
    let config = config::load()?;
    if config.repos.is_empty() {
        bail!("no repos configured - run `vibesprint config add-repo` first");
    }
    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            tracing::error!("{problem}");
        }
        bail!("configuration is invalid ({} problem(s))", problems.len());
    }

    let mut repos: Vec<(RepoConfig, Arc<dyn IssueProvider>)> = Vec::new();
    for repo in &config.repos {
        let provider = create_provider(repo)
            .with_context(|| format!("failed to initialize provider for `{}`", repo.name))?;
        repos.push((repo.clone(), provider));
    }

    let executor_name = options
        .executor
        .clone()
        .or_else(|| config.executor.clone())
        .unwrap_or_else(|| "kiro".to_string());
    let executor = create_executor(&executor_name);
    let problems = executor.validate_setup();
    if !problems.is_empty() {
        for problem in &problems {
            tracing::error!("{problem}");
        }
        bail!("executor `{}` is not ready", executor.name());
    }

    if !options.dry_run {
        for (repo, provider) in &repos {
            if let Err(e) = provider.ensure_labels_exist().await {
                tracing::warn!(repo = %repo.name, error = %e, "failed to ensure workflow labels");
            }
        }
    }

    let interval_secs = options
        .interval
        .or(config.interval)
        .unwrap_or(DEFAULT_INTERVAL_SECS);
    tracing::info!(
        repos = repos.len(),
        executor = executor.name(),
        interval_secs,
        dry_run = options.dry_run,
        daemon = std::env::var_os(crate::daemon::DAEMON_ENV).is_some(),
        "vibesprint starting"
    );

    poll(&config, &repos, executor.as_ref(), &options).await;
    if options.dry_run {
        return Ok(());
    }

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    // The first tick fires immediately and we already polled above.
    ticker.tick().await;

    // SIGTERM is what launchd/systemd (and `vibesprint daemon stop`) send.
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                poll(&config, &repos, executor.as_ref(), &options).await;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }
        }
    }

    tracing::info!("vibesprint stopped");
    Ok(())
}

/// One poll round: drain ready issues one at a time, re-gathering after each
/// run so state changes (labels, column moves) are observed before the next
/// pick.
async fn poll(
    config: &Config,
    repos: &[(RepoConfig, Arc<dyn IssueProvider>)],
    default_executor: &dyn Executor,
    options: &RunOptions,
) {
    loop {
        let issues = intake::gather(repos).await;
        if issues.is_empty() {
            tracing::info!("no ready issues");
            return;
        }

        if options.dry_run {
            println!("Would process {} issue(s):", issues.len());
            for issue in &issues {
                let tags = status::issue_tags(issue);
                if tags.is_empty() {
                    println!("  {} {}: {}", issue.repo, issue.display_ref(), issue.title);
                } else {
                    println!(
                        "  {} {}: {} {}",
                        issue.repo,
                        issue.display_ref(),
                        issue.title,
                        tags
                    );
                }
            }
            return;
        }

        let issue = &issues[0];

        let mut override_executor: Option<Box<dyn Executor>> = None;
        if let Some(name) = &issue.executor {
            if name.as_str() != default_executor.name() {
                let candidate = create_executor(name);
                let problems = candidate.validate_setup();
                if !problems.is_empty() {
                    for problem in &problems {
                        tracing::error!(issue = %issue.display_ref(), "{problem}");
                    }
                    // The issue stays ready, so continuing the drain would
                    // pick it again straight away. End the round instead.
                    return;
                }
                override_executor = Some(candidate);
            }
        }
        let executor = override_executor.as_deref().unwrap_or(default_executor);

        let Some((repo, provider)) = repos.iter().find(|(r, _)| r.name == issue.repo) else {
            tracing::warn!(repo = %issue.repo, "gathered issue references an unknown repo");
            return;
        };

        let exec_options = ExecutorOptions {
            model: resolve_model(issue, executor.name(), config),
            verbose: options.verbose,
        };
        process::process_issue(repo, provider.as_ref(), executor, issue, &exec_options).await;
    }
}

/// Model for a run: the issue's `model:` label wins, then the config default
/// for the executor family.
fn resolve_model(issue: &Issue, executor_name: &str, config: &Config) -> Option<String> {
    issue.model.clone().or_else(|| match executor_name {
        "codex" => config.codex_model.clone(),
        _ => config.model.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::testing::MockExecutor;
    use crate::providers::testing::{issue, MockProvider};

    // A dry-run round prints the listing and ends: no executor run, no label
    // or column mutation, no comment.
    #[tokio::test]
    async fn dry_run_lists_without_dispatching() {
        let provider = Arc::new(MockProvider::with_issues(vec![
            issue(1, "Add login", vec![]),
            issue(2, "Split the feature", vec!["plan"]),
        ]));
        let repo = RepoConfig {
            name: "api".into(),
            ..Default::default()
        };
        let repos: Vec<(RepoConfig, Arc<dyn IssueProvider>)> = vec![(repo, provider.clone())];
        let executor = MockExecutor::with_results(vec![]);
        let options = RunOptions {
            dry_run: true,
            ..Default::default()
        };

        poll(&Config::default(), &repos, &executor, &options).await;

        assert!(executor.recorded_prompts().is_empty());
        assert!(provider.current_labels().is_empty());
        assert!(provider.posted_comments().is_empty());
        assert!(provider.columns_moved_to().is_empty());
    }

    #[test]
    fn issue_model_label_wins() {
        let i = issue(1, "t", vec!["model:claude-opus-4.5"]);
        let config = Config {
            model: Some("claude-sonnet-4.5".into()),
            ..Default::default()
        };
        assert_eq!(
            resolve_model(&i, "kiro", &config),
            Some("claude-opus-4.5".into())
        );
    }

    #[test]
    fn config_default_depends_on_executor_family() {
        let i = issue(1, "t", vec![]);
        let config = Config {
            model: Some("claude-sonnet-4.5".into()),
            codex_model: Some("gpt-5.2-codex".into()),
            ..Default::default()
        };
        assert_eq!(
            resolve_model(&i, "kiro", &config),
            Some("claude-sonnet-4.5".into())
        );
        assert_eq!(
            resolve_model(&i, "codex", &config),
            Some("gpt-5.2-codex".into())
        );
    }

    #[test]
    fn no_label_and_no_config_means_cli_default() {
        let i = issue(1, "t", vec![]);
        assert_eq!(resolve_model(&i, "kiro", &Config::default()), None);
    }
}
