//! Per-issue run logs under `~/.vibesprint/logs/`.
//!
//! One file per issue, restarted on each dispatch. Logging failures are
//! warnings only: a full disk should never fail a run.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::home;

pub fn log_path(repo: &str, number: u64) -> anyhow::Result<PathBuf> {
    Ok(home::logs_dir()?.join(format!("{repo}-{number}.log")))
}

/// Start a fresh log for a dispatched issue, truncating any previous run's.
pub fn start_log(repo: &str, number: u64, issue_ref: &str, title: &str) {
    match log_path(repo, number) {
        Ok(path) => start_log_at(&path, issue_ref, title),
        Err(e) => tracing::warn!(error = %e, "cannot resolve issue log path"),
    }
}

fn start_log_at(path: &Path, issue_ref: &str, title: &str) {
    let header = format!(
        "=== Issue {issue_ref}: {title} ===\n{}\n\n",
        chrono::Utc::now().to_rfc3339()
    );
    if let Err(e) = std::fs::write(path, header) {
        tracing::warn!(path = %path.display(), error = %e, "failed to start issue log");
    }
}

/// Append to an issue's log. A log that was never started is left absent.
pub fn append_log(repo: &str, number: u64, text: &str) {
    if let Ok(path) = log_path(repo, number) {
        append_log_at(&path, text);
    }
}

fn append_log_at(path: &Path, text: &str) {
    if !path.exists() {
        return;
    }
    let result = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .and_then(|mut f| writeln!(f, "{text}"));
    if let Err(e) = result {
        tracing::warn!(path = %path.display(), error = %e, "failed to append issue log");
    }
}

pub fn read_log(repo: &str, number: u64) -> String {
    match log_path(repo, number) {
        Ok(path) => read_log_at(&path),
        Err(_) => "No log found".to_string(),
    }
}

fn read_log_at(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_else(|_| "No log found".to_string())
}

/// Last `lines` lines of an issue's log.
pub fn tail_log(repo: &str, number: u64, lines: usize) -> String {
    tail(&read_log(repo, number), lines)
}

fn tail(content: &str, lines: usize) -> String {
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
