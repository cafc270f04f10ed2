//! Delimiter scanning over raw executor output.
//!
//! Executors are asked to frame structured sections of their free-form output
//! with marker lines:
//!
//! ```text
//! ---PR_DESCRIPTION_START---
//! <markdown>
//! ---PR_DESCRIPTION_END---
//! ```
//!
//! and, for planning runs:
//!
//! ```text
//! ---PLAN_START---
//! ## Task 1: <title>
//! <body>
//! ---PLAN_END---
//! ```
//!
//! Models are sloppy about the number of dashes, so the scanners accept any
//! count (including zero) around the marker keyword. All matching happens on
//! ANSI-stripped text since both CLIs colorize their streams.

use std::sync::LazyLock;

use regex::Regex;

/// Matches terminal escape sequences (`ESC [ ... letter`).
static ANSI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[a-zA-Z]").expect("BUG: ansi_pattern regex is invalid")
});

/// PR description block, dash-tolerant around both markers.
static PR_DESCRIPTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)-*PR_DESCRIPTION_START-*\n?(.*?)-*PR_DESCRIPTION_END-*")
        .expect("BUG: pr_description_pattern regex is invalid")
});

/// Plan block, dash-tolerant around both markers.
static PLAN_BLOCK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)-*PLAN_START-*\n?(.*?)-*PLAN_END-*")
        .expect("BUG: plan_block_pattern regex is invalid")
});

/// One task heading inside a plan block: `## Task <n>: <title>`.
static TASK_HEADING_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"## Task \d+:[ \t]*(.+)").expect("BUG: task_heading_pattern regex is invalid")
});

/// A single task parsed out of a plan block. Consumed immediately to create
/// one sub-issue per task; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanTask {
    pub title: String,
    pub body: String,
}

/// Remove ANSI escape sequences from terminal output.
pub fn strip_ansi(text: &str) -> String {
    ANSI_PATTERN.replace_all(text, "").into_owned()
}

/// Extract the PR description block from executor output.
///
/// Returns `None` when no markers are present — callers fall back to an
/// auto-generated PR body, so a missing block is not an error.
pub fn parse_pr_description(output: &str) -> Option<String> {
    let cleaned = strip_ansi(output);
    let caps = PR_DESCRIPTION_PATTERN.captures(&cleaned)?;
    Some(caps[1].trim().to_string())
}

/// Extract ordered `(title, body)` tasks from a plan block.
///
/// Returns an empty vec when the block or its task headings are missing; the
/// caller treats an empty plan as a run failure.
pub fn parse_plan_output(output: &str) -> Vec<PlanTask> {
    let cleaned = strip_ansi(output);
    let Some(caps) = PLAN_BLOCK_PATTERN.captures(&cleaned) else {
        return Vec::new();
    };
    let block = caps.get(1).map(|m| m.as_str()).unwrap_or("");

    // The body of each task runs from the end of its heading line to the
    // start of the next heading (or the end of the block).
    let headings: Vec<(usize, usize, String)> = TASK_HEADING_PATTERN
        .captures_iter(block)
        .map(|c| {
            let whole = c.get(0).expect("BUG: capture 0 always present");
            let title = c
                .get(1)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            (whole.start(), whole.end(), title)
        })
        .collect();

    let mut tasks = Vec::with_capacity(headings.len());
    for (i, (_, end, title)) in headings.iter().enumerate() {
        let body_end = headings
            .get(i + 1)
            .map(|(next_start, _, _)| *next_start)
            .unwrap_or(block.len());
        tasks.push(PlanTask {
            title: title.clone(),
            body: block[*end..body_end].trim().to_string(),
        });
    }
    tasks
}
