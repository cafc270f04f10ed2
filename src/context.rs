//! Prompt assembly for executor runs.
//!
//! The prompt templates live in `prompts/` and are compiled into the binary.
//! They use a tiny template dialect: `{{VAR}}` substitution plus
//! `{{#if VAR}}...{{/if}}` blocks that render only when the variable is
//! non-empty.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::providers::{Issue, IssueProvider};

const IMPLEMENT_TEMPLATE: &str = include_str!("../prompts/implement.md");
const CURATED_TEMPLATE: &str = include_str!("../prompts/implement_curated.md");
const PLAN_TEMPLATE: &str = include_str!("../prompts/plan.md");

/// Matches `{{#if VAR}}...{{/if}}` blocks (non-greedy, dotall).
static IF_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{\{#if\s+(\w+)\}\}(.*?)\{\{/if\}\}")
        .expect("BUG: if_pattern regex is invalid")
});

/// Matches `{{VAR}}` variable placeholders.
static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{(\w+)\}\}").expect("BUG: var_pattern regex is invalid")
});

fn render(template: &str, vars: &HashMap<&str, String>) -> String {
    let mut data = template.to_string();

    loop {
        let mut changed = false;
        let new_data = IF_PATTERN
            .replace_all(&data, |caps: &regex::Captures| {
                changed = true;
                let var_name = &caps[1];
                let content = &caps[2];
                match vars.get(var_name) {
                    Some(value) if !value.trim().is_empty() => content.to_string(),
                    _ => String::new(),
                }
            })
            .to_string();

        data = new_data;
        if !changed {
            break;
        }
    }

    VAR_PATTERN
        .replace_all(&data, |caps: &regex::Captures| {
            let var_name: &str = &caps[1];
            vars.get(var_name).cloned().unwrap_or_default()
        })
        .to_string()
}

async fn issue_vars(provider: &dyn IssueProvider, issue: &Issue) -> HashMap<&'static str, String> {
    let body = if issue.body.trim().is_empty() {
        "No description provided.".to_string()
    } else {
        issue.body.clone()
    };
    // Missing comments are never worth failing a run over.
    let comments = match provider.fetch_comments(issue).await {
        Ok(comments) => comments.join("\n\n"),
        Err(e) => {
            tracing::warn!(issue = %issue.display_ref(), error = %e, "failed to fetch comments");
            String::new()
        }
    };

    let mut vars = HashMap::new();
    vars.insert("ISSUE_REF", issue.display_ref());
    vars.insert("TITLE", issue.title.clone());
    vars.insert("BODY", body);
    vars.insert("COMMENTS", comments);
    vars
}

/// Implementation prompt for an issue. The curated three-phase template is
/// the default; a `no-curate` label opts into the plain one.
pub async fn build_context(provider: &dyn IssueProvider, issue: &Issue) -> String {
    let template = if issue.is_no_curate() {
        IMPLEMENT_TEMPLATE
    } else {
        CURATED_TEMPLATE
    };
    let vars = issue_vars(provider, issue).await;
    render(template, &vars)
}

/// Planning prompt asking for a task breakdown between plan markers.
pub async fn build_plan_context(provider: &dyn IssueProvider, issue: &Issue) -> String {
    let vars = issue_vars(provider, issue).await;
    render(PLAN_TEMPLATE, &vars)
}
