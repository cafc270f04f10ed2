//! Persistent configuration at `~/.vibesprint/config.json`.
//!
//! A flat JSON document: the list of monitored repos plus global defaults
//! (poll interval, executor, models). Loaded once at startup; nothing watches
//! the file for changes mid-run.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::home;

/// Which tracker backs a repo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Github,
    Linear,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Github => write!(f, "github"),
            Provider::Linear => write!(f, "linear"),
        }
    }
}

/// One monitored repository and its tracker linkage.
///
/// GitHub repos carry Projects v2 identifiers (project, Status field, and the
/// four column option ids); Linear repos carry team/workflow-state ids. Field
/// names follow the on-disk camelCase document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepoConfig {
    pub name: String,
    pub owner: String,
    pub repo: String,
    pub path: PathBuf,
    pub provider: Provider,

    // GitHub Projects v2 linkage.
    pub project_id: Option<String>,
    pub project_number: Option<u32>,
    pub column_field_id: Option<String>,
    /// Option id of the monitored Ready column.
    pub column_option_id: Option<String>,
    pub column_name: Option<String>,
    pub backlog_option_id: Option<String>,
    pub backlog_column_name: Option<String>,
    pub in_progress_option_id: Option<String>,
    pub in_progress_column_name: Option<String>,
    pub in_review_option_id: Option<String>,
    pub in_review_column_name: Option<String>,

    // Linear linkage.
    pub linear_team_id: Option<String>,
    pub linear_team_name: Option<String>,
    /// When several repos share one Linear team, only issues carrying this
    /// label belong to this repo.
    pub linear_repo_label: Option<String>,
    pub linear_backlog_state_id: Option<String>,
    pub linear_ready_state_id: Option<String>,
    pub linear_in_progress_state_id: Option<String>,
    pub linear_in_review_state_id: Option<String>,
}

/// The whole config document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub repos: Vec<RepoConfig>,
    /// Poll interval in seconds.
    pub interval: Option<u64>,
    /// Default executor name (`kiro` | `codex`).
    pub executor: Option<String>,
    /// Default model for kiro runs.
    pub model: Option<String>,
    /// Default model for codex runs.
    pub codex_model: Option<String>,
}

impl Config {
    /// Add a repo, replacing any existing entry with the same name.
    pub fn add_repo(&mut self, repo: RepoConfig) {
        if let Some(existing) = self.repos.iter_mut().find(|r| r.name == repo.name) {
            *existing = repo;
        } else {
            self.repos.push(repo);
        }
    }

    /// Remove a repo by name. Returns false when no such repo exists.
    pub fn remove_repo(&mut self, name: &str) -> bool {
        let before = self.repos.len();
        self.repos.retain(|r| r.name != name);
        self.repos.len() != before
    }

    pub fn find_repo(&self, name: &str) -> Option<&RepoConfig> {
        self.repos.iter().find(|r| r.name == name)
    }

    /// Collect every missing-linkage error across all repos so startup can
    /// print the full remediation list at once.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for repo in &self.repos {
            match repo.provider {
                Provider::Github => {
                    let required: [(&str, bool); 7] = [
                        ("owner", !repo.owner.is_empty()),
                        ("repo", !repo.repo.is_empty()),
                        ("projectId", repo.project_id.is_some()),
                        ("Ready column", repo.column_option_id.is_some()),
                        ("Backlog column", repo.backlog_option_id.is_some()),
                        ("In Progress column", repo.in_progress_option_id.is_some()),
                        ("In Review column", repo.in_review_option_id.is_some()),
                    ];
                    for (field, present) in required {
                        if !present {
                            errors.push(format!(
                                "repo '{}': missing {field} - re-run `vibesprint config add-repo`",
                                repo.name
                            ));
                        }
                    }
                    if repo.column_option_id.is_some() && repo.column_field_id.is_none() {
                        errors.push(format!(
                            "repo '{}': missing Status field id - re-run `vibesprint config add-repo`",
                            repo.name
                        ));
                    }
                }
                Provider::Linear => {
                    if repo.linear_team_id.is_none() {
                        errors.push(format!(
                            "repo '{}': missing Linear team id - re-run `vibesprint config add-repo --linear`",
                            repo.name
                        ));
                    }
                    if repo.linear_ready_state_id.is_none() {
                        errors.push(format!(
                            "repo '{}': missing Linear Ready state id - re-run `vibesprint config add-repo --linear`",
                            repo.name
                        ));
                    }
                }
            }
        }
        errors
    }
}

/// Load the config from `~/.vibesprint/config.json`.
pub fn load() -> anyhow::Result<Config> {
    Ok(load_from(&home::config_path()?))
}

/// Save the config to `~/.vibesprint/config.json`, pretty-printed.
pub fn save(config: &Config) -> anyhow::Result<()> {
    save_to(config, &home::config_path()?)
}

fn load_from(path: &Path) -> Config {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return Config::default();
    };
    match serde_json::from_str(&raw) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "config file corrupted, using defaults");
            Config::default()
        }
    }
}

fn save_to(config: &Config, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Linear API key from the environment.
pub fn linear_api_key() -> Option<String> {
    std::env::var("LINEAR_API_KEY").ok().filter(|k| !k.is_empty())
}
