//! Subcommand implementations for everything besides the poll loop: repo
//! registration and the rest of config management, label provisioning,
//! executor listing, and per-issue log tailing.
//!
//! `config add-repo` is flag-driven. For GitHub repos it discovers the
//! Projects v2 linkage (project id, Status field, column option ids) through
//! `gh project list` / `gh project field-list`; for Linear repos the team and
//! workflow-state ids come in as flags, since Linear boards have no
//! discoverable canonical column set.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde_json::Value;
use tokio::process::Command;

use crate::cmd::CommandErrorContext;
use crate::config::{self, Provider, RepoConfig};
use crate::executors::create_executor;
use crate::issue_logs;
use crate::providers::create_provider;

/// Flags for `config add-repo`.
#[derive(Debug, clap::Args)]
pub struct AddRepoArgs {
    /// Local clone of the repository.
    #[arg(long)]
    pub path: PathBuf,
    /// Config entry name (defaults to the repository name).
    #[arg(long)]
    pub name: Option<String>,
    /// GitHub owner (defaults to `gh repo view` inside --path).
    #[arg(long)]
    pub owner: Option<String>,
    /// GitHub repository name (defaults to `gh repo view` inside --path).
    #[arg(long)]
    pub repo: Option<String>,
    /// Projects v2 board number (required when the owner has several boards).
    #[arg(long)]
    pub project_number: Option<u32>,
    /// Track issues on Linear instead of a GitHub project board.
    #[arg(long)]
    pub linear: bool,
    /// Linear team id (required with --linear).
    #[arg(long)]
    pub linear_team_id: Option<String>,
    /// Label that scopes Linear issues to this repo.
    #[arg(long)]
    pub linear_repo_label: Option<String>,
    /// Linear "Backlog" workflow state id.
    #[arg(long)]
    pub linear_backlog_state_id: Option<String>,
    /// Linear "Ready" workflow state id (the polled state).
    #[arg(long)]
    pub linear_ready_state_id: Option<String>,
    /// Linear "In Progress" workflow state id.
    #[arg(long)]
    pub linear_in_progress_state_id: Option<String>,
    /// Linear "In Review" workflow state id.
    #[arg(long)]
    pub linear_in_review_state_id: Option<String>,
}

/// Register a repository in the config, discovering GitHub board linkage
/// where needed.
pub async fn config_add_repo(args: AddRepoArgs) -> anyhow::Result<()> {
    let path = args
        .path
        .canonicalize()
        .with_context(|| format!("path does not exist: {}", args.path.display()))?;
    if !path.join(".git").exists() {
        bail!("{} is not a git repository", path.display());
    }

    let (owner, repo_name) = match (args.owner.clone(), args.repo.clone()) {
        (Some(o), Some(r)) => (o, r),
        (o, r) => {
            let (detected_owner, detected_repo) = detect_repo_slug(&path)
                .await
                .context("cannot detect the GitHub repository - pass --owner and --repo")?;
            (o.unwrap_or(detected_owner), r.unwrap_or(detected_repo))
        }
    };
    let name = args.name.clone().unwrap_or_else(|| repo_name.clone());

    let repo = if args.linear {
        linear_repo_config(&args, name, owner, repo_name, path)?
    } else {
        github_repo_config(&args, name, owner, repo_name, path).await?
    };

    println!("Added repo: {}", repo.name);
    println!("  provider: {}", repo.provider);
    println!("  repo: {}/{}", repo.owner, repo.repo);
    println!("  path: {}", repo.path.display());
    if let (Some(number), Some(column)) = (repo.project_number, &repo.column_name) {
        println!("  project: #{number}, polling column: {column}");
    }

    let mut config = config::load()?;
    config.add_repo(repo);
    config::save(&config)?;
    Ok(())
}

/// Print configured repos.
pub fn config_list() -> anyhow::Result<()> {
    let config = config::load()?;
    if config.repos.is_empty() {
        println!("No repos configured");
        println!("  Run `vibesprint config add-repo --path <dir>` to add one");
        return Ok(());
    }

    println!("{:<16} {:<8} {:<28} PATH", "NAME", "PROVIDER", "REPO");
    println!("{}", "-".repeat(80));
    for repo in &config.repos {
        println!(
            "{:<16} {:<8} {:<28} {}",
            repo.name,
            repo.provider.to_string(),
            format!("{}/{}", repo.owner, repo.repo),
            repo.path.display()
        );
    }
    Ok(())
}

/// Delete a repo from the config by name.
pub fn config_remove_repo(name: &str) -> anyhow::Result<()> {
    let mut config = config::load()?;
    if config.remove_repo(name) {
        config::save(&config)?;
        println!("Removed repo: {name}");
    } else {
        println!("No repo named: {name}");
    }
    Ok(())
}

/// Dump the config document.
pub fn config_show() -> anyhow::Result<()> {
    let config = config::load()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Create the workflow labels in every configured repo.
pub async fn labels() -> anyhow::Result<()> {
    let config = config::load()?;
    if config.repos.is_empty() {
        println!("No repos configured");
        return Ok(());
    }

    for repo in &config.repos {
        match create_provider(repo) {
            Ok(provider) => match provider.ensure_labels_exist().await {
                Ok(()) => println!("{:<16} labels ensured", repo.name),
                Err(e) => println!("{:<16} error: {e}", repo.name),
            },
            Err(e) => println!("{:<16} error: {e}", repo.name),
        }
    }
    Ok(())
}

/// List executors with availability and their model catalogs.
pub fn executors() {
    println!("{:<10} {:<10} PATH", "EXECUTOR", "STATUS");
    println!("{}", "-".repeat(60));

    for name in ["kiro", "codex"] {
        let executor = create_executor(name);
        match which::which(executor.binary()) {
            Ok(path) => println!("{:<10} {:<10} {}", name, "installed", path.display()),
            Err(_) => println!("{:<10} {:<10} ({} not found)", name, "missing", executor.binary()),
        }
        for model in executor.available_models() {
            println!("  model:{:<26} {}", model.value, model.name);
        }
    }
}

/// Print the tail of one issue's log file.
pub fn logs(repo: &str, number: u64, lines: usize) -> anyhow::Result<()> {
    if config::load()?.find_repo(repo).is_none() {
        eprintln!("note: no repo named '{repo}' in config");
    }
    println!("{}", issue_logs::tail_log(repo, number, lines));
    Ok(())
}

/// `owner/repo` of the checkout at `path`, via gh.
async fn detect_repo_slug(path: &Path) -> anyhow::Result<(String, String)> {
    let output = Command::new("gh")
        .args(["repo", "view", "--json", "nameWithOwner", "-q", ".nameWithOwner"])
        .current_dir(path)
        .output_with_context()
        .await?;
    if !output.status.success() {
        bail!(
            "gh repo view failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    let slug = String::from_utf8_lossy(&output.stdout).trim().to_string();
    slug.split_once('/')
        .map(|(o, r)| (o.to_string(), r.to_string()))
        .ok_or_else(|| anyhow::anyhow!("unexpected nameWithOwner: {slug}"))
}

fn linear_repo_config(
    args: &AddRepoArgs,
    name: String,
    owner: String,
    repo: String,
    path: PathBuf,
) -> anyhow::Result<RepoConfig> {
    let team_id = args
        .linear_team_id
        .clone()
        .context("--linear-team-id is required with --linear")?;
    Ok(RepoConfig {
        name,
        owner,
        repo,
        path,
        provider: Provider::Linear,
        linear_team_id: Some(team_id),
        linear_repo_label: args.linear_repo_label.clone(),
        linear_backlog_state_id: args.linear_backlog_state_id.clone(),
        linear_ready_state_id: args.linear_ready_state_id.clone(),
        linear_in_progress_state_id: args.linear_in_progress_state_id.clone(),
        linear_in_review_state_id: args.linear_in_review_state_id.clone(),
        ..Default::default()
    })
}

async fn github_repo_config(
    args: &AddRepoArgs,
    name: String,
    owner: String,
    repo: String,
    path: PathBuf,
) -> anyhow::Result<RepoConfig> {
    let listing = gh_json(&["project", "list", "--owner", &owner, "--format", "json"]).await?;
    let projects = parse_projects(&listing);
    let project = select_project(&projects, args.project_number, &owner)?;

    let fields = gh_json(&[
        "project",
        "field-list",
        &project.number.to_string(),
        "--owner",
        &owner,
        "--format",
        "json",
    ])
    .await?;
    let status = parse_status_field(&fields).with_context(|| {
        format!(
            "project #{} has no single-select \"Status\" field",
            project.number
        )
    })?;
    let columns = resolve_columns(status)?;

    Ok(RepoConfig {
        name,
        owner,
        repo,
        path,
        provider: Provider::Github,
        project_id: Some(project.id.clone()),
        project_number: Some(project.number),
        column_field_id: Some(columns.field_id),
        column_option_id: Some(columns.ready.1),
        column_name: Some(columns.ready.0),
        backlog_option_id: Some(columns.backlog.1),
        backlog_column_name: Some(columns.backlog.0),
        in_progress_option_id: Some(columns.in_progress.1),
        in_progress_column_name: Some(columns.in_progress.0),
        in_review_option_id: Some(columns.in_review.1),
        in_review_column_name: Some(columns.in_review.0),
        ..Default::default()
    })
}

async fn gh_json(args: &[&str]) -> anyhow::Result<Value> {
    let output = Command::new("gh").args(args).output_with_context().await?;
    if !output.status.success() {
        bail!(
            "gh {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    serde_json::from_slice(&output.stdout).context("gh returned invalid JSON")
}

#[derive(Debug)]
struct ProjectEntry {
    id: String,
    number: u32,
    title: String,
}

/// `gh project list` wraps the array in `{"projects": [...]}`; older releases
/// emitted the bare array.
fn parse_projects(v: &Value) -> Vec<ProjectEntry> {
    let items = v
        .get("projects")
        .and_then(Value::as_array)
        .or_else(|| v.as_array());
    let Some(items) = items else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|p| {
            Some(ProjectEntry {
                id: p.get("id")?.as_str()?.to_string(),
                number: p.get("number")?.as_u64()? as u32,
                title: p
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
        })
        .collect()
}

fn select_project<'a>(
    projects: &'a [ProjectEntry],
    number: Option<u32>,
    owner: &str,
) -> anyhow::Result<&'a ProjectEntry> {
    match number {
        Some(n) => projects
            .iter()
            .find(|p| p.number == n)
            .with_context(|| format!("no project #{n} for owner {owner}")),
        None => match projects {
            [] => bail!("owner {owner} has no GitHub Projects v2 boards"),
            [only] => Ok(only),
            several => {
                let listing: Vec<String> = several
                    .iter()
                    .map(|p| format!("#{} {}", p.number, p.title))
                    .collect();
                bail!(
                    "owner {owner} has {} project boards - pass --project-number:\n  {}",
                    several.len(),
                    listing.join("\n  ")
                );
            }
        },
    }
}

#[derive(Debug)]
struct StatusField {
    field_id: String,
    /// `(name, option id)` in board order.
    options: Vec<(String, String)>,
}

fn parse_status_field(v: &Value) -> Option<StatusField> {
    let fields = v
        .get("fields")
        .and_then(Value::as_array)
        .or_else(|| v.as_array())?;
    fields.iter().find_map(|field| {
        let name = field.get("name")?.as_str()?;
        let ty = field.get("type")?.as_str()?;
        if name != "Status" || ty != "ProjectV2SingleSelectField" {
            return None;
        }
        let options = field
            .get("options")
            .and_then(Value::as_array)
            .map(|opts| {
                opts.iter()
                    .filter_map(|o| {
                        Some((
                            o.get("name")?.as_str()?.to_string(),
                            o.get("id")?.as_str()?.to_string(),
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(StatusField {
            field_id: field.get("id")?.as_str()?.to_string(),
            options,
        })
    })
}

#[derive(Debug)]
struct Columns {
    field_id: String,
    backlog: (String, String),
    ready: (String, String),
    in_progress: (String, String),
    in_review: (String, String),
}

fn option_named(options: &[(String, String)], wanted: &str) -> Option<(String, String)> {
    options
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
        .cloned()
}

fn resolve_columns(status: StatusField) -> anyhow::Result<Columns> {
    let backlog = option_named(&status.options, "Backlog");
    let ready = option_named(&status.options, "Ready");
    let in_progress = option_named(&status.options, "In Progress");
    let in_review = option_named(&status.options, "In Review");
    let (Some(backlog), Some(ready), Some(in_progress), Some(in_review)) =
        (backlog, ready, in_progress, in_review)
    else {
        let names: Vec<&str> = status.options.iter().map(|(n, _)| n.as_str()).collect();
        bail!(
            "the Status field needs Backlog, Ready, In Progress and In Review options (found: {})",
            names.join(", ")
        );
    };
    Ok(Columns {
        field_id: status.field_id,
        backlog,
        ready,
        in_progress,
        in_review,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn projects_parse_from_wrapped_and_bare_output() {
        let wrapped = json!({
            "projects": [
                {"id": "PVT_1", "number": 3, "title": "Sprint Board"},
            ],
            "totalCount": 1
        });
        let parsed = parse_projects(&wrapped);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, "PVT_1");
        assert_eq!(parsed[0].number, 3);

        let bare = json!([{"id": "PVT_2", "number": 7, "title": "Other"}]);
        let parsed = parse_projects(&bare);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].number, 7);
    }

    #[test]
    fn single_project_is_selected_without_a_number() {
        let projects = vec![ProjectEntry {
            id: "PVT_1".into(),
            number: 3,
            title: "Sprint Board".into(),
        }];
        assert_eq!(select_project(&projects, None, "acme").unwrap().number, 3);
    }

    #[test]
    fn several_projects_require_an_explicit_number() {
        let projects = vec![
            ProjectEntry {
                id: "PVT_1".into(),
                number: 3,
                title: "Sprint Board".into(),
            },
            ProjectEntry {
                id: "PVT_2".into(),
                number: 9,
                title: "Roadmap".into(),
            },
        ];
        let err = select_project(&projects, None, "acme").unwrap_err();
        assert!(err.to_string().contains("--project-number"));
        assert!(err.to_string().contains("#9 Roadmap"));

        assert_eq!(select_project(&projects, Some(9), "acme").unwrap().id, "PVT_2");
        assert!(select_project(&projects, Some(4), "acme").is_err());
    }

    fn field_list_fixture() -> Value {
        json!({
            "fields": [
                {"id": "PVTF_title", "name": "Title", "type": "ProjectV2Field"},
                {
                    "id": "PVTSSF_status",
                    "name": "Status",
                    "type": "ProjectV2SingleSelectField",
                    "options": [
                        {"id": "opt-1", "name": "Backlog"},
                        {"id": "opt-2", "name": "Ready"},
                        {"id": "opt-3", "name": "In Progress"},
                        {"id": "opt-4", "name": "In Review"},
                        {"id": "opt-5", "name": "Done"},
                    ],
                },
            ],
        })
    }

    #[test]
    fn status_field_found_among_others() {
        let status = parse_status_field(&field_list_fixture()).unwrap();
        assert_eq!(status.field_id, "PVTSSF_status");
        assert_eq!(status.options.len(), 5);
    }

    #[test]
    fn status_field_missing_returns_none() {
        let v = json!({"fields": [{"id": "PVTF_title", "name": "Title", "type": "ProjectV2Field"}]});
        assert!(parse_status_field(&v).is_none());
    }

    #[test]
    fn columns_resolve_case_insensitively() {
        let status = StatusField {
            field_id: "PVTSSF_status".into(),
            options: vec![
                ("backlog".into(), "opt-1".into()),
                ("READY".into(), "opt-2".into()),
                ("In progress".into(), "opt-3".into()),
                ("In Review".into(), "opt-4".into()),
            ],
        };
        let columns = resolve_columns(status).unwrap();
        assert_eq!(columns.ready.1, "opt-2");
        assert_eq!(columns.backlog.1, "opt-1");
        assert_eq!(columns.in_progress.1, "opt-3");
        assert_eq!(columns.in_review.1, "opt-4");
    }

    #[test]
    fn missing_column_lists_what_was_found() {
        let status = StatusField {
            field_id: "PVTSSF_status".into(),
            options: vec![
                ("Todo".into(), "opt-1".into()),
                ("Done".into(), "opt-2".into()),
            ],
        };
        let err = resolve_columns(status).unwrap_err();
        assert!(err.to_string().contains("found: Todo, Done"));
    }
}
