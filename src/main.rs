mod cli;
mod cmd;
mod config;
mod context;
mod daemon;
mod engine;
mod executors;
mod git_ops;
mod home;
mod intake;
mod issue_logs;
mod parser;
mod providers;
mod status;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

#[derive(Parser)]
#[command(
    name = "vibesprint",
    version,
    about = "VibeSprint - poll issue boards, run coding agents, open PRs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the poll loop
    Run {
        /// List ready issues without processing anything
        #[arg(long)]
        dry_run: bool,
        /// Poll interval in seconds
        #[arg(long)]
        interval: Option<u64>,
        /// Echo executor output as it streams
        #[arg(long, short)]
        verbose: bool,
        /// Executor to use (kiro | codex)
        #[arg(long)]
        executor: Option<String>,
    },
    /// Manage configured repos
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Create the workflow labels in every configured repo
    Labels,
    /// List executors and their model catalogs
    Executors,
    /// Run the poll loop as a background daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Print the tail of one issue's log
    Logs {
        /// Repo name from the config
        repo: String,
        /// Issue number
        number: u64,
        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },
    /// Generate shell completions
    Completions {
        /// Shell type
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Register a repository (discovers GitHub board linkage)
    AddRepo(cli::AddRepoArgs),
    /// List configured repos
    List,
    /// Delete a repo by name
    RemoveRepo {
        /// Repo name from the config
        name: String,
    },
    /// Dump the config document
    Show,
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the daemon
    Start {
        /// Poll interval in seconds
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Stop the daemon
    Stop,
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vibesprint=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            dry_run,
            interval,
            verbose,
            executor,
        } => {
            engine::run(engine::RunOptions {
                dry_run,
                interval,
                verbose,
                executor,
            })
            .await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::AddRepo(args) => {
                cli::config_add_repo(args).await?;
            }
            ConfigAction::List => {
                cli::config_list()?;
            }
            ConfigAction::RemoveRepo { name } => {
                cli::config_remove_repo(&name)?;
            }
            ConfigAction::Show => {
                cli::config_show()?;
            }
        },
        Commands::Labels => {
            cli::labels().await?;
        }
        Commands::Executors => {
            cli::executors();
        }
        Commands::Daemon { action } => match action {
            DaemonAction::Start { interval } => {
                daemon::start(interval)?;
            }
            DaemonAction::Stop => {
                daemon::stop()?;
            }
            DaemonAction::Status => {
                daemon::status()?;
            }
        },
        Commands::Logs {
            repo,
            number,
            lines,
        } => {
            cli::logs(&repo, number, lines)?;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "vibesprint", &mut std::io::stdout());
        }
    }

    Ok(())
}
