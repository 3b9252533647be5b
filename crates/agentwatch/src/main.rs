mod config;
mod sessions;
mod watch;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;

use agentwatch_adapters::AgentKind;
use agentwatch_logging::{init_tracing, LogFormat, Logger};

use crate::config::WatchConfig;
use crate::sessions::{handle_sessions_command, SessionsAction};

#[derive(Parser, Debug)]
#[command(
    name = "agentwatch",
    about = "Watches coding-agent sessions and records how they went",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: <config dir>/agentwatch/agentwatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for event logs and summaries
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty", global = true)]
    log_format: LogFormatChoice,

    /// Diagnostics level (overridden by RUST_LOG)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch for agent sessions until interrupted
    Watch(WatchArgs),

    /// Show which agents are active in a project
    Status {
        /// Project directory (default: current directory)
        project: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ingest a finished conversation log and summarize it
    Backfill {
        /// Path to the agent's transcript
        log: PathBuf,

        /// Agent that wrote the log (inferred from the path if omitted)
        #[arg(short, long, value_enum)]
        agent: Option<AgentChoice>,

        /// Project the session worked in
        #[arg(short = 'd', long)]
        project: Option<PathBuf>,

        /// Output the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect stored sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },

    /// Delete event logs and summaries older than N days
    Prune {
        /// Age threshold in days (default: retention_days from config, or 30)
        #[arg(long)]
        days: Option<u64>,
    },
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Agent to watch (repeatable; default: every supported agent)
    #[arg(short, long, value_enum)]
    agent: Vec<AgentChoice>,

    /// Only track this project (repeatable)
    #[arg(short, long)]
    project: Vec<PathBuf>,

    /// Time between polls, e.g. "2s"
    #[arg(long, value_parser = parse_duration)]
    interval: Option<Duration>,

    /// How recently a log must change for its project to count as active
    #[arg(long, value_parser = parse_duration)]
    liveness_window: Option<Duration>,

    /// Record file changes in active projects
    #[arg(long)]
    watch_files: bool,

    /// Also write diagnostics to a daily-rolling file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Append every notice as a JSON line to this file
    #[arg(long)]
    notice_log: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AgentChoice {
    Claude,
    Codex,
}

impl From<AgentChoice> for AgentKind {
    fn from(choice: AgentChoice) -> Self {
        match choice {
            AgentChoice::Claude => AgentKind::ClaudeCode,
            AgentChoice::Codex => AgentKind::Codex,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatChoice {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Pretty => LogFormat::Pretty,
            LogFormatChoice::Json => LogFormat::Json,
            LogFormatChoice::Compact => LogFormat::Compact,
        }
    }
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = WatchConfig::load(cli.config.as_deref())?.unwrap_or_default();
    if let Some(dir) = cli.data_dir.clone() {
        config.data_dir = Some(dir);
    }
    if let Command::Watch(args) = &cli.command {
        apply_watch_args(&mut config, args);
    }

    let log_format: LogFormat = cli.log_format.into();
    let _guard = init_tracing(&cli.log_level, log_format, config.log_dir.as_deref())
        .context("Failed to set up the diagnostics log directory")?;

    match cli.command {
        Command::Watch(args) => {
            let store = config.open_store()?;
            let logger = match &args.notice_log {
                Some(path) => Logger::with_file(log_format, path)
                    .with_context(|| format!("Failed to open {}", path.display()))?,
                None => Logger::new(log_format),
            };
            watch::handle_watch(&config, store, logger).await
        }
        Command::Status { project, json } => {
            let project = match project {
                Some(project) => project,
                None => std::env::current_dir().context("Failed to get current directory")?,
            };
            watch::handle_status(&config, &project, json).await
        }
        Command::Backfill {
            log,
            agent,
            project,
            json,
        } => {
            let store = config.open_store()?;
            watch::handle_backfill(&config, store, &log, agent.map(Into::into), project, json)
        }
        Command::Sessions { action } => {
            let store = config.open_store()?;
            handle_sessions_command(action, &store)
        }
        Command::Prune { days } => {
            if let Some(days) = days {
                config.retention_days = Some(days);
            }
            let store = config.open_store()?;
            let report = store.prune(config.retention())?;
            println!(
                "{} {} event logs, {} summaries",
                "Pruned".bright_green(),
                report.events_deleted,
                report.summaries_deleted
            );
            Ok(())
        }
    }
}

/// CLI flags win over the config file.
fn apply_watch_args(config: &mut WatchConfig, args: &WatchArgs) {
    if !args.agent.is_empty() {
        config.agents = Some(
            args.agent
                .iter()
                .map(|a| AgentKind::from(*a).to_string())
                .collect(),
        );
    }
    if !args.project.is_empty() {
        config.projects = Some(args.project.clone());
    }
    if args.interval.is_some() {
        config.poll_interval = args.interval;
    }
    if args.liveness_window.is_some() {
        config.liveness_window = args.liveness_window;
    }
    if args.watch_files {
        config.watch_files = Some(true);
    }
    if args.log_dir.is_some() {
        config.log_dir = args.log_dir.clone();
    }
}
