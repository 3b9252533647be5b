use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;

use agentwatch_adapters::{slug, AdapterRegistry, AgentKind};
use agentwatch_core::{LiveWatcher, WatchNotice};
use agentwatch_logging::{LogEvent, Logger};
use agentwatch_sessions::EventStore;

use crate::config::WatchConfig;
use crate::sessions::format_duration;

/// Run the live watcher until Ctrl+C, logging every notice.
pub async fn handle_watch(config: &WatchConfig, store: EventStore, logger: Logger) -> Result<()> {
    let registry = AdapterRegistry::from_kinds(&config.agent_kinds()?, &config.adapter_settings());
    if registry.is_empty() {
        anyhow::bail!("No agents enabled");
    }

    let watcher_config = config.watcher_config();
    let data_dir = store.root().to_path_buf();
    let logger = Arc::new(logger);
    logger.log(&LogEvent::WatchStarted {
        agents: registry.names(),
        interval_secs: watcher_config.poll_interval.as_secs_f64(),
        data_dir,
    });

    let mut watcher = LiveWatcher::new(registry, store, watcher_config);

    // Handle Ctrl+C gracefully
    let stop_handle = watcher.stop_handle();
    ctrlc::set_handler(move || {
        eprintln!("\nStopping. Sealing open sessions...");
        stop_handle.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let mut notices = watcher.subscribe();
    let printer = {
        let logger = logger.clone();
        tokio::spawn(async move {
            loop {
                match notices.recv().await {
                    Ok(notice) => logger.log(&log_event(&notice)),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Dropped watcher notices");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    let result = watcher.run().await;
    let ticks = watcher.ticks();
    // Closes the notice channel so the printer drains and exits
    drop(watcher);
    let _ = printer.await;

    result?;
    logger.log(&LogEvent::WatchStopped { ticks });
    Ok(())
}

fn log_event(notice: &WatchNotice) -> LogEvent {
    match notice {
        WatchNotice::AgentOnline { agent, project } => LogEvent::AgentOnline {
            agent: agent.clone(),
            project: project.clone(),
        },
        WatchNotice::SessionStart {
            agent,
            project,
            session_id,
        } => LogEvent::SessionStarted {
            agent: agent.clone(),
            project: project.clone(),
            session_id: session_id.clone(),
        },
        WatchNotice::SessionEnd {
            agent,
            project,
            session_id,
            summary,
            events,
        } => LogEvent::SessionEnded {
            agent: agent.clone(),
            project: project.clone(),
            session_id: session_id.clone(),
            outcome: summary.outcome.to_string(),
            events: *events,
            interventions: summary.interventions,
        },
        WatchNotice::AgentOffline { agent, project } => LogEvent::AgentOffline {
            agent: agent.clone(),
            project: project.clone(),
        },
        WatchNotice::PollFailed { agent, error } => LogEvent::PollFailed {
            agent: agent.clone(),
            error: error.clone(),
        },
    }
}

/// Report which agents look active in a project right now.
pub async fn handle_status(config: &WatchConfig, project: &Path, json: bool) -> Result<()> {
    let registry = AdapterRegistry::from_kinds(&config.agent_kinds()?, &config.adapter_settings());
    let project = project
        .canonicalize()
        .unwrap_or_else(|_| project.to_path_buf());
    let active = registry.active_for(&project).await;

    let mut rows = Vec::new();
    for adapter in registry.adapters() {
        rows.push(serde_json::json!({
            "agent": adapter.name(),
            "active": active.iter().any(|a| a.name() == adapter.name()),
            "cli_running": adapter.is_cli_running(&project).await,
            "session_id": adapter.active_session_id(&project),
            "session_path": adapter.active_session_path(&project),
        }));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{}  {}", "Project:".dimmed(), project.display());
    for row in &rows {
        let agent = row["agent"].as_str().unwrap_or_default();
        let state = if row["active"].as_bool().unwrap_or(false) {
            "active".bright_green().to_string()
        } else {
            "idle".dimmed().to_string()
        };
        let running = if row["cli_running"].as_bool().unwrap_or(false) {
            " (cli running)".bright_cyan().to_string()
        } else {
            String::new()
        };
        let session = row["session_id"]
            .as_str()
            .map(|id| format!("  session {}", id))
            .unwrap_or_default();
        println!("  {:<12} {}{}{}", agent, state, running, session);
    }
    Ok(())
}

/// Ingest one finished conversation log and print its summary.
pub fn handle_backfill(
    config: &WatchConfig,
    store: EventStore,
    log: &Path,
    agent: Option<AgentKind>,
    project: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let agent = agent.unwrap_or_else(|| infer_agent(log));
    let project = match project.or_else(|| infer_project(agent, log)) {
        Some(project) => project,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let registry = AdapterRegistry::from_kinds(&[agent], &config.adapter_settings());
    let watcher = LiveWatcher::new(registry, store, config.watcher_config());
    let summary = watcher
        .backfill(&agent.to_string(), log, &project)
        .with_context(|| format!("Failed to backfill {}", log.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        eprintln!(
            "{} {} ({}, {}, {} interventions, {})",
            "Backfilled".bright_green(),
            summary.id,
            summary.agent,
            summary.outcome,
            summary.interventions,
            format_duration(summary.duration_secs())
        );
    }
    Ok(())
}

/// Codex rollouts are `rollout-*.jsonl` under a `.codex` tree; anything
/// else is taken as a Claude Code transcript.
fn infer_agent(log: &Path) -> AgentKind {
    let is_rollout = log
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("rollout-"));
    let in_codex = log.components().any(|c| c.as_os_str() == ".codex");
    if is_rollout || in_codex {
        AgentKind::Codex
    } else {
        AgentKind::ClaudeCode
    }
}

/// Claude Code keeps transcripts in a directory named after the flattened
/// project path.
fn infer_project(agent: AgentKind, log: &Path) -> Option<PathBuf> {
    if agent != AgentKind::ClaudeCode {
        return None;
    }
    let dir = log.parent()?.file_name()?.to_str()?;
    let project = slug::unflatten(dir);
    project.is_dir().then_some(project)
}
