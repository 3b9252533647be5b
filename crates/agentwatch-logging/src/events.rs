use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Console-facing notices emitted while watching projects
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    WatchStarted {
        agents: Vec<String>,
        interval_secs: f64,
        data_dir: PathBuf,
    },
    AgentOnline {
        agent: String,
        project: PathBuf,
    },
    SessionStarted {
        agent: String,
        project: PathBuf,
        session_id: String,
    },
    SessionEnded {
        agent: String,
        project: PathBuf,
        session_id: String,
        outcome: String,
        events: usize,
        interventions: usize,
    },
    AgentOffline {
        agent: String,
        project: PathBuf,
    },
    PollFailed {
        agent: String,
        error: String,
    },
    WatchStopped {
        ticks: u64,
    },
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
    /// `[HH:MM:SS] topic:verb ...`
    Compact,
}

/// Renders watcher notices to stderr, and optionally to a JSON-lines file
pub struct Logger {
    format: LogFormat,
    file_writer: Option<Mutex<File>>,
}

impl Logger {
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            file_writer: None,
        }
    }

    /// Also append every notice, stamped, to `path` as JSON lines.
    pub fn with_file(format: LogFormat, path: &Path) -> std::io::Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            format,
            file_writer: Some(Mutex::new(file)),
        })
    }

    pub fn log(&self, event: &LogEvent) {
        if let Some(file) = &self.file_writer {
            if let (Ok(mut file), Some(line)) = (file.lock(), stamped(event)) {
                let _ = writeln!(file, "{}", line);
            }
        }

        let line = match self.format {
            LogFormat::Json => serde_json::to_string(event).ok(),
            LogFormat::Pretty => Some(Self::render_pretty(event)),
            LogFormat::Compact => Some(Self::render_compact(event)),
        };

        if let Some(line) = line {
            let _ = writeln!(std::io::stderr(), "{}", line);
        }
    }

    fn render_pretty(event: &LogEvent) -> String {
        match event {
            LogEvent::WatchStarted {
                agents,
                interval_secs,
                data_dir,
            } => format!(
                "{} {} {} every {:.1}s {} {}",
                "●".bright_blue(),
                "agentwatch".bold().bright_white(),
                agents.join(", ").bright_cyan(),
                interval_secs,
                "→".dimmed(),
                data_dir.display().to_string().dimmed()
            ),
            LogEvent::AgentOnline { agent, project } => format!(
                "{} {} online in {}",
                "▲".bright_green(),
                agent.bright_cyan(),
                project.display()
            ),
            LogEvent::SessionStarted {
                agent, session_id, ..
            } => format!(
                "  {} {} session {}",
                "▶".bright_cyan(),
                agent,
                short_id(session_id).bold()
            ),
            LogEvent::SessionEnded {
                session_id,
                outcome,
                events,
                interventions,
                ..
            } => {
                let styled = match outcome.as_str() {
                    "success" => outcome.bright_green().to_string(),
                    "failure" => outcome.bright_red().to_string(),
                    "partial" => outcome.bright_yellow().to_string(),
                    _ => outcome.dimmed().to_string(),
                };
                format!(
                    "  {} session {} {} ({} {}, {} {})",
                    "■".bright_blue(),
                    short_id(session_id).bold(),
                    styled,
                    events,
                    if *events == 1 { "event" } else { "events" },
                    interventions,
                    if *interventions == 1 {
                        "intervention"
                    } else {
                        "interventions"
                    }
                )
            }
            LogEvent::AgentOffline { agent, project } => format!(
                "{} {} offline in {}",
                "▼".bright_yellow(),
                agent.bright_cyan(),
                project.display().to_string().dimmed()
            ),
            LogEvent::PollFailed { agent, error } => format!(
                "{} {} poll failed: {}",
                "✗".bright_red(),
                agent,
                error.bright_red()
            ),
            LogEvent::WatchStopped { ticks } => format!(
                "{} stopped after {} {}",
                "●".dimmed(),
                ticks,
                if *ticks == 1 { "tick" } else { "ticks" }
            ),
        }
    }

    fn render_compact(event: &LogEvent) -> String {
        let timestamp = chrono::Utc::now().format("%H:%M:%S");
        match event {
            LogEvent::WatchStarted { agents, .. } => {
                format!("[{}] watch:start {}", timestamp, agents.join(","))
            }
            LogEvent::AgentOnline { agent, project } => {
                format!("[{}] agent:online {} {}", timestamp, agent, project.display())
            }
            LogEvent::SessionStarted {
                agent, session_id, ..
            } => format!("[{}] session:start {} {}", timestamp, agent, session_id),
            LogEvent::SessionEnded {
                session_id,
                outcome,
                events,
                interventions,
                ..
            } => format!(
                "[{}] session:end {} {} events={} interventions={}",
                timestamp, session_id, outcome, events, interventions
            ),
            LogEvent::AgentOffline { agent, project } => {
                format!("[{}] agent:offline {} {}", timestamp, agent, project.display())
            }
            LogEvent::PollFailed { agent, error } => {
                format!("[{}] poll:error {} {}", timestamp, agent, error)
            }
            LogEvent::WatchStopped { ticks } => format!("[{}] watch:stop ticks={}", timestamp, ticks),
        }
    }
}

/// The notice as JSON with an `at` field holding the current time.
fn stamped(event: &LogEvent) -> Option<serde_json::Value> {
    let mut value = serde_json::to_value(event).ok()?;
    value
        .as_object_mut()?
        .insert("at".into(), chrono::Utc::now().to_rfc3339().into());
    Some(value)
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}
