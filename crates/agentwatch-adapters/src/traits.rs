use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use agentwatch_sessions::AdapterEvent;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while reading an agent's logs
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Failed to read agent log: {0}")]
    Io(#[from] std::io::Error),

    #[error("Agent log root not found: {0}")]
    MissingRoot(PathBuf),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),
}

/// Supported agent log formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    ClaudeCode,
    Codex,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentKind::ClaudeCode => write!(f, "claude-code"),
            AgentKind::Codex => write!(f, "codex"),
        }
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" | "claude-code" | "claudecode" => Ok(AgentKind::ClaudeCode),
            "codex" | "codex-cli" => Ok(AgentKind::Codex),
            _ => Err(format!("Unknown agent type: {}", s)),
        }
    }
}

/// One log file (a "log unit") together with the project it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogUnit {
    pub project: PathBuf,
    pub session_id: String,
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// A project the adapter currently judges active, reduced to its newest log unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub project: PathBuf,
    pub session_id: String,
    pub session_path: Option<PathBuf>,
}

/// A decoded event tagged with the project whose log produced it
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectEvent {
    pub project: PathBuf,
    pub event: AdapterEvent,
}

/// Decoder and liveness oracle for one agent's on-disk session logs
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Stable adapter name, also written as the `agent` of session events
    fn name(&self) -> &str;

    fn kind(&self) -> AgentKind;

    /// How recently a log must have been written for its project to count as active
    fn liveness_window(&self) -> Duration;

    /// Every log unit currently on disk, in discovery order
    fn log_units(&self) -> Vec<LogUnit>;

    /// Working directories of running agent processes. Never fails.
    async fn running_projects(&self) -> Vec<PathBuf>;

    /// Only bytes appended since the previous poll, for units of `project`
    /// modified at or after `since`
    fn poll(&self, project: &Path, since: SystemTime) -> Result<Vec<AdapterEvent>, AdapterError>;

    /// Like `poll`, across every project
    fn poll_all(&self, since: SystemTime) -> Result<Vec<ProjectEvent>, AdapterError>;

    /// Decode one log unit from the beginning, ignoring offsets
    fn parse_conversation(&self, path: &Path) -> Result<Vec<AdapterEvent>, AdapterError>;

    async fn is_cli_running(&self, project: &Path) -> bool {
        self.running_projects()
            .await
            .iter()
            .any(|cwd| same_dir(cwd, project))
    }

    async fn detect_activity(&self, project: &Path) -> bool {
        let window = self.liveness_window();
        if self
            .log_units()
            .iter()
            .any(|u| same_dir(&u.project, project) && is_recent(u.modified, window))
        {
            return true;
        }
        self.is_cli_running(project).await
    }

    fn active_session_path(&self, project: &Path) -> Option<PathBuf> {
        newest_unit(self.log_units(), project).map(|u| u.path)
    }

    fn active_session_id(&self, project: &Path) -> Option<String> {
        newest_unit(self.log_units(), project).map(|u| u.session_id)
    }

    async fn active_sessions(&self) -> Vec<ActiveSession> {
        let window = self.liveness_window();
        let running = self.running_projects().await;

        let mut order: Vec<PathBuf> = Vec::new();
        let mut newest: HashMap<PathBuf, LogUnit> = HashMap::new();
        for unit in self.log_units() {
            match newest.get(&unit.project) {
                Some(current) if current.modified >= unit.modified => {}
                Some(_) => {
                    newest.insert(unit.project.clone(), unit);
                }
                None => {
                    order.push(unit.project.clone());
                    newest.insert(unit.project.clone(), unit);
                }
            }
        }

        order
            .into_iter()
            .filter_map(|project| newest.remove(&project))
            .filter(|u| {
                is_recent(u.modified, window) || running.iter().any(|cwd| same_dir(cwd, &u.project))
            })
            .map(|u| ActiveSession {
                project: u.project,
                session_id: u.session_id,
                session_path: Some(u.path),
            })
            .collect()
    }
}

/// Newest unit for `project`; on equal mtimes the first one found wins.
pub fn newest_unit(units: Vec<LogUnit>, project: &Path) -> Option<LogUnit> {
    units
        .into_iter()
        .filter(|u| same_dir(&u.project, project))
        .fold(None, |best: Option<LogUnit>, unit| match best {
            Some(b) if b.modified >= unit.modified => Some(b),
            _ => Some(unit),
        })
}

pub fn is_recent(modified: SystemTime, window: Duration) -> bool {
    match SystemTime::now().duration_since(modified) {
        Ok(age) => age <= window,
        // Written "in the future" (clock skew): treat as just now.
        Err(_) => true,
    }
}

/// Compare directories, tolerating trailing separators and symlinked roots.
pub fn same_dir(a: &Path, b: &Path) -> bool {
    if a.components().eq(b.components()) {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
