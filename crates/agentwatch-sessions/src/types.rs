use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of human intervention inferred for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionSignal {
    ManualEdit,
    Revert,
    Fixup,
    LongPause,
    Abort,
}

impl std::fmt::Display for InterventionSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterventionSignal::ManualEdit => write!(f, "manual_edit"),
            InterventionSignal::Revert => write!(f, "revert"),
            InterventionSignal::Fixup => write!(f, "fixup"),
            InterventionSignal::LongPause => write!(f, "long_pause"),
            InterventionSignal::Abort => write!(f, "abort"),
        }
    }
}

/// One line of a session's event log. Every agent format decodes into these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdapterEvent {
    SessionStart {
        session_id: String,
        agent: String,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
    },
    SessionEnd {
        session_id: String,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
    FileEdit {
        session_id: String,
        timestamp: DateTime<Utc>,
        path: String,
        lines_added: usize,
        lines_removed: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
    },
    CommandRun {
        session_id: String,
        timestamp: DateTime<Utc>,
        command: String,
        exit_code: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stdout: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr: Option<String>,
    },
    TestResult {
        session_id: String,
        timestamp: DateTime<Utc>,
        framework: String,
        passed: u32,
        failed: u32,
        skipped: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },
    UserIntervention {
        session_id: String,
        timestamp: DateTime<Utc>,
        signal: InterventionSignal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl AdapterEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionStart { session_id, .. }
            | Self::SessionEnd { session_id, .. }
            | Self::FileEdit { session_id, .. }
            | Self::CommandRun { session_id, .. }
            | Self::TestResult { session_id, .. }
            | Self::UserIntervention { session_id, .. } => session_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::SessionStart { timestamp, .. }
            | Self::SessionEnd { timestamp, .. }
            | Self::FileEdit { timestamp, .. }
            | Self::CommandRun { timestamp, .. }
            | Self::TestResult { timestamp, .. }
            | Self::UserIntervention { timestamp, .. } => *timestamp,
        }
    }

    /// The `type` tag this event serializes with.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionStart { .. } => "session_start",
            Self::SessionEnd { .. } => "session_end",
            Self::FileEdit { .. } => "file_edit",
            Self::CommandRun { .. } => "command_run",
            Self::TestResult { .. } => "test_result",
            Self::UserIntervention { .. } => "user_intervention",
        }
    }

    /// session_start / session_end are owned by the watcher, not by adapters.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::SessionStart { .. } | Self::SessionEnd { .. })
    }

    pub fn edited_path(&self) -> Option<&str> {
        match self {
            Self::FileEdit { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// How a session ended, judged from its test results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Partial,
    #[default]
    Unknown,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure => write!(f, "failure"),
            Outcome::Partial => write!(f, "partial"),
            Outcome::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(Outcome::Success),
            "failure" | "failed" => Ok(Outcome::Failure),
            "partial" => Ok(Outcome::Partial),
            "unknown" => Ok(Outcome::Unknown),
            _ => Err(format!("Unknown outcome: {}", s)),
        }
    }
}

/// Sealed record of one session, handed to the analysis side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub agent: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_cwd: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: Outcome,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub interventions: usize,
    #[serde(default)]
    pub analyzed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_event_count: Option<usize>,
}

impl SessionSummary {
    pub fn duration_secs(&self) -> f64 {
        (self.ended_at - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }

    /// Project directory name, or "unknown" when the cwd was never learned.
    pub fn project_name(&self) -> String {
        self.project_cwd
            .as_ref()
            .and_then(|p| p.file_name())
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string()
    }
}

/// Filter parameters for listing summaries.
#[derive(Debug, Default)]
pub struct SummaryFilter {
    pub agent: Option<String>,
    pub outcome: Option<Outcome>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub project: Option<String>,
}

/// Aggregate statistics over sealed sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryStats {
    pub total_sessions: usize,
    pub success: usize,
    pub failure: usize,
    pub partial: usize,
    pub unknown: usize,
    pub success_rate: f64,
    pub total_interventions: usize,
    pub avg_duration_secs: f64,
    pub by_project: Vec<ProjectStats>,
}

/// Per-project statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectStats {
    pub project: String,
    pub total: usize,
    pub interventions: usize,
}
