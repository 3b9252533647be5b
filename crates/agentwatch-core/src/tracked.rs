use std::path::PathBuf;

use agentwatch_sessions::AdapterEvent;
use chrono::{DateTime, Utc};

use crate::changes::ObservedChange;

/// `(adapter name, project path)`: at most one tracked session per key.
pub type SessionKey = (String, PathBuf);

/// In-memory state for a session the watcher currently considers active
#[derive(Debug, Clone)]
pub struct TrackedSession {
    pub agent: String,
    pub session_id: String,
    pub session_path: Option<PathBuf>,
    pub project_path: PathBuf,
    pub start_time: DateTime<Utc>,
    pub event_count: usize,
    /// Paths edited through agent tool calls, first-seen order
    pub files: Vec<String>,
    pub active: bool,
    pub prompt: Option<String>,
    /// Earliest source timestamp among routed events
    pub first_event_at: Option<DateTime<Utc>>,
    /// Set once `session_end` has been written for this session
    pub end_appended: bool,
    /// Filesystem changes seen while the session was active
    pub observed: Vec<ObservedChange>,
}

impl TrackedSession {
    pub fn new(
        agent: impl Into<String>,
        session_id: impl Into<String>,
        project_path: PathBuf,
        session_path: Option<PathBuf>,
    ) -> Self {
        Self {
            agent: agent.into(),
            session_id: session_id.into(),
            session_path,
            project_path,
            start_time: Utc::now(),
            event_count: 0,
            files: Vec::new(),
            active: true,
            prompt: None,
            first_event_at: None,
            end_appended: false,
            observed: Vec::new(),
        }
    }

    pub fn key(&self) -> SessionKey {
        (self.agent.clone(), self.project_path.clone())
    }

    /// Fold one of this session's events into the running totals.
    pub fn record(&mut self, event: &AdapterEvent) {
        if let AdapterEvent::SessionStart {
            prompt: Some(prompt),
            ..
        } = event
        {
            if self.prompt.is_none() {
                self.prompt = Some(prompt.clone());
            }
            return;
        }
        if event.is_lifecycle() {
            return;
        }

        self.event_count += 1;
        let at = event.timestamp();
        if self.first_event_at.map_or(true, |first| at < first) {
            self.first_event_at = Some(at);
        }
        if let Some(path) = event.edited_path() {
            if !self.files.iter().any(|f| f == path) {
                self.files.push(path.to_string());
            }
        }
    }

    pub fn observe(&mut self, changes: Vec<ObservedChange>) {
        self.observed.extend(changes);
    }

    /// Earliest of the watcher's own start time and any routed event.
    pub fn started_at(&self) -> DateTime<Utc> {
        match self.first_event_at {
            Some(first) if first < self.start_time => first,
            _ => self.start_time,
        }
    }
}
