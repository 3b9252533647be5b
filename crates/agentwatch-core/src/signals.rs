use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use agentwatch_git::{CommitMarker, CommitScanner};
use agentwatch_sessions::{AdapterEvent, InterventionSignal};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::changes::ObservedChange;

const DEFAULT_PAUSE_THRESHOLD: Duration = Duration::from_secs(5 * 60);
const DEFAULT_EDIT_GRACE: Duration = Duration::from_secs(2);

/// Derives `user_intervention` events from git history, file mtimes and
/// gaps in the event stream.
///
/// Every category is best-effort: a missing repository or unreadable file
/// yields no signal rather than an error.
pub struct SignalEnricher {
    scanner: CommitScanner,
    pause_threshold: Duration,
    edit_grace: Duration,
}

impl Default for SignalEnricher {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalEnricher {
    pub fn new() -> Self {
        Self {
            scanner: CommitScanner::new(),
            pause_threshold: DEFAULT_PAUSE_THRESHOLD,
            edit_grace: DEFAULT_EDIT_GRACE,
        }
    }

    pub fn with_commit_window(mut self, window: usize) -> Self {
        self.scanner = CommitScanner::new().with_window(window);
        self
    }

    pub fn with_pause_threshold(mut self, threshold: Duration) -> Self {
        self.pause_threshold = threshold;
        self
    }

    /// Slack allowed between a tool edit and the file's mtime.
    pub fn with_edit_grace(mut self, grace: Duration) -> Self {
        self.edit_grace = grace;
        self
    }

    pub fn enrich(
        &self,
        session_id: &str,
        project: &Path,
        started_at: DateTime<Utc>,
        events: &[AdapterEvent],
        observed: &[ObservedChange],
    ) -> Vec<AdapterEvent> {
        let mut derived = self.commit_signals(session_id, project, started_at);
        derived.extend(self.manual_edit_signals(session_id, project, started_at, events, observed));
        derived.extend(self.pause_signals(session_id, events));
        debug!(session_id, derived = derived.len(), "Enriched session");
        derived
    }

    /// Revert and fixup commits made since the session started.
    pub fn commit_signals(
        &self,
        session_id: &str,
        project: &Path,
        started_at: DateTime<Utc>,
    ) -> Vec<AdapterEvent> {
        let commits = match self.scanner.recent_commits(project) {
            Ok(commits) => commits,
            Err(e) => {
                debug!(project = %project.display(), error = %e, "No commit signals");
                return Vec::new();
            }
        };

        commits
            .into_iter()
            .filter(|commit| commit.time >= started_at)
            .filter_map(|commit| {
                let signal = match CommitMarker::classify(&commit.message)? {
                    CommitMarker::Revert => InterventionSignal::Revert,
                    CommitMarker::Fixup => InterventionSignal::Fixup,
                };
                Some(intervention(session_id, commit.time, signal, commit.message))
            })
            .collect()
    }

    /// Files changed on disk outside the agent's own tool calls.
    pub fn manual_edit_signals(
        &self,
        session_id: &str,
        project: &Path,
        started_at: DateTime<Utc>,
        events: &[AdapterEvent],
        observed: &[ObservedChange],
    ) -> Vec<AdapterEvent> {
        let mut last_edit: HashMap<PathBuf, DateTime<Utc>> = HashMap::new();
        let mut order = Vec::new();
        for event in events {
            if let Some(path) = event.edited_path() {
                let resolved = resolve(project, path);
                let at = event.timestamp();
                match last_edit.get_mut(&resolved) {
                    Some(prev) if *prev >= at => {}
                    Some(prev) => *prev = at,
                    None => {
                        order.push(resolved.clone());
                        last_edit.insert(resolved, at);
                    }
                }
            }
        }

        let grace =
            chrono::Duration::from_std(self.edit_grace).unwrap_or(chrono::Duration::zero());
        let mut signals = Vec::new();
        for path in &order {
            let Some(last) = last_edit.get(path) else {
                continue;
            };
            let Some(modified) = mtime(path) else {
                continue;
            };
            if modified > *last + grace {
                signals.push(intervention(
                    session_id,
                    modified,
                    InterventionSignal::ManualEdit,
                    path.display().to_string(),
                ));
            }
        }

        let mut seen = HashSet::new();
        for change in observed {
            if change.at < started_at || last_edit.contains_key(&change.path) {
                continue;
            }
            if seen.insert(change.path.clone()) {
                signals.push(intervention(
                    session_id,
                    change.at,
                    InterventionSignal::ManualEdit,
                    change.path.display().to_string(),
                ));
            }
        }
        signals
    }

    /// Gaps between consecutive agent events longer than the threshold.
    pub fn pause_signals(&self, session_id: &str, events: &[AdapterEvent]) -> Vec<AdapterEvent> {
        let threshold =
            chrono::Duration::from_std(self.pause_threshold).unwrap_or(chrono::Duration::zero());
        let mut signals = Vec::new();
        let mut previous: Option<DateTime<Utc>> = None;

        for event in events.iter().filter(|e| !e.is_lifecycle()) {
            let at = event.timestamp();
            if let Some(prev) = previous {
                let gap = at - prev;
                if gap > threshold {
                    signals.push(intervention(
                        session_id,
                        at,
                        InterventionSignal::LongPause,
                        format!("gap of {} minutes", gap.num_minutes()),
                    ));
                }
            }
            previous = Some(at);
        }
        signals
    }
}

fn intervention(
    session_id: &str,
    timestamp: DateTime<Utc>,
    signal: InterventionSignal,
    detail: String,
) -> AdapterEvent {
    AdapterEvent::UserIntervention {
        session_id: session_id.to_string(),
        timestamp,
        signal,
        detail: Some(detail),
    }
}

fn resolve(project: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project.join(path)
    }
}

fn mtime(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Utc>::from(modified))
}
