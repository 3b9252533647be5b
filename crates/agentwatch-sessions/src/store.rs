use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::parser::{parse_event_log, read_summary};
use crate::types::{
    AdapterEvent, Outcome, ProjectStats, SessionSummary, SummaryFilter, SummaryStats,
};

/// Files removed by a retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub events_deleted: usize,
    pub summaries_deleted: usize,
}

/// Append-only event logs plus one summary snapshot per session.
///
/// Layout under the root directory:
/// - `events/<session>.jsonl`, one JSON event per line
/// - `summaries/<session>.json`, rewritten on every seal or re-analysis
pub struct EventStore {
    root: PathBuf,
}

impl EventStore {
    /// Create a store in the default data directory.
    pub fn new() -> Result<Self> {
        let data_dir = dirs::data_dir().with_context(|| "Could not determine data directory")?;
        Ok(Self {
            root: data_dir.join("agentwatch"),
        })
    }

    /// Create a store rooted at a custom directory (useful for testing).
    pub fn with_dir(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn events_dir(&self) -> PathBuf {
        self.root.join("events")
    }

    pub fn summaries_dir(&self) -> PathBuf {
        self.root.join("summaries")
    }

    pub fn event_log_path(&self, session_id: &str) -> PathBuf {
        self.events_dir()
            .join(format!("{}.jsonl", file_stem_for(session_id)))
    }

    pub fn summary_path(&self, session_id: &str) -> PathBuf {
        self.summaries_dir()
            .join(format!("{}.json", file_stem_for(session_id)))
    }

    /// Append one event to its session's log.
    ///
    /// The line (payload plus newline) goes out in a single `write_all` on a
    /// file opened in append mode, so concurrent writers interleave whole
    /// lines.
    pub fn append_event(&self, event: &AdapterEvent) -> Result<()> {
        let dir = self.events_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create events dir: {:?}", dir))?;

        let mut line = serde_json::to_string(event).context("Failed to serialize event")?;
        line.push('\n');

        let path = self.event_log_path(event.session_id());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open event log: {:?}", path))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to append to event log: {:?}", path))?;

        Ok(())
    }

    pub fn append_events(&self, events: &[AdapterEvent]) -> Result<()> {
        for event in events {
            self.append_event(event)?;
        }
        Ok(())
    }

    /// All events recorded for a session, in append order.
    pub fn read_events(&self, session_id: &str) -> Result<Vec<AdapterEvent>> {
        parse_event_log(&self.event_log_path(session_id))
    }

    /// Write (or overwrite) a session's summary snapshot.
    pub fn save_summary(&self, summary: &SessionSummary) -> Result<()> {
        let dir = self.summaries_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create summaries dir: {:?}", dir))?;

        let path = self.summary_path(&summary.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;

        std::fs::write(&tmp, json).with_context(|| format!("Failed to write {:?}", tmp))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move summary into place: {:?}", path))?;

        Ok(())
    }

    pub fn load_summary(&self, session_id: &str) -> Option<SessionSummary> {
        read_summary(&self.summary_path(session_id))
    }

    /// Flag a summary as reviewed by the analysis side.
    pub fn mark_analyzed(
        &self,
        session_id: &str,
        reviewed_event_count: usize,
    ) -> Result<Option<SessionSummary>> {
        let Some(mut summary) = self.load_summary(session_id) else {
            return Ok(None);
        };
        summary.analyzed = true;
        summary.reviewed_event_count = Some(reviewed_event_count);
        self.save_summary(&summary)?;
        Ok(Some(summary))
    }

    /// List summaries matching the filter, newest first.
    pub fn list_summaries(&self, filter: &SummaryFilter) -> Result<Vec<SessionSummary>> {
        let dir = self.summaries_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let entries =
            std::fs::read_dir(&dir).with_context(|| format!("Failed to read {:?}", dir))?;

        let mut summaries: Vec<SessionSummary> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
            .filter_map(|p| read_summary(&p))
            .filter(|s| matches_filter(s, filter))
            .collect();

        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(summaries)
    }

    /// Compute aggregate statistics over summaries matching the filter.
    pub fn stats(&self, filter: &SummaryFilter) -> Result<SummaryStats> {
        let summaries = self.list_summaries(filter)?;
        let total_sessions = summaries.len();

        let count = |o: Outcome| summaries.iter().filter(|s| s.outcome == o).count();
        let success = count(Outcome::Success);

        let (success_rate, avg_duration_secs) = if total_sessions == 0 {
            (0.0, 0.0)
        } else {
            let total = total_sessions as f64;
            let durations: f64 = summaries.iter().map(|s| s.duration_secs()).sum();
            (success as f64 / total, durations / total)
        };

        let mut project_map: std::collections::HashMap<String, (usize, usize)> =
            std::collections::HashMap::new();
        for s in &summaries {
            let entry = project_map.entry(s.project_name()).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += s.interventions;
        }
        let mut by_project: Vec<ProjectStats> = project_map
            .into_iter()
            .map(|(project, (total, interventions))| ProjectStats {
                project,
                total,
                interventions,
            })
            .collect();
        by_project.sort_by(|a, b| b.total.cmp(&a.total).then(a.project.cmp(&b.project)));

        Ok(SummaryStats {
            total_sessions,
            success,
            failure: count(Outcome::Failure),
            partial: count(Outcome::Partial),
            unknown: count(Outcome::Unknown),
            success_rate,
            total_interventions: summaries.iter().map(|s| s.interventions).sum(),
            avg_duration_secs,
            by_project,
        })
    }

    /// Delete event logs and summaries whose mtime is at least `max_age` old.
    pub fn prune(&self, max_age: Duration) -> Result<PruneReport> {
        let now = SystemTime::now();
        Ok(PruneReport {
            events_deleted: prune_dir(&self.events_dir(), "jsonl", max_age, now)?,
            summaries_deleted: prune_dir(&self.summaries_dir(), "json", max_age, now)?,
        })
    }
}

fn prune_dir(dir: &Path, extension: &str, max_age: Duration, now: SystemTime) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let entries = std::fs::read_dir(dir).with_context(|| format!("Failed to read {:?}", dir))?;
    let mut deleted = 0;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some(extension) {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        // An mtime in the future counts as age zero.
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age < max_age {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => deleted += 1,
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to prune file"),
        }
    }

    Ok(deleted)
}

fn matches_filter(summary: &SessionSummary, filter: &SummaryFilter) -> bool {
    if let Some(ref agent) = filter.agent {
        if &summary.agent != agent {
            return false;
        }
    }

    if let Some(outcome) = filter.outcome {
        if summary.outcome != outcome {
            return false;
        }
    }

    if let Some(after) = filter.after {
        if summary.started_at < after {
            return false;
        }
    }

    if let Some(before) = filter.before {
        if summary.started_at > before {
            return false;
        }
    }

    if let Some(ref project) = filter.project {
        if summary.project_name() != *project {
            return false;
        }
    }

    true
}

/// Session ids come from foreign log formats; keep them to one path segment.
fn file_stem_for(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect()
}
