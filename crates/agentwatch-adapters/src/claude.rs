use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use agentwatch_sessions::{AdapterEvent, InterventionSignal};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::decode::{
    command_events, content_text, count_lines, is_interrupt_marker, record_timestamp, str_field,
};
use crate::process::ProcessProbe;
use crate::slug;
use crate::tail::{decode_file, poll_units, LineDecoder, Tailer};
use crate::traits::{same_dir, Adapter, AdapterError, AgentKind, LogUnit, ProjectEvent};

static RE_EXIT_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)exit code:? (\d+)").unwrap());

const EDIT_TOOLS: [&str; 4] = ["Edit", "MultiEdit", "Write", "NotebookEdit"];

/// Claude Code: `~/.claude/projects/<flattened project path>/<session-uuid>.jsonl`
pub struct ClaudeCodeAdapter {
    root: PathBuf,
    liveness_window: Duration,
    probe: ProcessProbe,
    tailer: Tailer<ClaudeDecoder>,
    /// Flattened directory name -> decoded project path
    projects: Mutex<HashMap<String, PathBuf>>,
}

impl ClaudeCodeAdapter {
    pub fn new() -> Self {
        let root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".claude")
            .join("projects");
        Self::with_root(root)
    }

    /// Read logs from a custom directory (useful for testing).
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            root,
            liveness_window: Duration::from_secs(5 * 60),
            probe: ProcessProbe::new("claude"),
            tailer: Tailer::new(),
            projects: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe = self.probe.with_timeout(timeout);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Log directory that would hold sessions for `project`.
    pub fn log_dir_for(&self, project: &Path) -> PathBuf {
        self.root.join(slug::flatten(project))
    }

    fn project_for(&self, dir_name: &str) -> PathBuf {
        let mut cache = self
            .projects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        cache
            .entry(dir_name.to_string())
            .or_insert_with(|| slug::unflatten(dir_name))
            .clone()
    }

    fn units_for(&self, project: &Path) -> Vec<LogUnit> {
        // Fast path: the directory named after the project itself.
        let dir = self.log_dir_for(project);
        if dir.is_dir() {
            return session_files(&dir)
                .into_iter()
                .map(|(path, session_id, modified)| LogUnit {
                    project: project.to_path_buf(),
                    session_id,
                    path,
                    modified,
                })
                .collect();
        }
        self.log_units()
            .into_iter()
            .filter(|u| same_dir(&u.project, project))
            .collect()
    }
}

impl Default for ClaudeCodeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for ClaudeCodeAdapter {
    fn name(&self) -> &str {
        "claude-code"
    }

    fn kind(&self) -> AgentKind {
        AgentKind::ClaudeCode
    }

    fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    fn log_units(&self) -> Vec<LogUnit> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };

        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        let mut units = Vec::new();
        for dir in dirs {
            let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let project = self.project_for(name);
            for (path, session_id, modified) in session_files(&dir) {
                units.push(LogUnit {
                    project: project.clone(),
                    session_id,
                    path,
                    modified,
                });
            }
        }
        units
    }

    async fn running_projects(&self) -> Vec<PathBuf> {
        self.probe.running_cwds().await
    }

    fn poll(&self, project: &Path, since: SystemTime) -> Result<Vec<AdapterEvent>, AdapterError> {
        let units = self.units_for(project);
        Ok(poll_units(&self.tailer, units, since)
            .into_iter()
            .map(|pe| pe.event)
            .collect())
    }

    fn poll_all(&self, since: SystemTime) -> Result<Vec<ProjectEvent>, AdapterError> {
        if !self.root.exists() {
            debug!(root = %self.root.display(), "No Claude Code log root");
            return Ok(Vec::new());
        }
        Ok(poll_units(&self.tailer, self.log_units(), since))
    }

    fn parse_conversation(&self, path: &Path) -> Result<Vec<AdapterEvent>, AdapterError> {
        let session_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        Ok(decode_file::<ClaudeDecoder>(path, &session_id)?)
    }
}

/// Top-level `*.jsonl` files of one project directory: (path, session id, mtime).
/// Sub-agent transcripts (`agent-*.jsonl`) belong to their parent session and are skipped.
fn session_files(dir: &Path) -> Vec<(PathBuf, String, SystemTime)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<(PathBuf, String, SystemTime)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                return None;
            }
            let stem = path.file_stem()?.to_str()?.to_string();
            if stem.starts_with("agent-") {
                return None;
            }
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((path, stem, modified))
        })
        .collect();
    files.sort_by(|a, b| a.0.cmp(&b.0));
    files
}

struct PendingTool {
    name: String,
    input: Value,
    timestamp: DateTime<Utc>,
}

/// Decodes Claude Code transcript records.
///
/// Tool calls are announced in assistant records (`tool_use`) and resolved in
/// the following user record (`tool_result`, with a `toolUseResult` sidecar).
pub struct ClaudeDecoder {
    session_id: String,
    prompted: bool,
    pending: HashMap<String, PendingTool>,
}

impl LineDecoder for ClaudeDecoder {
    fn new(fallback_id: &str) -> Self {
        Self {
            session_id: fallback_id.to_string(),
            prompted: false,
            pending: HashMap::new(),
        }
    }

    fn decode_line(&mut self, line: &str) -> Vec<AdapterEvent> {
        let Ok(record) = serde_json::from_str::<Value>(line) else {
            return Vec::new();
        };
        let timestamp = record_timestamp(&record);

        match str_field(&record, "type") {
            Some("assistant") => {
                self.collect_tool_uses(&record, timestamp);
                Vec::new()
            }
            Some("user") => self.decode_user(&record, timestamp),
            _ => Vec::new(),
        }
    }

    fn finish(&mut self) -> Vec<AdapterEvent> {
        let mut pending: Vec<(String, PendingTool)> = self.pending.drain().collect();
        pending.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then(a.0.cmp(&b.0)));

        pending
            .into_iter()
            .filter(|(_, tool)| EDIT_TOOLS.contains(&tool.name.as_str()))
            .filter_map(|(_, tool)| self.edit_event(&tool, None))
            .collect()
    }
}

impl ClaudeDecoder {
    fn collect_tool_uses(&mut self, record: &Value, timestamp: DateTime<Utc>) {
        let Some(items) = record
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_array())
        else {
            return;
        };

        for item in items {
            if str_field(item, "type") != Some("tool_use") {
                continue;
            }
            let (Some(id), Some(name)) = (str_field(item, "id"), str_field(item, "name")) else {
                continue;
            };
            self.pending.insert(
                id.to_string(),
                PendingTool {
                    name: name.to_string(),
                    input: item.get("input").cloned().unwrap_or(Value::Null),
                    timestamp,
                },
            );
        }
    }

    fn decode_user(&mut self, record: &Value, timestamp: DateTime<Utc>) -> Vec<AdapterEvent> {
        let Some(content) = record.get("message").and_then(|m| m.get("content")) else {
            return Vec::new();
        };
        let is_meta = record
            .get("isMeta")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let mut events = Vec::new();
        match content {
            Value::String(text) => {
                if !is_meta {
                    events.extend(self.user_text(text, timestamp));
                }
            }
            Value::Array(items) => {
                for item in items {
                    match str_field(item, "type") {
                        Some("text") if !is_meta => {
                            if let Some(text) = str_field(item, "text") {
                                events.extend(self.user_text(text, timestamp));
                            }
                        }
                        Some("tool_result") => {
                            events.extend(self.tool_result(item, record.get("toolUseResult"), timestamp));
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        events
    }

    fn user_text(&mut self, text: &str, timestamp: DateTime<Utc>) -> Vec<AdapterEvent> {
        if is_interrupt_marker(text) {
            return vec![AdapterEvent::UserIntervention {
                session_id: self.session_id.clone(),
                timestamp,
                signal: InterventionSignal::Abort,
                detail: Some(text.trim().to_string()),
            }];
        }

        // Slash-command wrappers and caveats are not the task prompt.
        let trimmed = text.trim();
        if self.prompted || trimmed.is_empty() || trimmed.starts_with('<') {
            return Vec::new();
        }
        self.prompted = true;
        vec![AdapterEvent::SessionStart {
            session_id: self.session_id.clone(),
            agent: AgentKind::ClaudeCode.to_string(),
            timestamp,
            prompt: Some(trimmed.to_string()),
        }]
    }

    fn tool_result(
        &mut self,
        item: &Value,
        sidecar: Option<&Value>,
        timestamp: DateTime<Utc>,
    ) -> Vec<AdapterEvent> {
        let Some(tool) = str_field(item, "tool_use_id").and_then(|id| self.pending.remove(id)) else {
            return Vec::new();
        };
        let is_error = item
            .get("is_error")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if EDIT_TOOLS.contains(&tool.name.as_str()) {
            if is_error {
                return Vec::new();
            }
            return self
                .edit_event(&tool, sidecar)
                .map(|mut event| {
                    if let AdapterEvent::FileEdit { timestamp: ts, .. } = &mut event {
                        *ts = timestamp;
                    }
                    vec![event]
                })
                .unwrap_or_default();
        }

        if tool.name == "Bash" {
            let command = str_field(&tool.input, "command").unwrap_or("").to_string();
            let text = item.get("content").map(content_text).unwrap_or_default();
            let stdout = sidecar
                .and_then(|s| str_field(s, "stdout"))
                .map(str::to_string)
                .or_else(|| Some(text.clone()));
            let stderr = sidecar.and_then(|s| str_field(s, "stderr")).map(str::to_string);
            let exit_code = if is_error {
                RE_EXIT_CODE
                    .captures(&text)
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(1)
            } else {
                0
            };
            return command_events(&self.session_id, timestamp, command, exit_code, stdout, stderr);
        }

        Vec::new()
    }

    /// Line deltas come from the structured patch when the result carries one,
    /// else from the sizes of the texts in the tool input.
    fn edit_event(&self, tool: &PendingTool, sidecar: Option<&Value>) -> Option<AdapterEvent> {
        let input = &tool.input;
        let path = str_field(input, "file_path")
            .or_else(|| str_field(input, "notebook_path"))?
            .to_string();

        let (lines_added, lines_removed) = sidecar
            .and_then(structured_patch_counts)
            .unwrap_or_else(|| input_counts(&tool.name, input));

        Some(AdapterEvent::FileEdit {
            session_id: self.session_id.clone(),
            timestamp: tool.timestamp,
            path,
            lines_added,
            lines_removed,
            tool: Some(tool.name.clone()),
        })
    }
}

fn structured_patch_counts(sidecar: &Value) -> Option<(usize, usize)> {
    let hunks = sidecar.get("structuredPatch")?.as_array()?;
    if hunks.is_empty() {
        return None;
    }
    let mut added = 0;
    let mut removed = 0;
    for line in hunks
        .iter()
        .filter_map(|h| h.get("lines").and_then(|l| l.as_array()))
        .flatten()
        .filter_map(|l| l.as_str())
    {
        if line.starts_with('+') {
            added += 1;
        } else if line.starts_with('-') {
            removed += 1;
        }
    }
    Some((added, removed))
}

fn input_counts(tool: &str, input: &Value) -> (usize, usize) {
    let lines = |key: &str, v: &Value| str_field(v, key).map(count_lines).unwrap_or(0);
    match tool {
        "Edit" => (lines("new_string", input), lines("old_string", input)),
        "MultiEdit" => input
            .get("edits")
            .and_then(|e| e.as_array())
            .map(|edits| {
                edits.iter().fold((0, 0), |(a, r), e| {
                    (a + lines("new_string", e), r + lines("old_string", e))
                })
            })
            .unwrap_or((0, 0)),
        "Write" => (lines("content", input), 0),
        "NotebookEdit" => (lines("new_source", input), 0),
        _ => (0, 0),
    }
}
