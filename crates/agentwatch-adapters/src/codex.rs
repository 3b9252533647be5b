use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
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

use crate::decode::{command_events, content_text, record_timestamp, str_field};
use crate::process::ProcessProbe;
use crate::tail::{collect_jsonl_files, decode_file, poll_units, LineDecoder, Tailer};
use crate::traits::{same_dir, Adapter, AdapterError, AgentKind, LogUnit, ProjectEvent};

static RE_EXITED_WITH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:exited with code|exit code:?) (-?\d+)").unwrap());

const SHELL_TOOLS: [&str; 4] = ["shell", "container.exec", "exec_command", "local_shell"];

/// Session id and working directory from a rollout's `session_meta` record
#[derive(Debug, Clone)]
struct RolloutMeta {
    session_id: String,
    cwd: PathBuf,
}

/// Codex CLI: `~/.codex/sessions/YYYY/MM/DD/rollout-*.jsonl`
pub struct CodexAdapter {
    root: PathBuf,
    liveness_window: Duration,
    probe: ProcessProbe,
    tailer: Tailer<CodexDecoder>,
    metas: Mutex<HashMap<PathBuf, RolloutMeta>>,
}

impl CodexAdapter {
    pub fn new() -> Self {
        let root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".codex")
            .join("sessions");
        Self::with_root(root)
    }

    /// Read rollouts from a custom directory (useful for testing).
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            root,
            liveness_window: Duration::from_secs(5 * 60),
            probe: ProcessProbe::new("codex"),
            tailer: Tailer::new(),
            metas: Mutex::new(HashMap::new()),
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

    /// Cached `session_meta` for a rollout. A rollout whose first line is not
    /// written yet is skipped and retried on the next call.
    fn meta_for(&self, path: &Path) -> Option<RolloutMeta> {
        let mut metas = self
            .metas
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(meta) = metas.get(path) {
            return Some(meta.clone());
        }
        let meta = read_session_meta(path)?;
        metas.insert(path.to_path_buf(), meta.clone());
        Some(meta)
    }
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for CodexAdapter {
    fn name(&self) -> &str {
        "codex"
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Codex
    }

    fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    fn log_units(&self) -> Vec<LogUnit> {
        collect_jsonl_files(&self.root)
            .into_iter()
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("rollout-"))
            })
            .filter_map(|path| {
                let modified = std::fs::metadata(&path).ok()?.modified().ok()?;
                let meta = self.meta_for(&path)?;
                Some(LogUnit {
                    project: meta.cwd,
                    session_id: meta.session_id,
                    path,
                    modified,
                })
            })
            .collect()
    }

    async fn running_projects(&self) -> Vec<PathBuf> {
        self.probe.running_cwds().await
    }

    fn poll(&self, project: &Path, since: SystemTime) -> Result<Vec<AdapterEvent>, AdapterError> {
        let units: Vec<LogUnit> = self
            .log_units()
            .into_iter()
            .filter(|u| same_dir(&u.project, project))
            .collect();
        Ok(poll_units(&self.tailer, units, since)
            .into_iter()
            .map(|pe| pe.event)
            .collect())
    }

    fn poll_all(&self, since: SystemTime) -> Result<Vec<ProjectEvent>, AdapterError> {
        if !self.root.exists() {
            debug!(root = %self.root.display(), "No Codex session root");
            return Ok(Vec::new());
        }
        Ok(poll_units(&self.tailer, self.log_units(), since))
    }

    fn parse_conversation(&self, path: &Path) -> Result<Vec<AdapterEvent>, AdapterError> {
        let fallback = fallback_session_id(path);
        Ok(decode_file::<CodexDecoder>(path, &fallback)?)
    }
}

fn read_session_meta(path: &Path) -> Option<RolloutMeta> {
    let file = File::open(path).ok()?;
    let mut line = String::new();
    BufReader::new(file).read_line(&mut line).ok()?;
    let record: Value = serde_json::from_str(line.trim_end()).ok()?;
    if str_field(&record, "type") != Some("session_meta") {
        return None;
    }
    let payload = record.get("payload")?;
    Some(RolloutMeta {
        session_id: str_field(payload, "id")
            .map(str::to_string)
            .unwrap_or_else(|| fallback_session_id(path)),
        cwd: PathBuf::from(str_field(payload, "cwd")?),
    })
}

/// `rollout-2026-02-01T10-00-00-<uuid>.jsonl` ends in the session uuid.
fn fallback_session_id(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown");
    match stem.char_indices().rev().nth(35) {
        Some((idx, _)) if stem.len() > 36 => stem[idx..].to_string(),
        _ => stem.to_string(),
    }
}

struct PendingCall {
    name: String,
    arguments: Value,
    timestamp: DateTime<Utc>,
}

/// Decodes Codex rollout records (`session_meta`, `event_msg`, `response_item`).
pub struct CodexDecoder {
    session_id: String,
    prompted: bool,
    pending: HashMap<String, PendingCall>,
}

impl LineDecoder for CodexDecoder {
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
        let Some(payload) = record.get("payload") else {
            return Vec::new();
        };
        let timestamp = record_timestamp(&record);

        match str_field(&record, "type") {
            Some("session_meta") => {
                if let Some(id) = str_field(payload, "id") {
                    self.session_id = id.to_string();
                }
                Vec::new()
            }
            Some("event_msg") => self.decode_event_msg(payload, timestamp),
            Some("response_item") => self.decode_response_item(payload, timestamp),
            _ => Vec::new(),
        }
    }

    fn finish(&mut self) -> Vec<AdapterEvent> {
        let mut pending: Vec<(String, PendingCall)> = self.pending.drain().collect();
        pending.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then(a.0.cmp(&b.0)));

        pending
            .into_iter()
            .filter_map(|(_, call)| {
                let patch = patch_text(&call.name, &call.arguments)?;
                Some(patch_events(&self.session_id, call.timestamp, &patch))
            })
            .flatten()
            .collect()
    }
}

impl CodexDecoder {
    fn decode_event_msg(&mut self, payload: &Value, timestamp: DateTime<Utc>) -> Vec<AdapterEvent> {
        match str_field(payload, "type") {
            Some("user_message") => {
                let message = str_field(payload, "message").unwrap_or("").trim();
                if self.prompted || message.is_empty() {
                    return Vec::new();
                }
                self.prompted = true;
                vec![AdapterEvent::SessionStart {
                    session_id: self.session_id.clone(),
                    agent: AgentKind::Codex.to_string(),
                    timestamp,
                    prompt: Some(message.to_string()),
                }]
            }
            Some("turn_aborted") => vec![AdapterEvent::UserIntervention {
                session_id: self.session_id.clone(),
                timestamp,
                signal: InterventionSignal::Abort,
                detail: str_field(payload, "reason").map(str::to_string),
            }],
            _ => Vec::new(),
        }
    }

    fn decode_response_item(
        &mut self,
        payload: &Value,
        timestamp: DateTime<Utc>,
    ) -> Vec<AdapterEvent> {
        match str_field(payload, "type") {
            Some("function_call") | Some("custom_tool_call") | Some("local_shell_call") => {
                let Some(call_id) = str_field(payload, "call_id") else {
                    return Vec::new();
                };
                let name = str_field(payload, "name").unwrap_or("local_shell").to_string();
                let arguments = call_arguments(payload);
                self.pending.insert(
                    call_id.to_string(),
                    PendingCall {
                        name,
                        arguments,
                        timestamp,
                    },
                );
                Vec::new()
            }
            Some("function_call_output") | Some("custom_tool_call_output") => {
                let Some(call) = str_field(payload, "call_id").and_then(|id| self.pending.remove(id))
                else {
                    return Vec::new();
                };
                self.resolve(call, payload.get("output"), timestamp)
            }
            _ => Vec::new(),
        }
    }

    fn resolve(
        &self,
        call: PendingCall,
        output: Option<&Value>,
        timestamp: DateTime<Utc>,
    ) -> Vec<AdapterEvent> {
        let (text, exit_code) = output.map(decode_output).unwrap_or((String::new(), None));

        if let Some(patch) = patch_text(&call.name, &call.arguments) {
            if exit_code.unwrap_or(0) != 0 {
                return Vec::new();
            }
            return patch_events(&self.session_id, timestamp, &patch);
        }

        if SHELL_TOOLS.contains(&call.name.as_str()) {
            let Some(command) = command_string(&call.arguments) else {
                return Vec::new();
            };
            let exit_code = exit_code
                .or_else(|| {
                    RE_EXITED_WITH
                        .captures(&text)
                        .and_then(|c| c.get(1))
                        .and_then(|m| m.as_str().parse().ok())
                })
                .unwrap_or(0);
            return command_events(&self.session_id, timestamp, command, exit_code, Some(text), None);
        }

        Vec::new()
    }
}

/// Arguments arrive as a JSON string (`function_call`), raw text
/// (`custom_tool_call`) or an `action` object (`local_shell_call`).
fn call_arguments(payload: &Value) -> Value {
    if let Some(args) = str_field(payload, "arguments") {
        return serde_json::from_str(args).unwrap_or_else(|_| Value::String(args.to_string()));
    }
    if let Some(input) = payload.get("input") {
        return input.clone();
    }
    payload.get("action").cloned().unwrap_or(Value::Null)
}

/// Output text plus the exit code when the output carries one.
fn decode_output(output: &Value) -> (String, Option<i32>) {
    let raw = match output {
        Value::String(s) => s.clone(),
        other => content_text(other),
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(obj)) => {
            let text = obj
                .get("output")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let exit_code = obj
                .get("metadata")
                .and_then(|m| m.get("exit_code"))
                .and_then(|c| c.as_i64())
                .map(|c| c as i32);
            (text, exit_code)
        }
        _ => (raw, None),
    }
}

fn command_string(arguments: &Value) -> Option<String> {
    let command = arguments.get("command").or_else(|| arguments.get("cmd"))?;
    match command {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let parts: Vec<&str> = parts.iter().filter_map(|p| p.as_str()).collect();
            // `bash -lc "<script>"` is reported as the script itself.
            match parts.as_slice() {
                [shell, flag, script] if shell.ends_with("sh") && flag.starts_with('-') => {
                    Some(script.to_string())
                }
                _ => Some(parts.join(" ")),
            }
        }
        _ => None,
    }
}

/// Patch body for an `apply_patch` call, however it was invoked.
fn patch_text(name: &str, arguments: &Value) -> Option<String> {
    if name == "apply_patch" {
        return match arguments {
            Value::String(s) => Some(s.clone()),
            other => str_field(other, "input")
                .or_else(|| str_field(other, "patch"))
                .map(str::to_string),
        };
    }
    if SHELL_TOOLS.contains(&name) {
        let parts = arguments.get("command")?.as_array()?;
        if parts.first().and_then(|p| p.as_str()) == Some("apply_patch") {
            return parts.get(1).and_then(|p| p.as_str()).map(str::to_string);
        }
    }
    None
}

/// One `file_edit` per file section of an apply_patch envelope.
fn patch_events(session_id: &str, timestamp: DateTime<Utc>, patch: &str) -> Vec<AdapterEvent> {
    let mut files: Vec<(String, usize, usize)> = Vec::new();

    for line in patch.lines() {
        if let Some(path) = line
            .strip_prefix("*** Update File: ")
            .or_else(|| line.strip_prefix("*** Add File: "))
            .or_else(|| line.strip_prefix("*** Delete File: "))
        {
            files.push((path.trim().to_string(), 0, 0));
            continue;
        }
        if let Some(dest) = line.strip_prefix("*** Move to: ") {
            if let Some(current) = files.last_mut() {
                current.0 = dest.trim().to_string();
            }
            continue;
        }
        if line.starts_with("***") {
            continue;
        }
        let Some(current) = files.last_mut() else {
            continue;
        };
        if line.starts_with('+') {
            current.1 += 1;
        } else if line.starts_with('-') {
            current.2 += 1;
        }
    }

    files
        .into_iter()
        .map(|(path, lines_added, lines_removed)| AdapterEvent::FileEdit {
            session_id: session_id.to_string(),
            timestamp,
            path,
            lines_added,
            lines_removed,
            tool: Some("apply_patch".to_string()),
        })
        .collect()
}
