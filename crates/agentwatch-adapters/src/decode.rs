//! JSON helpers shared by the log decoders.

use chrono::{DateTime, Utc};
use serde_json::Value;

use agentwatch_sessions::AdapterEvent;

use crate::test_results;

/// `timestamp` field of a log record, or now when absent or unparseable.
pub fn record_timestamp(record: &Value) -> DateTime<Utc> {
    record
        .get("timestamp")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

pub fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str())
}

/// Lines in a replacement or inserted text block.
pub fn count_lines(text: &str) -> usize {
    if text.is_empty() {
        0
    } else {
        text.lines().count()
    }
}

/// Flatten a content value that may be a string or a list of `{type: text}` blocks.
pub fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Interrupted turns show up as this marker text in the user's next message.
pub fn is_interrupt_marker(text: &str) -> bool {
    text.trim_start().starts_with("[Request interrupted by user")
}

/// A `command_run` plus, when the output looks like a test run, a `test_result`.
pub fn command_events(
    session_id: &str,
    timestamp: DateTime<Utc>,
    command: String,
    exit_code: i32,
    stdout: Option<String>,
    stderr: Option<String>,
) -> Vec<AdapterEvent> {
    let combined = match (&stdout, &stderr) {
        (Some(out), Some(err)) if !err.is_empty() => format!("{}\n{}", out, err),
        (Some(out), _) => out.clone(),
        (None, Some(err)) => err.clone(),
        (None, None) => String::new(),
    };

    let mut events = vec![AdapterEvent::CommandRun {
        session_id: session_id.to_string(),
        timestamp,
        command,
        exit_code,
        stdout: stdout.filter(|s| !s.is_empty()),
        stderr: stderr.filter(|s| !s.is_empty()),
    }];

    if let Some(summary) = test_results::classify(&combined) {
        events.push(AdapterEvent::TestResult {
            session_id: session_id.to_string(),
            timestamp,
            framework: summary.framework.to_string(),
            passed: summary.passed,
            failed: summary.failed,
            skipped: summary.skipped,
            raw: Some(combined),
        });
    }

    events
}
