use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};

use crate::types::{AdapterEvent, SessionSummary};

/// Decode one event-log line. Blank or malformed lines yield `None`.
pub fn parse_event_line(line: &str) -> Option<AdapterEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<AdapterEvent>(line) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(
                error = %e,
                line = clip(line, 100),
                "Skipping malformed event line"
            );
            None
        }
    }
}

/// At most `max` bytes of `line`, cut back to a char boundary.
fn clip(line: &str, max: usize) -> &str {
    if line.len() <= max {
        return line;
    }
    let mut end = max;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

/// Read every event from a session log in append order.
///
/// A missing file is an empty log. Lines that fail to decode (for instance a
/// torn final line from a concurrent writer) are skipped.
pub fn parse_event_log(path: &Path) -> Result<Vec<AdapterEvent>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to open event log: {:?}", path))
        }
    };

    let reader = BufReader::new(file);
    let mut events = Vec::new();

    for line in reader.split(b'\n') {
        let line = line.with_context(|| "Failed to read line from event log")?;
        // Invalid UTF-8 fails to decode below and is skipped like any torn line.
        if let Some(event) = parse_event_line(&String::from_utf8_lossy(&line)) {
            events.push(event);
        }
    }

    Ok(events)
}

/// Load a summary snapshot. Missing or corrupt files mean "no prior summary".
pub fn read_summary(path: &Path) -> Option<SessionSummary> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(summary) => Some(summary),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt summary file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_line_skips_garbage() {
        assert!(parse_event_line("").is_none());
        assert!(parse_event_line("{not json").is_none());
        assert!(parse_event_line(r#"{"type":"mystery","session_id":"x"}"#).is_none());
    }

    #[test]
    fn test_parse_event_line_file_edit() {
        let line = r#"{"type":"file_edit","session_id":"abc","timestamp":"2026-02-01T10:00:00Z","path":"src/main.rs","lines_added":3,"lines_removed":1,"tool":"Edit"}"#;
        match parse_event_line(line) {
            Some(AdapterEvent::FileEdit {
                path,
                lines_added,
                lines_removed,
                tool,
                ..
            }) => {
                assert_eq!(path, "src/main.rs");
                assert_eq!(lines_added, 3);
                assert_eq!(lines_removed, 1);
                assert_eq!(tool.as_deref(), Some("Edit"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_clip_respects_char_boundaries() {
        let line = format!("{}é tail", "x".repeat(99));
        assert_eq!(clip(&line, 100), "x".repeat(99));
        assert_eq!(clip("short", 100), "short");
    }

    #[test]
    fn test_torn_multibyte_line_skipped_with_debug_logging() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("s1.jsonl");
        let good = r#"{"type":"session_end","session_id":"s1","timestamp":"2026-02-01T10:00:00Z"}"#;
        let mut bytes = format!("{{\"type\":\"{}é", "x".repeat(90)).into_bytes();
        bytes.push(b'\n');
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        bytes.extend_from_slice(good.as_bytes());
        bytes.push(b'\n');
        std::fs::write(&path, bytes).unwrap();

        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        let events = tracing::subscriber::with_default(subscriber, || parse_event_log(&path)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "session_end");
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let events = parse_event_log(&dir.path().join("nope.jsonl")).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_corrupt_summary_is_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, "{ truncated").unwrap();
        assert!(read_summary(&path).is_none());
        assert!(read_summary(&dir.path().join("missing.json")).is_none());
    }
}
