use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use agentwatch_sessions::AdapterEvent;

use crate::traits::{LogUnit, ProjectEvent};

/// Line-at-a-time decoder for one log unit. State survives between polls so a
/// tool call and its result may arrive in different reads.
pub trait LineDecoder: Send {
    /// `fallback_id` is the session id guessed from the file name.
    fn new(fallback_id: &str) -> Self
    where
        Self: Sized;

    fn decode_line(&mut self, line: &str) -> Vec<AdapterEvent>;

    /// Emit whatever is still pending at end of file.
    fn finish(&mut self) -> Vec<AdapterEvent>;
}

struct Cursor<D> {
    offset: u64,
    decoder: D,
}

/// Per-file read offsets plus decoder state, owned by one adapter instance.
pub struct Tailer<D> {
    cursors: Mutex<HashMap<PathBuf, Cursor<D>>>,
}

impl<D: LineDecoder> Default for Tailer<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: LineDecoder> Tailer<D> {
    pub fn new() -> Self {
        Self {
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Decode only complete lines appended since the last call for `path`.
    ///
    /// A trailing partial line is left for the next call. A file that shrank
    /// (truncated or replaced) is read again from the start.
    pub fn read_new(&self, path: &Path, fallback_id: &str) -> std::io::Result<Vec<AdapterEvent>> {
        let mut cursors = self
            .cursors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let cursor = cursors.entry(path.to_path_buf()).or_insert_with(|| Cursor {
            offset: 0,
            decoder: D::new(fallback_id),
        });

        let len = std::fs::metadata(path)?.len();
        if len < cursor.offset {
            tracing::debug!(path = %path.display(), "Log shrank, rereading from start");
            cursor.offset = 0;
            cursor.decoder = D::new(fallback_id);
        }
        if len == cursor.offset {
            return Ok(Vec::new());
        }

        let chunk = read_from(path, cursor.offset)?;
        let Some(last_newline) = chunk.iter().rposition(|b| *b == b'\n') else {
            return Ok(Vec::new());
        };
        let complete = &chunk[..=last_newline];
        cursor.offset += complete.len() as u64;

        let mut events = Vec::new();
        for line in String::from_utf8_lossy(complete).lines() {
            if line.trim().is_empty() {
                continue;
            }
            events.extend(cursor.decoder.decode_line(line));
        }
        Ok(events)
    }

    /// Bytes consumed so far for `path`.
    pub fn offset(&self, path: &Path) -> u64 {
        self.cursors
            .lock()
            .map(|c| c.get(path).map(|c| c.offset).unwrap_or(0))
            .unwrap_or(0)
    }
}

/// Read new content from every unit modified at or after `since`.
///
/// A unit that vanished or cannot be read is skipped with a warning.
pub fn poll_units<D: LineDecoder>(
    tailer: &Tailer<D>,
    units: Vec<LogUnit>,
    since: SystemTime,
) -> Vec<ProjectEvent> {
    let mut out = Vec::new();
    for unit in units.into_iter().filter(|u| u.modified >= since) {
        match tailer.read_new(&unit.path, &unit.session_id) {
            Ok(events) => out.extend(events.into_iter().map(|event| ProjectEvent {
                project: unit.project.clone(),
                event,
            })),
            Err(e) => {
                tracing::warn!(path = %unit.path.display(), error = %e, "Failed to read log unit")
            }
        }
    }
    out
}

/// Decode a whole file with a fresh decoder, flushing pending state at the end.
pub fn decode_file<D: LineDecoder>(path: &Path, fallback_id: &str) -> std::io::Result<Vec<AdapterEvent>> {
    let content = std::fs::read(path)?;
    let mut decoder = D::new(fallback_id);
    let mut events = Vec::new();
    for line in String::from_utf8_lossy(&content).lines() {
        if line.trim().is_empty() {
            continue;
        }
        events.extend(decoder.decode_line(line));
    }
    events.extend(decoder.finish());
    Ok(events)
}

fn read_from(path: &Path, offset: u64) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Recursively collect `*.jsonl` files under `root`.
pub fn collect_jsonl_files(root: &Path) -> Vec<PathBuf> {
    let mut result = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };

        let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        paths.sort();
        for path in paths {
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                result.push(path);
            }
        }
    }

    result
}
