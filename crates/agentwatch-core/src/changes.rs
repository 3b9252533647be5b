use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, trace};

use crate::error::WatchError;
use crate::ignore_rules::IgnoreMatcher;

/// A file that changed on disk while a project was being watched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedChange {
    pub path: PathBuf,
    pub at: DateTime<Utc>,
}

type ChangeLog = Arc<Mutex<Vec<ObservedChange>>>;

/// Records non-ignored file changes under one project directory.
///
/// Changes accumulate until [`ChangeWatcher::drain`] hands them over.
pub struct ChangeWatcher {
    root: PathBuf,
    changes: ChangeLog,
    _watcher: RecommendedWatcher,
}

impl ChangeWatcher {
    pub fn start(root: &Path) -> Result<Self, WatchError> {
        let matcher = IgnoreMatcher::for_project(root);
        let changes: ChangeLog = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                record(&matcher, &sink, &event);
            }
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        debug!(root = %root.display(), "Watching project for file changes");
        Ok(Self {
            root: root.to_path_buf(),
            changes,
            _watcher: watcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Take every change recorded since the last drain.
    pub fn drain(&self) -> Vec<ObservedChange> {
        let mut changes = self
            .changes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *changes)
    }
}

fn record(matcher: &IgnoreMatcher, sink: &ChangeLog, event: &Event) {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return;
    }

    let at = Utc::now();
    let mut changes = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    for path in &event.paths {
        if path.is_dir() || matcher.is_ignored(path, false) {
            continue;
        }
        trace!(path = %path.display(), "File changed");
        changes.push(ObservedChange {
            path: path.clone(),
            at,
        });
    }
}
