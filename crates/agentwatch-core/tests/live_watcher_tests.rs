use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use agentwatch_adapters::{
    ActiveSession, Adapter, AdapterError, AdapterRegistry, AgentKind, LogUnit, ProjectEvent,
};
use agentwatch_core::{LiveWatcher, WatchError, WatchNotice, WatcherConfig};
use agentwatch_sessions::{AdapterEvent, EventStore, Outcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

/// Adapter whose activity and events are scripted by the test.
struct FakeAdapter {
    name: &'static str,
    active: Mutex<Vec<ActiveSession>>,
    queued: Mutex<Vec<ProjectEvent>>,
    conversation: Vec<AdapterEvent>,
    failing: AtomicBool,
}

impl FakeAdapter {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            active: Mutex::new(Vec::new()),
            queued: Mutex::new(Vec::new()),
            conversation: Vec::new(),
            failing: AtomicBool::new(false),
        })
    }

    fn with_conversation(name: &'static str, conversation: Vec<AdapterEvent>) -> Arc<Self> {
        Arc::new(Self {
            name,
            active: Mutex::new(Vec::new()),
            queued: Mutex::new(Vec::new()),
            conversation,
            failing: AtomicBool::new(false),
        })
    }

    fn set_active(&self, sessions: &[(&Path, &str)]) {
        *self.active.lock().unwrap() = sessions
            .iter()
            .map(|(project, id)| ActiveSession {
                project: project.to_path_buf(),
                session_id: id.to_string(),
                session_path: None,
            })
            .collect();
    }

    fn queue(&self, project: &Path, event: AdapterEvent) {
        self.queued.lock().unwrap().push(ProjectEvent {
            project: project.to_path_buf(),
            event,
        });
    }
}

#[async_trait]
impl Adapter for FakeAdapter {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Codex
    }

    fn liveness_window(&self) -> Duration {
        Duration::from_secs(300)
    }

    fn log_units(&self) -> Vec<LogUnit> {
        Vec::new()
    }

    async fn running_projects(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    async fn active_sessions(&self) -> Vec<ActiveSession> {
        self.active.lock().unwrap().clone()
    }

    fn poll(&self, _: &Path, _: SystemTime) -> Result<Vec<AdapterEvent>, AdapterError> {
        Ok(Vec::new())
    }

    fn poll_all(&self, _: SystemTime) -> Result<Vec<ProjectEvent>, AdapterError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AdapterError::MissingRoot(PathBuf::from("/nowhere")));
        }
        Ok(std::mem::take(&mut *self.queued.lock().unwrap()))
    }

    fn parse_conversation(&self, _: &Path) -> Result<Vec<AdapterEvent>, AdapterError> {
        Ok(self.conversation.clone())
    }
}

fn edit(session_id: &str, path: &str, at: DateTime<Utc>) -> AdapterEvent {
    AdapterEvent::FileEdit {
        session_id: session_id.into(),
        timestamp: at,
        path: path.into(),
        lines_added: 3,
        lines_removed: 1,
        tool: Some("Edit".into()),
    }
}

fn tests_run(session_id: &str, passed: u32, failed: u32, at: DateTime<Utc>) -> AdapterEvent {
    AdapterEvent::TestResult {
        session_id: session_id.into(),
        timestamp: at,
        framework: "cargo".into(),
        passed,
        failed,
        skipped: 0,
        raw: None,
    }
}

fn count_kind(events: &[AdapterEvent], kind: &str) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}

struct Fixture {
    _dir: TempDir,
    project: PathBuf,
    data: PathBuf,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let project = dir.path().join("project");
    std::fs::create_dir_all(&project).unwrap();
    let data = dir.path().join("data");
    Fixture {
        _dir: dir,
        project,
        data,
    }
}

fn watcher(fx: &Fixture, adapters: Vec<Arc<dyn Adapter>>) -> LiveWatcher {
    let config = WatcherConfig {
        poll_interval: Duration::from_millis(10),
        ..WatcherConfig::default()
    };
    LiveWatcher::new(
        AdapterRegistry::new(adapters),
        EventStore::with_dir(fx.data.clone()),
        config,
    )
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<WatchNotice>) -> Vec<WatchNotice> {
    let mut notices = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        notices.push(notice);
    }
    notices
}

// ============================================================
// Lifecycle transitions
// ============================================================

#[tokio::test]
async fn test_liveness_loss_seals_exactly_once() {
    let fx = fixture();
    let adapter = FakeAdapter::new("fake");
    let mut watcher = watcher(&fx, vec![adapter.clone()]);

    adapter.set_active(&[(&fx.project, "s1")]);
    adapter.queue(&fx.project, edit("s1", "src/lib.rs", Utc::now()));
    adapter.queue(&fx.project, tests_run("s1", 4, 0, Utc::now()));
    watcher.tick().await;

    let tracked = watcher.session_for("fake", &fx.project).unwrap();
    assert_eq!(tracked.session_id, "s1");
    assert_eq!(tracked.event_count, 2);
    assert_eq!(tracked.files, vec!["src/lib.rs"]);

    adapter.set_active(&[]);
    watcher.tick().await;
    watcher.tick().await;

    assert!(watcher.session_for("fake", &fx.project).is_none());
    let events = watcher.store().read_events("s1").unwrap();
    assert_eq!(count_kind(&events, "session_start"), 1);
    assert_eq!(count_kind(&events, "session_end"), 1);

    let summary = watcher.store().load_summary("s1").unwrap();
    assert!(summary.ended_at >= summary.started_at);
    assert_eq!(summary.outcome, Outcome::Success);
    assert_eq!(summary.files_changed, vec!["src/lib.rs"]);
    assert_eq!(summary.project_cwd.as_deref(), Some(fx.project.as_path()));
    assert_eq!(watcher.ticks(), 3);
}

#[tokio::test]
async fn test_notices_follow_transitions() {
    let fx = fixture();
    let adapter = FakeAdapter::new("fake");
    let mut watcher = watcher(&fx, vec![adapter.clone()]);
    let mut rx = watcher.subscribe();

    adapter.set_active(&[(&fx.project, "s1")]);
    watcher.tick().await;
    adapter.set_active(&[]);
    watcher.tick().await;

    let notices = drain(&mut rx);
    assert_eq!(notices.len(), 4);
    assert!(matches!(&notices[0], WatchNotice::AgentOnline { agent, .. } if agent == "fake"));
    assert!(matches!(&notices[1], WatchNotice::SessionStart { session_id, .. } if session_id == "s1"));
    match &notices[2] {
        WatchNotice::SessionEnd { summary, .. } => assert_eq!(summary.id, "s1"),
        other => panic!("expected session end, got {:?}", other),
    }
    assert!(matches!(&notices[3], WatchNotice::AgentOffline { .. }));
}

#[tokio::test]
async fn test_session_id_change_reseals_within_one_tick() {
    let fx = fixture();
    let adapter = FakeAdapter::new("fake");
    let mut watcher = watcher(&fx, vec![adapter.clone()]);
    let mut rx = watcher.subscribe();

    adapter.set_active(&[(&fx.project, "s1")]);
    watcher.tick().await;

    adapter.set_active(&[(&fx.project, "s2")]);
    adapter.queue(&fx.project, edit("s1", "a.rs", Utc::now()));
    adapter.queue(&fx.project, edit("s2", "b.rs", Utc::now()));
    watcher.tick().await;

    let old = watcher.store().load_summary("s1").unwrap();
    assert_eq!(old.files_changed, vec!["a.rs"]);
    let current = watcher.session_for("fake", &fx.project).unwrap();
    assert_eq!(current.session_id, "s2");
    assert_eq!(current.files, vec!["b.rs"]);

    let kinds: Vec<&str> = drain(&mut rx)
        .iter()
        .map(|n| match n {
            WatchNotice::AgentOnline { .. } => "online",
            WatchNotice::SessionStart { .. } => "start",
            WatchNotice::SessionEnd { .. } => "end",
            WatchNotice::AgentOffline { .. } => "offline",
            WatchNotice::PollFailed { .. } => "failed",
        })
        .collect();
    assert_eq!(kinds, vec!["online", "start", "end", "online", "start"]);
}

#[tokio::test]
async fn test_orphan_event_creates_session() {
    let fx = fixture();
    let adapter = FakeAdapter::new("fake");
    let mut watcher = watcher(&fx, vec![adapter.clone()]);

    adapter.queue(&fx.project, edit("orphan", "x.rs", Utc::now()));
    watcher.tick().await;

    let tracked = watcher.session_for("fake", &fx.project).unwrap();
    assert_eq!(tracked.session_id, "orphan");
    assert_eq!(tracked.event_count, 1);
    let events = watcher.store().read_events("orphan").unwrap();
    assert_eq!(events[0].kind(), "session_start");
    assert_eq!(events[1].kind(), "file_edit");

    // Never reported active, so the next tick seals it.
    watcher.tick().await;
    assert!(watcher.store().load_summary("orphan").is_some());
}

#[tokio::test]
async fn test_prompt_comes_from_agent_session_start() {
    let fx = fixture();
    let adapter = FakeAdapter::new("fake");
    let mut watcher = watcher(&fx, vec![adapter.clone()]);

    adapter.set_active(&[(&fx.project, "s1")]);
    adapter.queue(
        &fx.project,
        AdapterEvent::SessionStart {
            session_id: "s1".into(),
            agent: "fake".into(),
            timestamp: Utc::now(),
            prompt: Some("fix the flaky test".into()),
        },
    );
    watcher.tick().await;
    adapter.set_active(&[]);
    watcher.tick().await;

    let summary = watcher.store().load_summary("s1").unwrap();
    assert_eq!(summary.prompt, "fix the flaky test");
    let events = watcher.store().read_events("s1").unwrap();
    assert_eq!(count_kind(&events, "session_start"), 1);
}

#[tokio::test]
async fn test_mixed_results_and_long_pause_reach_summary() {
    let fx = fixture();
    let adapter = FakeAdapter::new("fake");
    let mut watcher = watcher(&fx, vec![adapter.clone()]);

    let t0 = Utc::now() - chrono::Duration::minutes(30);
    adapter.set_active(&[(&fx.project, "s1")]);
    adapter.queue(&fx.project, tests_run("s1", 1, 5, t0));
    adapter.queue(&fx.project, tests_run("s1", 5, 1, t0 + chrono::Duration::minutes(20)));
    watcher.tick().await;
    adapter.set_active(&[]);
    watcher.tick().await;

    let summary = watcher.store().load_summary("s1").unwrap();
    assert_eq!(summary.outcome, Outcome::Partial);
    assert_eq!(summary.interventions, 1);
    assert_eq!(summary.started_at, t0);

    let events = watcher.store().read_events("s1").unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        AdapterEvent::UserIntervention { detail: Some(d), .. } if d == "gap of 20 minutes"
    )));
}

// ============================================================
// Isolation and shutdown
// ============================================================

#[tokio::test]
async fn test_store_failure_keeps_events_for_next_tick() {
    let fx = fixture();
    let adapter = FakeAdapter::new("fake");
    let mut watcher = watcher(&fx, vec![adapter.clone()]);
    let mut rx = watcher.subscribe();

    // A plain file where the events directory belongs
    std::fs::create_dir_all(&fx.data).unwrap();
    let events_dir = fx.data.join("events");
    std::fs::write(&events_dir, "").unwrap();

    adapter.set_active(&[(&fx.project, "s1")]);
    adapter.queue(&fx.project, edit("s1", "src/lib.rs", Utc::now()));
    watcher.tick().await;

    assert!(watcher.session_for("fake", &fx.project).is_none());
    assert!(drain(&mut rx)
        .iter()
        .any(|n| matches!(n, WatchNotice::PollFailed { agent, .. } if agent == "fake")));

    // The adapter has nothing new; the held edit must still arrive
    std::fs::remove_file(&events_dir).unwrap();
    watcher.tick().await;

    let tracked = watcher.session_for("fake", &fx.project).unwrap();
    assert_eq!(tracked.event_count, 1);
    assert_eq!(tracked.files, vec!["src/lib.rs"]);
    let kinds: Vec<&str> = watcher
        .store()
        .read_events("s1")
        .unwrap()
        .iter()
        .map(|e| e.kind())
        .collect();
    assert_eq!(kinds, vec!["session_start", "file_edit"]);

    // Nothing is stored twice on later ticks
    watcher.tick().await;
    assert_eq!(watcher.store().read_events("s1").unwrap().len(), 2);
}

#[tokio::test]
async fn test_failing_adapter_does_not_block_others() {
    let fx = fixture();
    let bad = FakeAdapter::new("bad");
    bad.failing.store(true, Ordering::SeqCst);
    bad.set_active(&[(&fx.project, "never")]);
    let good = FakeAdapter::new("good");
    good.set_active(&[(&fx.project, "g1")]);

    let mut watcher = watcher(&fx, vec![bad.clone(), good.clone()]);
    let mut rx = watcher.subscribe();
    watcher.tick().await;

    assert!(watcher.session_for("bad", &fx.project).is_none());
    assert!(drain(&mut rx)
        .iter()
        .any(|n| matches!(n, WatchNotice::PollFailed { agent, .. } if agent == "bad")));
    assert!(watcher.session_for("good", &fx.project).is_some());

    // Recovers on a later tick
    bad.failing.store(false, Ordering::SeqCst);
    watcher.tick().await;
    assert_eq!(
        watcher.session_for("bad", &fx.project).unwrap().session_id,
        "never"
    );
}

#[tokio::test]
async fn test_allow_list_filters_projects() {
    let fx = fixture();
    let other = fx.project.parent().unwrap().join("elsewhere");
    let adapter = FakeAdapter::new("fake");
    adapter.set_active(&[(&fx.project, "s1"), (&other, "s2")]);

    let config = WatcherConfig {
        projects: Some(vec![fx.project.clone()]),
        ..WatcherConfig::default()
    };
    let mut watcher = LiveWatcher::new(
        AdapterRegistry::new(vec![adapter.clone()]),
        EventStore::with_dir(fx.data.clone()),
        config,
    );
    watcher.tick().await;

    assert_eq!(watcher.tracked().count(), 1);
    assert!(watcher.session_for("fake", &fx.project).is_some());
}

#[tokio::test]
async fn test_stop_seals_open_sessions() {
    let fx = fixture();
    let adapter = FakeAdapter::new("fake");
    adapter.set_active(&[(&fx.project, "s1")]);
    let mut watcher = watcher(&fx, vec![adapter.clone()]);

    watcher.tick().await;
    watcher.stop_handle().store(true, Ordering::SeqCst);
    watcher.run().await.unwrap();

    assert_eq!(watcher.tracked().count(), 0);
    assert!(watcher.store().load_summary("s1").is_some());
}

#[test]
fn test_sealing_unknown_key_is_noop() {
    let fx = fixture();
    let mut watcher = watcher(&fx, Vec::new());
    let sealed = watcher
        .seal(&("fake".to_string(), fx.project.clone()), true)
        .unwrap();
    assert!(sealed.is_none());
}

// ============================================================
// Backfill
// ============================================================

#[test]
fn test_backfill_seals_conversation() {
    let fx = fixture();
    let t0 = Utc::now() - chrono::Duration::hours(2);
    let adapter = FakeAdapter::with_conversation(
        "fake",
        vec![
            AdapterEvent::SessionStart {
                session_id: "old".into(),
                agent: "fake".into(),
                timestamp: t0,
                prompt: Some("port the parser".into()),
            },
            edit("old", "parser.rs", t0 + chrono::Duration::minutes(1)),
            tests_run("old", 12, 0, t0 + chrono::Duration::minutes(2)),
        ],
    );
    let watcher = watcher(&fx, vec![adapter]);

    let summary = watcher
        .backfill("fake", Path::new("/logs/old.jsonl"), &fx.project)
        .unwrap();
    assert_eq!(summary.id, "old");
    assert_eq!(summary.prompt, "port the parser");
    assert_eq!(summary.outcome, Outcome::Success);
    assert_eq!(summary.started_at, t0);
    assert_eq!(summary.ended_at, t0 + chrono::Duration::minutes(2));

    let events = watcher.store().read_events("old").unwrap();
    assert_eq!(events.len(), 4);

    // Second run finds the summary and appends nothing
    watcher
        .backfill("fake", Path::new("/logs/old.jsonl"), &fx.project)
        .unwrap();
    assert_eq!(watcher.store().read_events("old").unwrap().len(), 4);
}

#[test]
fn test_backfill_errors() {
    let fx = fixture();
    let watcher = watcher(&fx, vec![FakeAdapter::new("fake")]);

    let err = watcher
        .backfill("nope", Path::new("/logs/a.jsonl"), &fx.project)
        .unwrap_err();
    assert!(matches!(err, WatchError::UnknownAdapter(_)));

    let err = watcher
        .backfill("fake", Path::new("/logs/a.jsonl"), &fx.project)
        .unwrap_err();
    assert!(matches!(err, WatchError::EmptyConversation(_)));
}
