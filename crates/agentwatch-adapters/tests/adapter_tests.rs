use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use agentwatch_adapters::{
    slug, Adapter, AdapterError, AdapterRegistry, AgentKind, ClaudeCodeAdapter, CodexAdapter,
    LogUnit, ProjectEvent,
};
use agentwatch_sessions::AdapterEvent;
use async_trait::async_trait;
use tempfile::TempDir;

const PROMPT: &str = r#"{"type":"user","message":{"role":"user","content":"add a login form"},"timestamp":"2026-02-01T10:00:00Z"}"#;
const EDIT_USE: &str = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Write","input":{"file_path":"src/login.tsx","content":"a\nb\n"}}]},"timestamp":"2026-02-01T10:00:05Z"}"#;
const EDIT_RESULT: &str = r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t1","content":"File created"}]},"toolUseResult":{"type":"create"},"timestamp":"2026-02-01T10:00:06Z"}"#;

fn write_lines(path: &Path, lines: &[&str]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut body = lines.join("\n");
    body.push('\n');
    std::fs::write(path, body).unwrap();
}

fn append_lines(path: &Path, lines: &[&str]) {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
}

fn age(path: &Path, secs: u64) {
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(secs))
        .unwrap();
}

/// A project directory on disk plus a Claude log root that knows about it.
fn claude_fixture() -> (TempDir, PathBuf, ClaudeCodeAdapter) {
    let dir = tempfile::Builder::new().prefix("ws").tempdir().unwrap();
    let project = dir.path().join("code/my-project");
    std::fs::create_dir_all(&project).unwrap();
    let root = dir.path().join("claude-projects");
    std::fs::create_dir_all(root.join(slug::flatten(&project))).unwrap();
    let adapter = ClaudeCodeAdapter::with_root(root).with_probe_timeout(Duration::from_millis(300));
    (dir, project, adapter)
}

// ============================================================
// Claude Code adapter
// ============================================================

#[tokio::test]
async fn test_claude_log_units_decode_project() {
    let (_dir, project, adapter) = claude_fixture();
    let log = adapter.log_dir_for(&project).join("sess-a.jsonl");
    write_lines(&log, &[PROMPT]);

    let units = adapter.log_units();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].project, project);
    assert_eq!(units[0].session_id, "sess-a");
    assert_eq!(adapter.active_session_id(&project).as_deref(), Some("sess-a"));
    assert_eq!(adapter.active_session_path(&project), Some(log));
}

#[tokio::test]
async fn test_claude_repoll_yields_only_new_events() {
    let (_dir, project, adapter) = claude_fixture();
    let log = adapter.log_dir_for(&project).join("sess-a.jsonl");
    write_lines(&log, &[PROMPT, EDIT_USE]);

    let since = SystemTime::now() - Duration::from_secs(60);
    let first = adapter.poll(&project, since).unwrap();
    assert_eq!(first.len(), 1);
    assert!(matches!(first[0], AdapterEvent::SessionStart { .. }));

    assert!(adapter.poll(&project, since).unwrap().is_empty());

    append_lines(&log, &[EDIT_RESULT]);
    let third = adapter.poll(&project, since).unwrap();
    assert!(matches!(
        &third[..],
        [AdapterEvent::FileEdit { lines_added: 2, .. }]
    ));
}

#[tokio::test]
async fn test_claude_poll_all_tags_project_and_respects_since() {
    let (_dir, project, adapter) = claude_fixture();
    let fresh = adapter.log_dir_for(&project).join("fresh.jsonl");
    let stale = adapter.log_dir_for(&project).join("stale.jsonl");
    write_lines(&fresh, &[PROMPT]);
    write_lines(&stale, &[PROMPT]);
    age(&stale, 3600);

    let events = adapter
        .poll_all(SystemTime::now() - Duration::from_secs(60))
        .unwrap();
    assert_eq!(events.len(), 1);
    let ProjectEvent { project: owner, event } = &events[0];
    assert_eq!(owner, &project);
    assert_eq!(event.session_id(), "fresh");
}

#[tokio::test]
async fn test_claude_active_sessions_one_per_project() {
    let (_dir, project, adapter) = claude_fixture();
    let older = adapter.log_dir_for(&project).join("older.jsonl");
    let newer = adapter.log_dir_for(&project).join("newer.jsonl");
    write_lines(&older, &[PROMPT]);
    write_lines(&newer, &[PROMPT]);
    age(&older, 120);

    let active = adapter.active_sessions().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].project, project);
    assert_eq!(active[0].session_id, "newer");
    assert!(adapter.detect_activity(&project).await);
}

#[tokio::test]
async fn test_claude_stale_logs_are_inactive() {
    let (_dir, project, adapter) = claude_fixture();
    let log = adapter.log_dir_for(&project).join("old.jsonl");
    write_lines(&log, &[PROMPT]);
    age(&log, 3600);

    assert!(adapter.active_sessions().await.is_empty());
    assert!(!adapter.detect_activity(&project).await);
    // Staleness does not hide the most recent unit.
    assert_eq!(adapter.active_session_id(&project).as_deref(), Some("old"));
}

#[tokio::test]
async fn test_claude_parse_conversation_is_independent_of_offsets() {
    let (_dir, project, adapter) = claude_fixture();
    let log = adapter.log_dir_for(&project).join("sess-a.jsonl");
    write_lines(&log, &[PROMPT, EDIT_USE, EDIT_RESULT]);

    let since = SystemTime::now() - Duration::from_secs(60);
    assert_eq!(adapter.poll(&project, since).unwrap().len(), 2);

    let full = adapter.parse_conversation(&log).unwrap();
    assert_eq!(full.len(), 2);
    assert!(full.iter().all(|e| e.session_id() == "sess-a"));
}

#[tokio::test]
async fn test_missing_root_is_empty_not_error() {
    let dir = TempDir::new().unwrap();
    let adapter = ClaudeCodeAdapter::with_root(dir.path().join("absent"));
    assert!(adapter.log_units().is_empty());
    assert!(adapter.poll_all(SystemTime::UNIX_EPOCH).unwrap().is_empty());
}

// ============================================================
// Codex adapter
// ============================================================

fn rollout(root: &Path, id: &str, cwd: &Path) -> PathBuf {
    let path = root
        .join("2026/02/01")
        .join(format!("rollout-2026-02-01T10-00-00-{}.jsonl", id));
    let meta = format!(
        r#"{{"timestamp":"2026-02-01T10:00:00Z","type":"session_meta","payload":{{"id":"{}","cwd":"{}"}}}}"#,
        id,
        cwd.display()
    );
    let prompt = r#"{"timestamp":"2026-02-01T10:00:01Z","type":"event_msg","payload":{"type":"user_message","message":"bump deps"}}"#;
    write_lines(&path, &[&meta, prompt]);
    path
}

#[tokio::test]
async fn test_codex_units_come_from_session_meta() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("sessions");
    let project = dir.path().join("app");
    std::fs::create_dir_all(&project).unwrap();
    let path = rollout(&root, "0b8f4e6e-1d5c-4c8e-9f0e-2b9d3f1a7c55", &project);
    std::fs::write(root.join("2026/02/01/notes.jsonl"), "{}\n").unwrap();

    let adapter = CodexAdapter::with_root(root).with_probe_timeout(Duration::from_millis(300));
    let units = adapter.log_units();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].project, project);
    assert_eq!(units[0].path, path);

    let events = adapter.poll_all(SystemTime::now() - Duration::from_secs(60)).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].project, project);
    assert!(matches!(
        &events[0].event,
        AdapterEvent::SessionStart { prompt: Some(p), agent, .. } if p == "bump deps" && agent == "codex"
    ));
    assert!(adapter.poll(&project, SystemTime::UNIX_EPOCH).unwrap().is_empty());
}

// ============================================================
// Registry
// ============================================================

struct StubAdapter {
    name: &'static str,
    active: bool,
}

#[async_trait]
impl Adapter for StubAdapter {
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

    async fn detect_activity(&self, _project: &Path) -> bool {
        if self.name == "broken" {
            panic!("probe exploded");
        }
        self.active
    }

    fn poll(&self, _: &Path, _: SystemTime) -> Result<Vec<AdapterEvent>, AdapterError> {
        Ok(Vec::new())
    }

    fn poll_all(&self, _: SystemTime) -> Result<Vec<ProjectEvent>, AdapterError> {
        Ok(Vec::new())
    }

    fn parse_conversation(&self, _: &Path) -> Result<Vec<AdapterEvent>, AdapterError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_registry_lookup_and_isolated_activity_checks() {
    let registry = AdapterRegistry::new(vec![
        Arc::new(StubAdapter { name: "first", active: true }),
        Arc::new(StubAdapter { name: "broken", active: true }),
        Arc::new(StubAdapter { name: "idle", active: false }),
        Arc::new(StubAdapter { name: "last", active: true }),
    ]);

    assert_eq!(registry.len(), 4);
    assert_eq!(registry.get("idle").unwrap().name(), "idle");
    assert!(registry.get("nope").is_none());

    let active: Vec<String> = registry
        .active_for(Path::new("/tmp/project"))
        .await
        .iter()
        .map(|a| a.name().to_string())
        .collect();
    assert_eq!(active, vec!["first", "last"]);
}

#[test]
fn test_registry_from_kinds_dedupes() {
    let registry = AdapterRegistry::from_kinds(
        &[AgentKind::Codex, AgentKind::ClaudeCode, AgentKind::Codex],
        &Default::default(),
    );
    assert_eq!(registry.names(), vec!["codex", "claude-code"]);
}
