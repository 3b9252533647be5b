use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use agentwatch_adapters::{same_dir, ActiveSession, Adapter, AdapterRegistry, ProjectEvent};
use agentwatch_sessions::{AdapterEvent, EventStore, SessionSummary};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::changes::ChangeWatcher;
use crate::error::WatchError;
use crate::outcome::derive_outcome;
use crate::signals::SignalEnricher;
use crate::tracked::{SessionKey, TrackedSession};

/// Poll-loop settings
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    /// Only these projects (or anything beneath them) are tracked
    pub projects: Option<Vec<PathBuf>>,
    /// Record filesystem changes for active projects
    pub watch_files: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            projects: None,
            watch_files: false,
        }
    }
}

impl WatcherConfig {
    fn allows(&self, project: &Path) -> bool {
        match &self.projects {
            None => true,
            Some(allowed) => allowed
                .iter()
                .any(|root| same_dir(root, project) || project.starts_with(root)),
        }
    }
}

/// Lifecycle notification published to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum WatchNotice {
    AgentOnline {
        agent: String,
        project: PathBuf,
    },
    SessionStart {
        agent: String,
        project: PathBuf,
        session_id: String,
    },
    SessionEnd {
        agent: String,
        project: PathBuf,
        session_id: String,
        summary: SessionSummary,
        events: usize,
    },
    AgentOffline {
        agent: String,
        project: PathBuf,
    },
    PollFailed {
        agent: String,
        error: String,
    },
}

/// Drives per-project session lifecycles from adapter polls.
///
/// One tracked session exists per `(adapter, project)` key. A session is
/// sealed exactly once: its `session_end` is appended, intervention signals
/// are derived, and a summary is written.
pub struct LiveWatcher {
    registry: AdapterRegistry,
    store: EventStore,
    enricher: SignalEnricher,
    config: WatcherConfig,
    tracked: HashMap<SessionKey, TrackedSession>,
    last_tick: HashMap<String, SystemTime>,
    /// Polled events not yet stored, per adapter. The tailer has already
    /// moved past them, so they are retried from here.
    undelivered: HashMap<String, VecDeque<ProjectEvent>>,
    change_watchers: HashMap<SessionKey, ChangeWatcher>,
    notices: broadcast::Sender<WatchNotice>,
    stopped: Arc<AtomicBool>,
    ticks: u64,
}

impl LiveWatcher {
    pub fn new(registry: AdapterRegistry, store: EventStore, config: WatcherConfig) -> Self {
        let (notices, _) = broadcast::channel(256);
        Self {
            registry,
            store,
            enricher: SignalEnricher::new(),
            config,
            tracked: HashMap::new(),
            last_tick: HashMap::new(),
            undelivered: HashMap::new(),
            change_watchers: HashMap::new(),
            notices,
            stopped: Arc::new(AtomicBool::new(false)),
            ticks: 0,
        }
    }

    pub fn with_enricher(mut self, enricher: SignalEnricher) -> Self {
        self.enricher = enricher;
        self
    }

    /// Get a handle to stop the poll loop
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stopped.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchNotice> {
        self.notices.subscribe()
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn tracked(&self) -> impl Iterator<Item = &TrackedSession> {
        self.tracked.values()
    }

    pub fn session_for(&self, agent: &str, project: &Path) -> Option<&TrackedSession> {
        self.tracked.get(&(agent.to_string(), project.to_path_buf()))
    }

    /// Tick until stopped, then seal whatever is still open.
    pub async fn run(&mut self) -> Result<(), WatchError> {
        info!(
            adapters = ?self.registry.names(),
            interval_secs = self.config.poll_interval.as_secs_f64(),
            "Live watcher started"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if self.stopped.load(Ordering::SeqCst) {
                info!(ticks = self.ticks, "Live watcher stopping");
                break;
            }
            self.tick().await;
        }

        self.seal_all();
        Ok(())
    }

    /// One pass over every adapter. A failing adapter is skipped for this
    /// tick, keeps its previous `since` clock and holds on to any events it
    /// could not store.
    pub async fn tick(&mut self) {
        let started = SystemTime::now();
        let adapters: Vec<Arc<dyn Adapter>> = self.registry.adapters().to_vec();

        for adapter in adapters {
            match self.tick_adapter(Arc::clone(&adapter), started).await {
                Ok(()) => {
                    self.last_tick.insert(adapter.name().to_string(), started);
                }
                Err(e) => {
                    warn!(adapter = adapter.name(), error = %e, "Adapter tick failed");
                    self.notify(WatchNotice::PollFailed {
                        agent: adapter.name().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        self.collect_changes();
        self.ticks += 1;
    }

    async fn tick_adapter(
        &mut self,
        adapter: Arc<dyn Adapter>,
        started: SystemTime,
    ) -> Result<(), WatchError> {
        let name = adapter.name().to_string();
        let mut pending = self.undelivered.remove(&name).unwrap_or_default();
        let result = self.drive_adapter(adapter, started, &mut pending).await;
        if !pending.is_empty() {
            debug!(adapter = %name, held = pending.len(), "Holding undelivered events");
            self.undelivered.insert(name, pending);
        }
        result
    }

    /// Poll, drive transitions, and store events. Events leave `pending`
    /// only once they are stored.
    async fn drive_adapter(
        &mut self,
        adapter: Arc<dyn Adapter>,
        started: SystemTime,
        pending: &mut VecDeque<ProjectEvent>,
    ) -> Result<(), WatchError> {
        let name = adapter.name().to_string();
        let since = match self.last_tick.get(&name) {
            Some(last) => *last,
            None => started
                .checked_sub(adapter.liveness_window())
                .unwrap_or(UNIX_EPOCH),
        };

        // Log scans walk directories and read files
        let scanner = Arc::clone(&adapter);
        let polled = tokio::task::spawn_blocking(move || scanner.poll_all(since)).await??;
        pending.extend(
            polled
                .into_iter()
                .filter(|pe| self.config.allows(&pe.project)),
        );
        let active: Vec<ActiveSession> = adapter
            .active_sessions()
            .await
            .into_iter()
            .filter(|s| self.config.allows(&s.project))
            .collect();
        debug!(
            adapter = %name,
            events = pending.len(),
            active = active.len(),
            "Polled adapter"
        );

        // Projects that dropped out of the active set
        let gone: Vec<SessionKey> = self
            .tracked
            .keys()
            .filter(|(agent, project)| {
                *agent == name && !active.iter().any(|s| s.project == *project)
            })
            .cloned()
            .collect();
        for key in gone {
            self.route_own_events(&key, pending)?;
            self.seal(&key, true)?;
        }

        for session in active {
            let key = (name.clone(), session.project.clone());
            match self.tracked.get(&key).map(|t| t.session_id.clone()) {
                Some(current) if current == session.session_id => {}
                Some(current) => {
                    debug!(
                        adapter = %name,
                        old = %current,
                        new = %session.session_id,
                        "Session id changed"
                    );
                    self.route_own_events(&key, pending)?;
                    self.seal(&key, false)?;
                    self.begin(&name, session)?;
                }
                None => self.begin(&name, session)?,
            }
        }

        while let Some(pe) = pending.front() {
            let key = (name.clone(), pe.project.clone());
            if !self.tracked.contains_key(&key) {
                let orphan = ActiveSession {
                    project: pe.project.clone(),
                    session_id: pe.event.session_id().to_string(),
                    session_path: None,
                };
                self.begin(&name, orphan)?;
            }
            let event = pe.event.clone();
            self.route(&key, event)?;
            pending.pop_front();
        }

        Ok(())
    }

    /// Start tracking a session and append its `session_start`.
    fn begin(&mut self, agent: &str, session: ActiveSession) -> Result<(), WatchError> {
        let tracked = TrackedSession::new(
            agent,
            session.session_id.clone(),
            session.project.clone(),
            session.session_path,
        );
        self.store
            .append_event(&AdapterEvent::SessionStart {
                session_id: session.session_id.clone(),
                agent: agent.to_string(),
                timestamp: tracked.start_time,
                prompt: None,
            })
            .map_err(WatchError::Store)?;

        info!(
            agent,
            project = %session.project.display(),
            session_id = %session.session_id,
            "Session started"
        );
        self.notify(WatchNotice::AgentOnline {
            agent: agent.to_string(),
            project: session.project.clone(),
        });
        self.notify(WatchNotice::SessionStart {
            agent: agent.to_string(),
            project: session.project.clone(),
            session_id: session.session_id,
        });

        let key = tracked.key();
        if self.config.watch_files {
            match ChangeWatcher::start(&session.project) {
                Ok(watcher) => {
                    self.change_watchers.insert(key.clone(), watcher);
                }
                Err(e) => {
                    warn!(
                        project = %session.project.display(),
                        error = %e,
                        "File watching unavailable"
                    );
                }
            }
        }

        self.tracked.insert(key, tracked);
        Ok(())
    }

    /// Store one polled event and fold it into the tracked session when
    /// the ids agree. Lifecycle events only contribute their prompt.
    fn route(&mut self, key: &SessionKey, event: AdapterEvent) -> Result<(), WatchError> {
        let tracked = self.tracked.get_mut(key);
        if event.is_lifecycle() {
            if let Some(tracked) = tracked {
                if tracked.session_id == event.session_id() {
                    tracked.record(&event);
                }
            }
            return Ok(());
        }

        self.store.append_event(&event).map_err(WatchError::Store)?;
        if let Some(tracked) = tracked {
            if tracked.session_id == event.session_id() {
                tracked.record(&event);
            }
        }
        Ok(())
    }

    /// Route pending events that belong to the session currently tracked
    /// under `key`, so they land before it is sealed.
    fn route_own_events(
        &mut self,
        key: &SessionKey,
        pending: &mut VecDeque<ProjectEvent>,
    ) -> Result<(), WatchError> {
        let Some(session_id) = self.tracked.get(key).map(|t| t.session_id.clone()) else {
            return Ok(());
        };
        let mut i = 0;
        while i < pending.len() {
            let pe = &pending[i];
            if pe.project == key.1 && pe.event.session_id() == session_id {
                let event = pe.event.clone();
                self.route(key, event)?;
                pending.remove(i);
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    /// Seal the session under `key`. Unknown keys are a no-op.
    pub fn seal(
        &mut self,
        key: &SessionKey,
        offline: bool,
    ) -> Result<Option<SessionSummary>, WatchError> {
        let Some(mut tracked) = self.tracked.remove(key) else {
            return Ok(None);
        };
        if let Some(watcher) = self.change_watchers.remove(key) {
            tracked.observe(watcher.drain());
        }
        tracked.active = false;

        let agent = tracked.agent.clone();
        let project = tracked.project_path.clone();
        let session_id = tracked.session_id.clone();
        let (summary, events) = match self.finish(&mut tracked, None) {
            Ok(done) => done,
            Err(e) => {
                // Still open; the next tick retries the seal
                tracked.active = true;
                self.tracked.insert(key.clone(), tracked);
                return Err(e);
            }
        };

        info!(
            agent = %agent,
            session_id = %session_id,
            outcome = %summary.outcome,
            interventions = summary.interventions,
            "Session sealed"
        );
        self.notify(WatchNotice::SessionEnd {
            agent: agent.clone(),
            project: project.clone(),
            session_id,
            summary: summary.clone(),
            events,
        });
        if offline {
            self.notify(WatchNotice::AgentOffline { agent, project });
        }
        Ok(Some(summary))
    }

    /// Seal every open session, logging failures.
    pub fn seal_all(&mut self) {
        let keys: Vec<SessionKey> = self.tracked.keys().cloned().collect();
        for key in keys {
            if let Err(e) = self.seal(&key, true) {
                warn!(
                    agent = %key.0,
                    project = %key.1.display(),
                    error = %e,
                    "Failed to seal session"
                );
            }
        }
    }

    /// Ingest a finished conversation log and seal it immediately.
    ///
    /// A session that already has a summary is returned as-is.
    pub fn backfill(
        &self,
        adapter_name: &str,
        log: &Path,
        project: &Path,
    ) -> Result<SessionSummary, WatchError> {
        let adapter = self
            .registry
            .get(adapter_name)
            .ok_or_else(|| WatchError::UnknownAdapter(adapter_name.to_string()))?;

        let events = adapter.parse_conversation(log)?;
        let (Some(first), Some(last)) = (events.first(), events.last()) else {
            return Err(WatchError::EmptyConversation(log.display().to_string()));
        };
        let session_id = first.session_id().to_string();
        let first_at = events
            .iter()
            .map(|e| e.timestamp())
            .fold(first.timestamp(), |a, b| a.min(b));
        let last_at = events
            .iter()
            .map(|e| e.timestamp())
            .fold(last.timestamp(), |a, b| a.max(b));

        if let Some(existing) = self.store.load_summary(&session_id) {
            info!(session_id = %session_id, "Session already summarized");
            return Ok(existing);
        }

        let mut tracked = TrackedSession::new(
            adapter.name(),
            session_id.clone(),
            project.to_path_buf(),
            Some(log.to_path_buf()),
        );
        tracked.start_time = first_at;
        for event in &events {
            tracked.record(event);
        }

        let mut lines = vec![AdapterEvent::SessionStart {
            session_id: session_id.clone(),
            agent: adapter.name().to_string(),
            timestamp: first_at,
            prompt: tracked.prompt.clone(),
        }];
        lines.extend(events.into_iter().filter(|e| !e.is_lifecycle()));
        self.store.append_events(&lines).map_err(WatchError::Store)?;

        let (summary, count) = self.finish(&mut tracked, Some(last_at))?;
        info!(
            session_id = %session_id,
            events = count,
            outcome = %summary.outcome,
            "Backfilled session"
        );
        Ok(summary)
    }

    /// Append `session_end` and derived signals, then write the summary.
    /// Returns the summary and the number of events in the session's log.
    fn finish(
        &self,
        tracked: &mut TrackedSession,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<(SessionSummary, usize), WatchError> {
        let now = Utc::now();
        let session_id = tracked.session_id.clone();

        if !tracked.end_appended {
            self.store
                .append_event(&AdapterEvent::SessionEnd {
                    session_id: session_id.clone(),
                    timestamp: ended_at.unwrap_or(now),
                    exit_code: None,
                })
                .map_err(WatchError::Store)?;
            tracked.end_appended = true;
        }

        let mut events = self.store.read_events(&session_id).map_err(WatchError::Store)?;
        let started_at = events
            .iter()
            .map(|e| e.timestamp())
            .fold(tracked.started_at(), |earliest, at| earliest.min(at));

        let derived = self.enricher.enrich(
            &session_id,
            &tracked.project_path,
            started_at,
            &events,
            &tracked.observed,
        );
        if !derived.is_empty() {
            self.store.append_events(&derived).map_err(WatchError::Store)?;
        }
        events.extend(derived);

        let mut files_changed: Vec<String> = Vec::new();
        for path in tracked
            .files
            .iter()
            .map(String::as_str)
            .chain(events.iter().filter_map(|e| e.edited_path()))
        {
            if !files_changed.iter().any(|f| f == path) {
                files_changed.push(path.to_string());
            }
        }

        let prompt = tracked.prompt.clone().or_else(|| {
            events.iter().find_map(|e| match e {
                AdapterEvent::SessionStart {
                    prompt: Some(prompt),
                    ..
                } => Some(prompt.clone()),
                _ => None,
            })
        });

        let interventions = events
            .iter()
            .filter(|e| matches!(e, AdapterEvent::UserIntervention { .. }))
            .count();

        let summary = SessionSummary {
            id: session_id,
            agent: tracked.agent.clone(),
            prompt: prompt.unwrap_or_default(),
            project_cwd: Some(tracked.project_path.clone()),
            started_at,
            ended_at: ended_at.unwrap_or(now).max(started_at),
            outcome: derive_outcome(&events),
            files_changed,
            interventions,
            analyzed: false,
            reviewed_event_count: None,
        };
        self.store.save_summary(&summary).map_err(WatchError::Store)?;
        Ok((summary, events.len()))
    }

    fn collect_changes(&mut self) {
        for (key, watcher) in &self.change_watchers {
            let changes = watcher.drain();
            if changes.is_empty() {
                continue;
            }
            if let Some(tracked) = self.tracked.get_mut(key) {
                debug!(
                    project = %key.1.display(),
                    changes = changes.len(),
                    "Observed file changes"
                );
                tracked.observe(changes);
            }
        }
    }

    fn notify(&self, notice: WatchNotice) {
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }
}
