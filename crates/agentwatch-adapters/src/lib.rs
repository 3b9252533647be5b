//! Adapters that turn coding-agent session logs into canonical events.
//!
//! Each supported agent implements [`Adapter`]: it knows where its agent
//! writes transcripts, how to decode them into [`AdapterEvent`]s, and how to
//! tell whether the agent is still working in a project.
//!
//! [`AdapterEvent`]: agentwatch_sessions::AdapterEvent

mod claude;
mod codex;
mod decode;
mod process;
mod registry;
pub mod slug;
mod tail;
pub mod test_results;
mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use claude::{ClaudeCodeAdapter, ClaudeDecoder};
pub use codex::{CodexAdapter, CodexDecoder};
pub use process::ProcessProbe;
pub use registry::AdapterRegistry;
pub use tail::{collect_jsonl_files, decode_file, LineDecoder, Tailer};
pub use test_results::TestSummary;
pub use traits::{
    is_recent, newest_unit, same_dir, ActiveSession, Adapter, AdapterError, AgentKind, LogUnit,
    ProjectEvent,
};

/// Per-instance tuning shared by every adapter
#[derive(Debug, Clone, Copy)]
pub struct AdapterSettings {
    /// A log written this recently marks its project as active
    pub liveness_window: Duration,
    /// Hard limit for each process-table probe
    pub probe_timeout: Duration,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            liveness_window: Duration::from_secs(5 * 60),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// Create an adapter by kind
pub fn create_adapter(kind: AgentKind, settings: &AdapterSettings) -> Arc<dyn Adapter> {
    match kind {
        AgentKind::ClaudeCode => Arc::new(
            ClaudeCodeAdapter::new()
                .with_liveness_window(settings.liveness_window)
                .with_probe_timeout(settings.probe_timeout),
        ),
        AgentKind::Codex => Arc::new(
            CodexAdapter::new()
                .with_liveness_window(settings.liveness_window)
                .with_probe_timeout(settings.probe_timeout),
        ),
    }
}
