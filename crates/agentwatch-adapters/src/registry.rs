use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::warn;

use crate::traits::{Adapter, AgentKind};
use crate::{create_adapter, AdapterSettings};

/// Ordered set of adapters, looked up by name
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new(adapters: Vec<Arc<dyn Adapter>>) -> Self {
        Self { adapters }
    }

    /// One adapter per kind, in the order given. Duplicates are dropped.
    pub fn from_kinds(kinds: &[AgentKind], settings: &AdapterSettings) -> Self {
        let mut adapters: Vec<Arc<dyn Adapter>> = Vec::new();
        for kind in kinds {
            if adapters.iter().any(|a| a.kind() == *kind) {
                continue;
            }
            adapters.push(create_adapter(*kind, settings));
        }
        Self { adapters }
    }

    /// Every supported agent with default settings.
    pub fn with_defaults() -> Self {
        Self::from_kinds(
            &[AgentKind::ClaudeCode, AgentKind::Codex],
            &AdapterSettings::default(),
        )
    }

    pub fn adapters(&self) -> &[Arc<dyn Adapter>] {
        &self.adapters
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.iter().find(|a| a.name() == name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Adapters reporting activity in `project`, in registry order.
    ///
    /// Each adapter is checked on its own task, so one that panics is
    /// reported as inactive without hiding the others.
    pub async fn active_for(&self, project: &Path) -> Vec<Arc<dyn Adapter>> {
        let mut checks = JoinSet::new();
        for (index, adapter) in self.adapters.iter().enumerate() {
            let adapter = Arc::clone(adapter);
            let project = project.to_path_buf();
            checks.spawn(async move { (index, adapter.detect_activity(&project).await) });
        }

        let mut active = vec![false; self.adapters.len()];
        while let Some(result) = checks.join_next().await {
            match result {
                Ok((index, is_active)) => active[index] = is_active,
                Err(e) => warn!(error = %e, "Activity check failed"),
            }
        }

        self.adapters
            .iter()
            .zip(active)
            .filter(|(_, is_active)| *is_active)
            .map(|(adapter, _)| Arc::clone(adapter))
            .collect()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.names())
            .finish()
    }
}
