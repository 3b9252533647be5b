//! Watcher configuration file support.
//!
//! Loads `agentwatch.toml` from `--config` or the platform config directory.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agentwatch_adapters::{AdapterSettings, AgentKind};
use agentwatch_core::WatcherConfig;
use agentwatch_sessions::EventStore;

/// The config file name
pub const CONFIG_FILE_NAME: &str = "agentwatch.toml";

/// Default retention when neither the file nor the flag gives one
pub const DEFAULT_RETENTION_DAYS: u64 = 30;

/// Settings loaded from `agentwatch.toml`. Every key is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    /// Time between watcher ticks, e.g. "5s"
    #[serde(default, with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
    /// How recently a log must be written for its project to count as active
    #[serde(default, with = "humantime_serde")]
    pub liveness_window: Option<Duration>,
    /// Hard limit for each process-table probe
    #[serde(default, with = "humantime_serde")]
    pub probe_timeout: Option<Duration>,
    pub retention_days: Option<u64>,
    /// Where event logs and summaries live
    pub data_dir: Option<PathBuf>,
    /// Directory for the rolling diagnostics log
    pub log_dir: Option<PathBuf>,
    /// Enabled adapters by name; all when absent
    pub agents: Option<Vec<String>>,
    /// Only track these projects
    pub projects: Option<Vec<PathBuf>>,
    pub watch_files: Option<bool>,
}

impl WatchConfig {
    /// Load configuration.
    ///
    /// Returns:
    /// - `Ok(Some(config))` if the file exists and parses successfully
    /// - `Ok(None)` if no file exists at the default location
    /// - `Err(...)` if the file fails to parse, or an explicit path is missing
    pub fn load(explicit: Option<&Path>) -> Result<Option<Self>> {
        let config_path = match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                path.to_path_buf()
            }
            None => match default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(None),
            },
        };

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: WatchConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        Ok(Some(config))
    }

    /// Enabled adapters, in configured order. All of them when unset.
    pub fn agent_kinds(&self) -> Result<Vec<AgentKind>> {
        match &self.agents {
            None => Ok(vec![AgentKind::ClaudeCode, AgentKind::Codex]),
            Some(names) => names
                .iter()
                .map(|name| name.parse::<AgentKind>().map_err(|e| anyhow::anyhow!(e)))
                .collect(),
        }
    }

    pub fn adapter_settings(&self) -> AdapterSettings {
        let defaults = AdapterSettings::default();
        AdapterSettings {
            liveness_window: self.liveness_window.unwrap_or(defaults.liveness_window),
            probe_timeout: self.probe_timeout.unwrap_or(defaults.probe_timeout),
        }
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        let defaults = WatcherConfig::default();
        WatcherConfig {
            poll_interval: self.poll_interval.unwrap_or(defaults.poll_interval),
            projects: self.projects.clone(),
            watch_files: self.watch_files.unwrap_or(defaults.watch_files),
        }
    }

    pub fn retention(&self) -> Duration {
        let days = self.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS);
        Duration::from_secs(days.saturating_mul(24 * 60 * 60))
    }

    /// The event store at `data_dir`, or the platform data directory.
    pub fn open_store(&self) -> Result<EventStore> {
        match &self.data_dir {
            Some(dir) => Ok(EventStore::with_dir(dir.clone())),
            None => EventStore::new(),
        }
    }
}

/// `<config dir>/agentwatch/agentwatch.toml`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("agentwatch").join(CONFIG_FILE_NAME))
}
