use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use config as cfg;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    /// Emit newline-delimited JSON instead of human-readable lines.
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

/// Tuning of traversal, detection and write retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEngineConfig {
    /// Depth of the inline traversal done by `propagate_change`.
    pub propagate_change_depth: usize,
    /// Default depth of a standalone propagator run.
    pub propagator_max_depth: usize,
    /// Nodes grouped per repository round-trip batch within a layer.
    pub propagator_batch_size: usize,
    /// Depth of the follow-up pass run by `propagate_change` jobs.
    pub deep_propagation_depth: usize,
    /// Grace period below which a sync-time gap is not drift.
    pub staleness_threshold_secs: u64,
    /// Compare-and-swap retries before giving up with a conflict.
    pub cas_max_retries: u32,
}

/// `None` when `secs` does not fit a `chrono::Duration`.
fn checked_seconds(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds)
}

impl GraphEngineConfig {
    /// Saturates at `chrono::Duration::MAX`; `Settings::validate` rejects such values.
    pub fn staleness_threshold(&self) -> chrono::Duration {
        checked_seconds(self.staleness_threshold_secs).unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for GraphEngineConfig {
    fn default() -> Self {
        Self {
            propagate_change_depth: 3,
            propagator_max_depth: 2,
            propagator_batch_size: 50,
            deep_propagation_depth: 5,
            staleness_threshold_secs: 60,
            cas_max_retries: 3,
        }
    }
}

/// Retry, retention and throughput policy of one job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    pub name: String,
    /// Total attempts, including the first.
    pub attempts: u32,
    /// First retry delay; doubles on every further attempt.
    pub backoff_initial_ms: u64,
    /// Completed jobs kept for inspection.
    pub remove_on_complete: usize,
    /// Failed jobs kept for inspection.
    pub remove_on_fail: usize,
    pub concurrency: usize,
    pub rate_limit_per_minute: u32,
}

impl QueueSettings {
    pub fn graph() -> Self {
        Self {
            name: "knowledge-graph".to_string(),
            attempts: 3,
            backoff_initial_ms: 5_000,
            remove_on_complete: 500,
            remove_on_fail: 200,
            concurrency: 5,
            rate_limit_per_minute: 20,
        }
    }

    pub fn indexer() -> Self {
        Self {
            name: "codebase-indexer".to_string(),
            attempts: 3,
            backoff_initial_ms: 10_000,
            remove_on_complete: 200,
            remove_on_fail: 100,
            concurrency: 3,
            rate_limit_per_minute: 5,
        }
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuesConfig {
    #[serde(default = "QueueSettings::graph")]
    pub graph: QueueSettings,
    #[serde(default = "QueueSettings::indexer")]
    pub indexer: QueueSettings,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            graph: QueueSettings::graph(),
            indexer: QueueSettings::indexer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval of periodic full scans.
    pub full_scan_every_secs: u64,
    /// Projects registered for periodic full scans at startup.
    #[serde(default)]
    pub projects: Vec<String>,
}

impl SchedulerConfig {
    pub fn full_scan_every(&self) -> Duration {
        Duration::from_secs(self.full_scan_every_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            full_scan_every_secs: 24 * 60 * 60,
            projects: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionsConfig {
    /// Lifetime of cached codebase connection coordinates.
    pub cache_ttl_secs: u64,
}

impl ConnectionsConfig {
    pub fn cache_ttl(&self) -> chrono::Duration {
        checked_seconds(self.cache_ttl_secs).unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 50 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "Settings::default_env")]
    pub env: String,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub graph: GraphEngineConfig,
    #[serde(default)]
    pub queues: QueuesConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub connections: ConnectionsConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: Self::default_env(),
            logging: LoggingConfig::default(),
            graph: GraphEngineConfig::default(),
            queues: QueuesConfig::default(),
            scheduler: SchedulerConfig::default(),
            connections: ConnectionsConfig::default(),
        }
    }
}

impl Settings {
    fn default_env() -> String {
        env::var("APP_ENV")
            .ok()
            .or_else(|| env::var("RUST_ENV").ok())
            .unwrap_or_else(|| "development".to_string())
    }

    pub fn validate(&self) -> Result<()> {
        let g = &self.graph;
        anyhow::ensure!(
            g.propagate_change_depth > 0,
            "graph.propagate_change_depth must be > 0"
        );
        anyhow::ensure!(
            g.propagator_max_depth > 0,
            "graph.propagator_max_depth must be > 0"
        );
        anyhow::ensure!(
            g.propagator_batch_size > 0,
            "graph.propagator_batch_size must be > 0"
        );
        anyhow::ensure!(
            g.deep_propagation_depth >= g.propagate_change_depth,
            "graph.deep_propagation_depth must be >= graph.propagate_change_depth"
        );
        anyhow::ensure!(
            checked_seconds(g.staleness_threshold_secs).is_some(),
            "graph.staleness_threshold_secs is out of range"
        );
        anyhow::ensure!(
            checked_seconds(self.connections.cache_ttl_secs).is_some(),
            "connections.cache_ttl_secs is out of range"
        );
        for (key, q) in [("graph", &self.queues.graph), ("indexer", &self.queues.indexer)] {
            anyhow::ensure!(!q.name.trim().is_empty(), "queues.{key}.name cannot be empty");
            anyhow::ensure!(q.attempts > 0, "queues.{key}.attempts must be > 0");
            anyhow::ensure!(q.concurrency > 0, "queues.{key}.concurrency must be > 0");
            anyhow::ensure!(
                q.rate_limit_per_minute > 0,
                "queues.{key}.rate_limit_per_minute must be > 0"
            );
        }
        anyhow::ensure!(
            self.scheduler.full_scan_every_secs > 0,
            "scheduler.full_scan_every_secs must be > 0"
        );
        Ok(())
    }
}

/// Resolves where settings live and loads them.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: PathBuf,
    env: String,
}

impl ConfigManager {
    pub fn new(config_dir: Option<PathBuf>, env_override: Option<String>) -> Self {
        Self {
            config_dir: config_dir.unwrap_or_else(Self::default_config_dir),
            env: env_override.unwrap_or_else(Settings::default_env),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    /// Load and validate settings from this manager's directory.
    pub fn load(&self) -> Result<Settings> {
        let settings = Self::load_from_sources(&self.config_dir, &self.env)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Priority order:
    /// 1. ~/.driftgraph/
    /// 2. ./config/
    /// 3. Current directory
    pub fn default_config_dir() -> PathBuf {
        if let Some(home_dir) = dirs::home_dir() {
            let dir = home_dir.join(".driftgraph");
            if dir.exists() {
                info!("Using config directory: {:?}", dir);
                return dir;
            }
        }

        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let project_config = cwd.join("config");
        if project_config.exists() {
            info!("Using config directory: {:?}", project_config);
            return project_config;
        }

        info!("Using config directory: {:?}", cwd);
        cwd
    }

    /// Layered load: built-in defaults, `default.*`, `{env}.*`, `local.toml`,
    /// then `DRIFTGRAPH__*` environment variables.
    pub fn load_from_sources(config_dir: &Path, env_name: &str) -> Result<Settings> {
        let defaults = cfg::Config::try_from(&Settings::default())
            .context("serializing default settings")?;

        let mut builder = cfg::Config::builder().add_source(defaults);
        for stem in ["default", env_name] {
            for ext in ["toml", "yaml", "yml", "json"] {
                builder = builder.add_source(
                    cfg::File::from(config_dir.join(format!("{stem}.{ext}"))).required(false),
                );
            }
        }

        let settings: Settings = builder
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                cfg::Environment::with_prefix("DRIFTGRAPH")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override("env", env_name)
            .context("applying env override")?
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.graph.propagate_change_depth, 3);
        assert_eq!(settings.graph.propagator_max_depth, 2);
        assert_eq!(settings.graph.propagator_batch_size, 50);
    }

    #[test]
    fn queue_presets_match_policy() {
        let g = QueueSettings::graph();
        assert_eq!((g.attempts, g.backoff_initial_ms), (3, 5_000));
        assert_eq!((g.remove_on_complete, g.remove_on_fail), (500, 200));
        assert_eq!((g.concurrency, g.rate_limit_per_minute), (5, 20));

        let i = QueueSettings::indexer();
        assert_eq!((i.attempts, i.backoff_initial_ms), (3, 10_000));
        assert_eq!((i.remove_on_complete, i.remove_on_fail), (200, 100));
        assert_eq!((i.concurrency, i.rate_limit_per_minute), (3, 5));
    }

    #[test]
    fn validation_rejects_zero_concurrency() {
        let mut settings = Settings::default();
        settings.queues.indexer.concurrency = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("queues.indexer.concurrency"));
    }

    #[test]
    fn validation_rejects_durations_chrono_cannot_hold() {
        for secs in [u64::MAX, 10_000_000_000_000_000] {
            let mut settings = Settings::default();
            settings.graph.staleness_threshold_secs = secs;
            let err = settings.validate().unwrap_err();
            assert!(err.to_string().contains("graph.staleness_threshold_secs"));
            assert_eq!(settings.graph.staleness_threshold(), chrono::Duration::MAX);

            let mut settings = Settings::default();
            settings.connections.cache_ttl_secs = secs;
            let err = settings.validate().unwrap_err();
            assert!(err.to_string().contains("connections.cache_ttl_secs"));
            assert_eq!(settings.connections.cache_ttl(), chrono::Duration::MAX);
        }
    }

    #[test]
    fn durations_convert_from_seconds() {
        let settings = Settings::default();
        assert_eq!(settings.graph.staleness_threshold(), chrono::Duration::seconds(60));
        assert_eq!(settings.connections.cache_ttl(), chrono::Duration::minutes(50));
    }
}
