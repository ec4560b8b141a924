//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Duration;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wh_core::{AllowListPolicy, UserId, WindowConfig};

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Address the daemon's HTTP ingress binds to, and the CLI talks to.
    pub listen_addr: String,
    /// The implicit user every signal is attributed to.
    pub user_id: String,
    /// Upper bound on each shutdown phase.
    pub shutdown_grace_secs: u64,
    /// Pending writes the persistence thread may queue before dropping.
    pub write_queue_capacity: usize,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub producers: ProducersConfig,
}

/// Session and work-block timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrackingConfig {
    pub session_duration_hours: u32,
    pub idle_timeout_minutes: u32,
    pub cleanup_interval_secs: u64,
    pub quiescence_secs: u32,
    pub max_future_skew_minutes: u32,
    pub max_backfill_hours: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            session_duration_hours: 5,
            idle_timeout_minutes: 5,
            cleanup_interval_secs: 180,
            quiescence_secs: 5,
            max_future_skew_minutes: 5,
            max_backfill_hours: 24,
        }
    }
}

impl TrackingConfig {
    pub fn window(&self) -> WindowConfig {
        WindowConfig {
            session_duration: Duration::hours(i64::from(self.session_duration_hours)),
            idle_timeout: Duration::minutes(i64::from(self.idle_timeout_minutes)),
            max_future_skew: Duration::minutes(i64::from(self.max_future_skew_minutes)),
            max_backfill: Duration::hours(i64::from(self.max_backfill_hours)),
        }
    }

    pub fn quiescence(&self) -> Duration {
        Duration::seconds(i64::from(self.quiescence_secs))
    }
}

/// Signal producer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProducersConfig {
    /// Run the process lifecycle watcher.
    pub process_watcher: bool,
    pub process_poll_secs: u64,
    /// Capacity of each producer's channel into the engine.
    pub channel_capacity: usize,
    pub allow_list: AllowListPolicy,
}

impl Default for ProducersConfig {
    fn default() -> Self {
        Self {
            process_watcher: true,
            process_poll_secs: 5,
            channel_capacity: 256,
            allow_list: AllowListPolicy::default(),
        }
    }
}

/// A configuration value that loads but cannot be used.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("invalid user_id: {0}")]
    User(#[from] wh_core::ValidationError),
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("listen_addr", &self.listen_addr)
            .field("user_id", &self.user_id)
            .field("tracking", &self.tracking)
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("wh.db"),
            listen_addr: "127.0.0.1:9193".to_string(),
            user_id: "default_user".to_string(),
            shutdown_grace_secs: 10,
            write_queue_capacity: 1024,
            tracking: TrackingConfig::default(),
            producers: ProducersConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    ///
    /// Later sources win: defaults, `~/.config/wh/config.toml`, the given
    /// file, then `WH_*` environment variables (`WH_TRACKING__IDLE_TIMEOUT_MINUTES=10`).
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("WH_").split("__"));

        figment.extract()
    }

    /// Rejects values that would make the windowing rules meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (
                "tracking.session_duration_hours",
                u64::from(self.tracking.session_duration_hours),
            ),
            (
                "tracking.idle_timeout_minutes",
                u64::from(self.tracking.idle_timeout_minutes),
            ),
            (
                "tracking.cleanup_interval_secs",
                self.tracking.cleanup_interval_secs,
            ),
            ("producers.process_poll_secs", self.producers.process_poll_secs),
            ("producers.channel_capacity", self.producers.channel_capacity as u64),
            ("write_queue_capacity", self.write_queue_capacity as u64),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        self.user()?;
        Ok(())
    }

    pub fn user(&self) -> Result<UserId, wh_core::ValidationError> {
        UserId::new(self.user_id.clone())
    }

    pub fn daemon_url(&self) -> String {
        format!("http://{}", self.listen_addr)
    }

    pub const fn shutdown_grace(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Returns the platform-specific config directory for wh.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("wh"))
}

/// Returns the platform-specific data directory for wh.
///
/// On Linux: `~/.local/share/wh`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("wh"))
}
