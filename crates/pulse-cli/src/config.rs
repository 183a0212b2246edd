//! Configuration loading and management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use pulse_core::CoalescerConfig;
use pulse_query::{DEFAULT_MAX_STEPS, QueryConfig};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,

    #[serde(default)]
    pub query: QuerySettings,

    #[serde(default)]
    pub heartbeat: HeartbeatSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySettings {
    /// Evaluation step budget per period; 0 disables the limit.
    pub max_steps: u64,
    /// Evaluate the periods of a batch in parallel.
    pub parallel: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSettings {
    /// Default merge window for `pulse heartbeat`.
    pub pulsetime_secs: f64,
    /// How long to wait for a bucket's heartbeat lock. Unset waits forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("pulse.db"),
            query: QuerySettings::default(),
            heartbeat: HeartbeatSettings::default(),
        }
    }
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            parallel: true,
        }
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            pulsetime_secs: 60.0,
            lock_timeout_ms: None,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    ///
    /// Later sources override earlier ones: defaults, the user config file,
    /// `config_path`, then `PULSE_*` environment variables (`__` separates
    /// nested keys, e.g. `PULSE_QUERY__MAX_STEPS`).
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

        figment = figment.merge(Env::prefixed("PULSE_").split("__"));

        figment.extract()
    }

    pub const fn query_config(&self) -> QueryConfig {
        QueryConfig {
            max_steps: match self.query.max_steps {
                0 => None,
                n => Some(n),
            },
            parallel: self.query.parallel,
        }
    }

    pub fn coalescer_config(&self) -> CoalescerConfig {
        CoalescerConfig {
            lock_timeout: self.heartbeat.lock_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Returns the platform-specific config directory for pulse.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("pulse"))
}

/// Returns the platform-specific data directory for pulse.
///
/// On Linux: `~/.local/share/pulse`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("pulse"))
}
