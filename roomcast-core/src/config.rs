use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine-wide configuration.
///
/// Loaded from, in priority order: environment variables (`ROOMCAST_*`),
/// an optional config file, then these defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8866,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" or "pretty"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Tunables for the coordination engine itself.
///
/// These are not exposed over the wire; they govern tick cadences, reap
/// thresholds, and capacity limits described in the design.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name assigned to a connection whose referer carries no room segment.
    pub default_room: String,

    /// Capacity of a single owner's `AggregatableQueue`.
    pub queue_capacity: usize,

    /// Number of past usernames retained per client (tail is the active one).
    pub username_history_len: usize,

    /// Timer tick period. Fixed at 1s by the design; configurable for tests.
    pub timer_tick_secs: u64,

    /// How often the playback and stream reapers scan for idle state.
    pub reaper_interval_secs: u64,

    /// A playback/stream idle for at least this long is reaped.
    pub reap_age_secs: u64,

    /// How often the admin-picker loop runs per room.
    pub admin_picker_interval_secs: u64,

    /// Grace window after an admin departs before a new one may be elected.
    pub admin_grace_secs: u64,

    /// Cadence of the periodic `streamsync` broadcast while a stream is loaded.
    pub stream_sync_broadcast_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_room: "lobby".to_string(),
            queue_capacity: 20,
            username_history_len: 2,
            timer_tick_secs: 1,
            reaper_interval_secs: 60,
            reap_age_secs: 300,
            admin_picker_interval_secs: 60,
            admin_grace_secs: 180,
            stream_sync_broadcast_secs: 30,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn timer_tick(&self) -> Duration {
        Duration::from_secs(self.timer_tick_secs)
    }

    #[must_use]
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    #[must_use]
    pub fn reap_age(&self) -> Duration {
        Duration::from_secs(self.reap_age_secs)
    }

    #[must_use]
    pub fn admin_picker_interval(&self) -> Duration {
        Duration::from_secs(self.admin_picker_interval_secs)
    }

    #[must_use]
    pub fn admin_grace(&self) -> Duration {
        Duration::from_secs(self.admin_grace_secs)
    }
}

impl Config {
    /// Load configuration from environment and an optional file.
    ///
    /// Priority: environment variables (`ROOMCAST_*`, highest) > config
    /// file > defaults.
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, config::FileFormat::Yaml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("ROOMCAST")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = Config::default();
        assert!(config.server.port > 0);
        assert_eq!(config.engine.default_room, "lobby");
        assert_eq!(config.engine.queue_capacity, 20);
        assert_eq!(config.engine.timer_tick(), Duration::from_secs(1));
    }

    #[test]
    fn server_address_formats_host_and_port() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 9000,
        };
        assert_eq!(config.address(), "127.0.0.1:9000");
    }
}
