//! Configuration for the courier daemon.
//!
//! Loaded from `~/.courier/courier.toml`. Every field has a default, so an
//! empty file (or no file at all) is a valid configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CourierError;

/// Environment variable that overrides the courier home directory.
pub const HOME_ENV: &str = "COURIER_HOME";

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourierConfig {
    /// Watchdog polling settings.
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    /// Runner join/settle bounds.
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Control plane (Unix socket + optional HTTP) settings.
    #[serde(default)]
    pub control: ControlConfig,
    /// Discord endpoints and gateway intents.
    #[serde(default)]
    pub discord: DiscordSettings,
    /// Where the credential, destination and manual-stop flag are persisted.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            watchdog: WatchdogConfig::default(),
            runner: RunnerConfig::default(),
            control: ControlConfig::default(),
            discord: DiscordSettings::default(),
            state_path: default_state_path(),
        }
    }
}

impl CourierConfig {
    /// Parse a TOML configuration and validate it.
    pub fn from_toml(content: &str) -> Result<Self, CourierError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| CourierError::ConfigError(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, CourierError> {
        toml::to_string_pretty(self)
            .map_err(|e| CourierError::ConfigError(format!("failed to serialize config: {e}")))
    }

    /// Load the config at `path`, falling back to defaults if it does not exist.
    pub fn load_or_default(path: &std::path::Path) -> Result<Self, CourierError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(CourierError::ConfigError(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    fn validate(&self) -> Result<(), CourierError> {
        if self.watchdog.interval_secs == 0 {
            return Err(CourierError::ConfigError(
                "watchdog.interval_secs must be at least 1".into(),
            ));
        }
        if self.runner.join_timeout_secs == 0 {
            return Err(CourierError::ConfigError(
                "runner.join_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Watchdog polling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Seconds between health checks.
    #[serde(default = "default_watchdog_interval")]
    pub interval_secs: u64,
}

impl WatchdogConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_watchdog_interval(),
        }
    }
}

/// Bounds on how long lifecycle calls wait for the runner thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Maximum wait for an outgoing runner thread to exit before it is abandoned.
    #[serde(default = "default_join_timeout")]
    pub join_timeout_secs: u64,
    /// How long a manual Start waits for an immediate connect failure.
    #[serde(default = "default_settle")]
    pub settle_secs: u64,
}

impl RunnerConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            join_timeout_secs: default_join_timeout(),
            settle_secs: default_settle(),
        }
    }
}

/// Control plane settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Unix domain socket for the NDJSON control protocol.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    /// HTTP listen address for the JSON API (empty = disabled).
    #[serde(default)]
    pub http_listen: String,
    /// Bearer token required by the HTTP API (empty = no auth).
    #[serde(default)]
    pub api_key: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            http_listen: String::new(),
            api_key: String::new(),
        }
    }
}

/// Discord endpoints and gateway intents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscordSettings {
    /// REST API base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Gateway websocket URL (without query string).
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// Gateway intents bitfield.
    #[serde(default = "default_intents")]
    pub intents: u64,
}

impl Default for DiscordSettings {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            gateway_url: default_gateway_url(),
            intents: default_intents(),
        }
    }
}

fn default_watchdog_interval() -> u64 {
    30
}

fn default_join_timeout() -> u64 {
    5
}

fn default_settle() -> u64 {
    2
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_gateway_url() -> String {
    "wss://gateway.discord.gg".to_string()
}

/// GUILDS | DIRECT_MESSAGES | MESSAGE_CONTENT.
fn default_intents() -> u64 {
    (1 << 0) | (1 << 12) | (1 << 15)
}

fn default_socket_path() -> PathBuf {
    courier_dir().join("courier.sock")
}

fn default_state_path() -> PathBuf {
    courier_dir().join("state.json")
}

/// The courier home directory: `$COURIER_HOME`, else `~/.courier`.
pub fn courier_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".courier")
}

/// Default config file path.
pub fn config_path() -> PathBuf {
    courier_dir().join("courier.toml")
}

/// Default PID file path.
pub fn pid_path() -> PathBuf {
    courier_dir().join("courier.pid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = CourierConfig::from_toml("").unwrap();
        assert_eq!(config.watchdog.interval_secs, 30);
        assert_eq!(config.runner.join_timeout(), Duration::from_secs(5));
        assert_eq!(config.runner.settle(), Duration::from_secs(2));
        assert!(config.control.http_listen.is_empty());
        assert_eq!(config.discord.intents, 36865);
    }

    #[test]
    fn partial_sections_override_only_named_fields() {
        let config = CourierConfig::from_toml(
            r#"
            state_path = "/var/lib/courier/state.json"

            [watchdog]
            interval_secs = 10

            [control]
            http_listen = "127.0.0.1:8080"
            "#,
        )
        .unwrap();
        assert_eq!(config.watchdog.interval(), Duration::from_secs(10));
        assert_eq!(config.runner.settle_secs, 2);
        assert_eq!(config.control.http_listen, "127.0.0.1:8080");
        assert!(config.control.api_key.is_empty());
        assert_eq!(config.state_path, PathBuf::from("/var/lib/courier/state.json"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = CourierConfig::from_toml("[watchdog]\ninterval_secs = 0").unwrap_err();
        assert!(matches!(err, CourierError::ConfigError(_)));
    }

    #[test]
    fn toml_roundtrip_keeps_values() {
        let mut config = CourierConfig::default();
        config.control.api_key = "k".into();
        let text = config.to_toml().unwrap();
        assert_eq!(CourierConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CourierConfig::load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, CourierConfig::default());
    }
}
