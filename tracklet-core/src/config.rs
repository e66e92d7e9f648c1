//! Configuration loading and management
//!
//! The SDK is configured programmatically by the host application, or from
//! `~/.config/tracklet/config.toml` when embedded in a CLI. Paths follow
//! the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/tracklet/` (~/.config/tracklet/)
//! - Data: `$XDG_DATA_HOME/tracklet/` (~/.local/share/tracklet/)
//! - State/Logs: `$XDG_STATE_HOME/tracklet/` (~/.local/state/tracklet/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// When events are delivered relative to when they are recorded.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SendMode {
    /// Deliver each event as it is recorded.
    #[default]
    Immediate,
    /// Buffer locally and deliver on a timer and at teardown.
    Batch,
}

/// SDK configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Configuration {
    /// Application id reported with every event
    pub app_id: String,

    /// Collection endpoint URL
    pub endpoint: String,

    /// Immediate or batch delivery
    #[serde(default)]
    pub send_mode: SendMode,

    /// Batch mode flush interval in milliseconds
    #[serde(default = "default_send_events_interval_ms")]
    pub send_events_interval_ms: u64,

    /// Gap after which a paused session is superseded, in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Auth cookie sent with delivery requests
    #[serde(default)]
    pub auth_cookie: Option<String>,

    /// Log every recorded event at debug level
    #[serde(default)]
    pub is_log_events: bool,

    /// Record the `_app_start` preset event on foreground transitions
    #[serde(default = "default_true")]
    pub is_track_app_start_events: bool,

    /// Record the `_app_end` preset event on background transitions
    #[serde(default = "default_true")]
    pub is_track_app_end_events: bool,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Configuration {
    pub fn new(app_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Configuration {
            app_id: app_id.into(),
            endpoint: endpoint.into(),
            send_mode: SendMode::default(),
            send_events_interval_ms: default_send_events_interval_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            auth_cookie: None,
            is_log_events: false,
            is_track_app_start_events: true,
            is_track_app_end_events: true,
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Configuration =
            toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config path.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn validate(&self) -> Result<()> {
        if self.app_id.is_empty() {
            return Err(Error::Config("app_id is required".to_string()));
        }
        if self.endpoint.is_empty() {
            return Err(Error::Config("endpoint is required".to_string()));
        }
        Ok(())
    }

    pub fn send_events_interval(&self) -> Duration {
        Duration::from_millis(self.send_events_interval_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// Returns the config file path
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("tracklet").join("config.toml")
    }

    /// Returns the data directory (local event database)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("tracklet")
    }

    /// Returns the state directory (logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("tracklet")
    }
}

/// Runtime configuration update. Only the populated fields change; a send
/// mode or interval change tears down and rearms the flush scheduler.
#[derive(Debug, Default, Clone)]
pub struct ConfigUpdate {
    pub endpoint: Option<String>,
    pub send_mode: Option<SendMode>,
    pub send_events_interval_ms: Option<u64>,
    pub auth_cookie: Option<Option<String>>,
    pub is_log_events: Option<bool>,
    pub is_track_app_start_events: Option<bool>,
    pub is_track_app_end_events: Option<bool>,
}

impl ConfigUpdate {
    /// Apply this update to a configuration, returning whether the flush
    /// scheduler needs to be rearmed.
    pub fn apply(&self, config: &mut Configuration) -> bool {
        let mut rearm = false;
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(mode) = self.send_mode {
            rearm |= config.send_mode != mode;
            config.send_mode = mode;
        }
        if let Some(interval) = self.send_events_interval_ms {
            rearm |= config.send_events_interval_ms != interval;
            config.send_events_interval_ms = interval;
        }
        if let Some(cookie) = &self.auth_cookie {
            config.auth_cookie = cookie.clone();
        }
        if let Some(v) = self.is_log_events {
            config.is_log_events = v;
        }
        if let Some(v) = self.is_track_app_start_events {
            config.is_track_app_start_events = v;
        }
        if let Some(v) = self.is_track_app_end_events {
            config.is_track_app_end_events = v;
        }
        rearm
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log directory; defaults to the XDG state dir
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_send_events_interval_ms() -> u64 {
    5000
}

fn default_session_timeout_ms() -> u64 {
    1_800_000
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Configuration::new("testApp", "https://example.com/collect");
        assert_eq!(config.send_mode, SendMode::Immediate);
        assert_eq!(config.send_events_interval_ms, 5000);
        assert_eq!(config.session_timeout_ms, 1_800_000);
        assert!(config.is_track_app_start_events);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_fields() {
        let config = Configuration::new("", "https://example.com/collect");
        assert!(config.validate().is_err());
        let config = Configuration::new("testApp", "");
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_toml() {
        let config: Configuration = toml::from_str(
            r#"
            app_id = "testApp"
            endpoint = "https://example.com/collect"
            send_mode = "batch"
            send_events_interval_ms = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.send_mode, SendMode::Batch);
        assert_eq!(config.send_events_interval_ms, 1000);
        assert_eq!(config.session_timeout_ms, 1_800_000);
    }

    #[test]
    fn update_reports_scheduler_rearm() {
        let mut config = Configuration::new("testApp", "https://example.com/collect");
        let update = ConfigUpdate {
            is_log_events: Some(true),
            ..Default::default()
        };
        assert!(!update.apply(&mut config));
        assert!(config.is_log_events);

        let update = ConfigUpdate {
            send_mode: Some(SendMode::Batch),
            ..Default::default()
        };
        assert!(update.apply(&mut config));
        assert_eq!(config.send_mode, SendMode::Batch);
    }
}
