//! Runtime context shared by the recorder and the delivery client

use serde::Deserialize;

use crate::config::Configuration;

/// Descriptive fields stamped onto every event. The host supplies them
/// (or accepts the environment-derived defaults); the SDK never inspects
/// them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub host_name: String,
    pub locale: String,
    pub system_language: String,
    pub country_code: String,
    /// Offset from UTC in milliseconds
    pub zone_offset: i32,
    pub make: String,
    pub user_agent: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self::detect()
    }
}

impl DeviceInfo {
    /// Best-effort detection from the process environment.
    pub fn detect() -> Self {
        let locale = std::env::var("LANG")
            .ok()
            .map(|l| l.split('.').next().unwrap_or("").to_string())
            .unwrap_or_default();
        let mut parts = locale.split('_');
        let system_language = parts.next().unwrap_or("").to_string();
        let country_code = parts.next().unwrap_or("").to_string();
        let zone_offset = chrono::Local::now().offset().local_minus_utc() * 1000;
        DeviceInfo {
            host_name: std::env::var("HOSTNAME").unwrap_or_default(),
            locale,
            system_language,
            country_code,
            zone_offset,
            make: std::env::consts::OS.to_string(),
            user_agent: String::new(),
        }
    }
}

/// The page or screen currently in view, for the reserved page
/// attributes.
#[derive(Debug, Clone)]
pub struct PageInfo {
    pub title: String,
    pub url: String,
}

/// Everything event construction and delivery need to know about the
/// running host: device descriptors, configuration, and the current user
/// identity. Owned behind a lock by the SDK facade; the recorder works on
/// cloned snapshots.
#[derive(Debug, Clone)]
pub struct Context {
    pub device: DeviceInfo,
    pub config: Configuration,
    pub user_unique_id: String,
    pub page: Option<PageInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_never_panics() {
        let device = DeviceInfo::detect();
        // locale handling tolerates unset or odd LANG values
        assert!(device.locale.is_empty() || !device.system_language.is_empty());
    }
}
