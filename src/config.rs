use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::devices::RetryPolicy;
use crate::idle::IdleSettings;
use crate::input::{Button, HoldAction, HoldBinding};

pub const DEFAULT_DEVICE_NAME: &str = "BabyPod";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub version: u32,
    pub base_url: Option<String>,
    pub auth_token: Option<String>,
    pub device_name: String,
    pub child_id: Option<u64>,
    pub request_timeout_secs: u64,
    pub backlight_dim_secs: u64,
    pub idle_warning_secs: u64,
    pub idle_shutdown_secs: Option<u64>,
    pub battery_refresh_secs: u64,
    pub motd_check_interval_secs: u64,
    pub rtc_refresh_interval_secs: u64,
    pub low_battery_percent: u8,
    pub hold_shutdown_secs: u64,
    pub hold_reset_secs: u64,
    pub hardware_retry_attempts: u32,
    pub hardware_retry_delay_ms: u64,
    pub start_offline: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            version: 1,
            base_url: None,
            auth_token: None,
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            child_id: None,
            request_timeout_secs: 10,
            backlight_dim_secs: 30,
            idle_warning_secs: 180,
            idle_shutdown_secs: None,
            battery_refresh_secs: 30,
            motd_check_interval_secs: 3_600,
            rtc_refresh_interval_secs: 86_400,
            low_battery_percent: 15,
            hold_shutdown_secs: 3,
            hold_reset_secs: 5,
            hardware_retry_attempts: 20,
            hardware_retry_delay_ms: 200,
            start_offline: false,
        }
    }
}

impl DeviceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.hardware_retry_attempts,
            delay: Duration::from_millis(self.hardware_retry_delay_ms),
        }
    }

    pub fn idle_settings(&self) -> IdleSettings {
        IdleSettings {
            backlight_dim: Duration::from_secs(self.backlight_dim_secs),
            idle_warning: Duration::from_secs(self.idle_warning_secs),
            battery_refresh: Duration::from_secs(self.battery_refresh_secs),
            idle_shutdown: self.idle_shutdown_secs.map(Duration::from_secs),
        }
    }

    /// Select held powers off, Down held resets.
    pub fn hold_bindings(&self) -> [HoldBinding; 2] {
        [
            HoldBinding {
                button: Button::Select,
                threshold: Duration::from_secs(self.hold_shutdown_secs),
                action: HoldAction::Shutdown,
            },
            HoldBinding {
                button: Button::Down,
                threshold: Duration::from_secs(self.hold_reset_secs),
                action: HoldAction::Reset,
            },
        ]
    }
}

pub fn load_device_config(path: &Path) -> Result<DeviceConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read device config {}", path.display()))?;
    parse_device_config_text(&content)
}

pub fn parse_device_config_text(content: &str) -> Result<DeviceConfig> {
    let config = serde_json::from_str::<DeviceConfig>(content).map_err(|err| {
        let line = err.line();
        let column = err.column();
        anyhow::anyhow!("invalid JSON at line {line}, column {column}: {err}")
    })?;

    if config.version != 1 {
        bail!(
            "unsupported device config version {}; expected version 1",
            config.version
        );
    }
    if config.device_name.trim().is_empty() {
        bail!("device_name must not be empty");
    }
    if let Some(base_url) = &config.base_url
        && !(base_url.starts_with("http://") || base_url.starts_with("https://"))
    {
        bail!("base_url '{base_url}' must start with http:// or https://");
    }
    if config.child_id == Some(0) {
        bail!("child_id must be > 0 when set");
    }
    if config.low_battery_percent > 100 {
        bail!("low_battery_percent must be between 0 and 100");
    }
    if config.hardware_retry_attempts == 0 {
        bail!("hardware_retry_attempts must be > 0");
    }

    let positive = [
        ("request_timeout_secs", config.request_timeout_secs),
        ("backlight_dim_secs", config.backlight_dim_secs),
        ("idle_warning_secs", config.idle_warning_secs),
        ("battery_refresh_secs", config.battery_refresh_secs),
        ("motd_check_interval_secs", config.motd_check_interval_secs),
        ("rtc_refresh_interval_secs", config.rtc_refresh_interval_secs),
        ("hold_shutdown_secs", config.hold_shutdown_secs),
        ("hold_reset_secs", config.hold_reset_secs),
    ];
    for (name, value) in positive {
        if value == 0 {
            bail!("{name} must be > 0");
        }
    }
    if config.idle_shutdown_secs == Some(0) {
        bail!("idle_shutdown_secs must be > 0 when set");
    }

    Ok(config)
}

pub fn save_device_config(path: &Path, config: &DeviceConfig) -> Result<()> {
    let text = serde_json::to_string_pretty(config)?;
    fs::write(path, format!("{text}\n"))
        .with_context(|| format!("unable to write device config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn empty_object_takes_every_default() {
        let config = parse_device_config_text("{}").expect("defaults");
        assert_eq!(config, DeviceConfig::default());
        assert_eq!(config.device_name, "BabyPod");
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.idle_settings().idle_shutdown, None);
    }

    #[test]
    fn partial_config_overrides_only_given_fields() {
        let config = parse_device_config_text(
            r#"{"version": 1, "base_url": "https://baby.example/api/", "child_id": 2, "idle_shutdown_secs": 900}"#,
        )
        .expect("config");
        assert_eq!(config.child_id, Some(2));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(
            config.idle_settings().idle_shutdown,
            Some(Duration::from_secs(900))
        );
    }

    #[test]
    fn invalid_json_reports_position() {
        let err = parse_device_config_text("{\n  \"version\": ,\n}").expect_err("invalid");
        assert!(err.to_string().contains("invalid JSON at line 2"));
    }

    #[test]
    fn rejects_unsupported_version_and_zero_intervals() {
        let err = parse_device_config_text(r#"{"version": 2}"#).expect_err("version");
        assert!(err.to_string().contains("unsupported device config version 2"));

        let err = parse_device_config_text(r#"{"request_timeout_secs": 0}"#).expect_err("timeout");
        assert!(err.to_string().contains("request_timeout_secs must be > 0"));

        let err = parse_device_config_text(r#"{"base_url": "baby.example"}"#).expect_err("url");
        assert!(err.to_string().contains("must start with http"));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("device.json");
        let config = DeviceConfig {
            base_url: Some("http://localhost:8000/api/".to_string()),
            device_name: "Nursery".to_string(),
            start_offline: true,
            ..DeviceConfig::default()
        };
        save_device_config(&path, &config).expect("save");
        assert_eq!(load_device_config(&path).expect("load"), config);
    }
}
