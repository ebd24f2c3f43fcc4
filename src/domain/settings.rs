use crate::domain::models::WriteMode;
use crate::domain::scheduler::TransmissionMode;
use crate::error::CoreError;
use crate::infrastructure::bluetooth::protocol;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "lazy_luggage".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Peripheral names
    #[serde(default = "default_controller_name")]
    pub controller_name: String,
    #[serde(default = "default_left_name")]
    pub left_beacon_name: String,
    #[serde(default = "default_right_name")]
    pub right_beacon_name: String,

    // Controller GATT layout
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,
    #[serde(default = "default_write_uuid")]
    pub ble_write_char_uuid: String,

    // Smoothing
    #[serde(default = "default_filter_period")]
    pub filter_period: usize,
    #[serde(default = "default_sentinel_fallback")]
    pub sentinel_fallback: i8,

    // Transmission
    #[serde(default = "default_transmission_mode")]
    pub transmission_mode: TransmissionMode,
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,
    #[serde(default = "default_write_mode")]
    pub write_mode: WriteMode,
    #[serde(default = "default_max_pending_writes")]
    pub max_pending_writes: usize,
    #[serde(default = "default_false")]
    pub subscribe_notifications: bool,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            controller_name: default_controller_name(),
            left_beacon_name: default_left_name(),
            right_beacon_name: default_right_name(),
            ble_service_uuid: default_service_uuid(),
            ble_write_char_uuid: default_write_uuid(),
            filter_period: default_filter_period(),
            sentinel_fallback: default_sentinel_fallback(),
            transmission_mode: default_transmission_mode(),
            send_interval_ms: default_send_interval_ms(),
            write_mode: default_write_mode(),
            max_pending_writes: default_max_pending_writes(),
            subscribe_notifications: false,
            log_settings: LogSettings::default(),
        }
    }
}

fn default_controller_name() -> String {
    "Arduino".to_string()
}
fn default_left_name() -> String {
    "BT05".to_string()
}
fn default_right_name() -> String {
    "?".to_string()
}
fn default_service_uuid() -> String {
    protocol::SERVICE_UUID.to_string()
}
fn default_write_uuid() -> String {
    protocol::WRITE_CHAR_UUID.to_string()
}
fn default_filter_period() -> usize {
    10
}
fn default_sentinel_fallback() -> i8 {
    -100
}
fn default_transmission_mode() -> TransmissionMode {
    TransmissionMode::TimerPaced
}
fn default_send_interval_ms() -> u64 {
    500
}
fn default_write_mode() -> WriteMode {
    WriteMode::WithResponse
}
fn default_max_pending_writes() -> usize {
    16
}

/// Validated, parsed form of [`Settings`] used by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub controller_name: String,
    pub left_beacon_name: String,
    pub right_beacon_name: String,
    pub service_uuid: Uuid,
    pub write_char_uuid: Uuid,
    pub filter_period: usize,
    pub sentinel_fallback: i8,
    pub transmission_mode: TransmissionMode,
    pub send_interval: Duration,
    pub write_mode: WriteMode,
    pub max_pending_writes: usize,
    pub subscribe_notifications: bool,
}

impl Settings {
    /// Check every value and resolve UUIDs. Nothing is clamped.
    pub fn tracker_config(&self) -> Result<TrackerConfig, CoreError> {
        if self.filter_period == 0 {
            return Err(CoreError::invalid("filter_period must be positive"));
        }
        if self.send_interval_ms == 0 {
            return Err(CoreError::invalid("send_interval_ms must be positive"));
        }
        if self.max_pending_writes == 0 {
            return Err(CoreError::invalid("max_pending_writes must be positive"));
        }
        if self.controller_name.is_empty() {
            return Err(CoreError::invalid("controller_name must not be empty"));
        }
        if self.controller_name == self.left_beacon_name
            || self.controller_name == self.right_beacon_name
        {
            return Err(CoreError::invalid(format!(
                "controller name {:?} is also a beacon name",
                self.controller_name
            )));
        }

        Ok(TrackerConfig {
            controller_name: self.controller_name.clone(),
            left_beacon_name: self.left_beacon_name.clone(),
            right_beacon_name: self.right_beacon_name.clone(),
            service_uuid: protocol::parse_uuid(&self.ble_service_uuid)?,
            write_char_uuid: protocol::parse_uuid(&self.ble_write_char_uuid)?,
            filter_period: self.filter_period,
            sentinel_fallback: self.sentinel_fallback,
            transmission_mode: self.transmission_mode,
            send_interval: Duration::from_millis(self.send_interval_ms),
            write_mode: self.write_mode,
            max_pending_writes: self.max_pending_writes,
            subscribe_notifications: self.subscribe_notifications,
        })
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the per-user config directory, writing defaults on first run.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Self::open(settings_path)
    }

    pub fn open(settings_path: PathBuf) -> anyhow::Result<Self> {
        let service = if settings_path.exists() {
            Self {
                settings: Self::load_from_file(&settings_path)?,
                settings_path,
            }
        } else {
            let service = Self {
                settings: Settings::default(),
                settings_path,
            };
            service.save()?;
            service
        };
        Ok(service)
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("LazyLuggage");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(dir) = self.settings_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
