use crate::domain::safety;
use crate::infrastructure::bluetooth::protocol;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
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
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
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
    "probe_rig".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub known_device_addresses: Vec<u64>,
    pub last_connected_address: Option<u64>,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Rig link settings
    #[serde(default = "default_command_uuid")]
    pub command_char_uuid: String,
    #[serde(default = "default_telemetry_uuid")]
    pub telemetry_char_uuid: String,
    #[serde(default = "default_scan_seconds")]
    pub scan_seconds: u64,

    // Acquisition settings
    #[serde(default = "default_max_force")]
    pub max_force_newtons: f64,
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            known_device_addresses: Vec::new(),
            last_connected_address: None,
            log_settings: LogSettings::default(),
            command_char_uuid: default_command_uuid(),
            telemetry_char_uuid: default_telemetry_uuid(),
            scan_seconds: default_scan_seconds(),
            max_force_newtons: default_max_force(),
            database_path: default_database_path(),
        }
    }
}

fn default_command_uuid() -> String {
    protocol::COMMAND_CHAR_UUID.to_string()
}
fn default_telemetry_uuid() -> String {
    protocol::TELEMETRY_CHAR_UUID.to_string()
}
fn default_scan_seconds() -> u64 {
    5
}
fn default_max_force() -> f64 {
    safety::DEFAULT_MAX_FORCE
}
fn default_database_path() -> String {
    "probe_readings.db".to_string()
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();

        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("ProbeRig");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Remembers the device so the next session can reconnect with
    /// `connect last`.
    pub fn record_connected_address(&mut self, address: u64) -> anyhow::Result<()> {
        self.settings.last_connected_address = Some(address);
        if !self.settings.known_device_addresses.contains(&address) {
            self.settings.known_device_addresses.push(address);
        }
        self.save()
    }
}
