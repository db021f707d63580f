//! Application configuration
//!
//! Loaded from a TOML file, by default
//! `~/.config/charging-bridge/config.toml`. Every section and key is
//! optional; missing values fall back to [`Default`].
//!
//! ```toml
//! [mqtt]
//! host = "broker.local"
//! port = 1883
//! username = "bridge"
//! password = "secret"
//!
//! [commands]
//! start_charging_ms = 10000
//! emergency_stop_ms = 2000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::command::{DEFAULT_CHARGER, DEFAULT_POWER_KW};
use crate::domain::CommandKind;
use crate::support::ConfigError;

pub const APP_DIR_NAME: &str = "charging-bridge";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
        .join(CONFIG_FILE_NAME)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub commands: CommandConfig,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Empty means anonymous.
    pub username: String,
    pub password: String,
    pub keep_alive_secs: u64,
    /// 0, 1 or 2
    pub qos: u8,
    /// Capacity of the request channel between client handles and the event loop.
    pub channel_capacity: usize,
    pub clean_session: bool,
    /// Pause before polling the event loop again after a connection error.
    pub reconnect_delay_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: APP_DIR_NAME.to_string(),
            username: String::new(),
            password: String::new(),
            keep_alive_secs: 10,
            qos: 1,
            channel_capacity: 64,
            clean_session: false,
            reconnect_delay_ms: 2000,
        }
    }
}

impl MqttConfig {
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub api_host: String,
    pub api_port: u16,
    /// Seconds granted to background tasks after a shutdown signal.
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_host: "0.0.0.0".to_string(),
            api_port: 8080,
            shutdown_timeout: 10,
        }
    }
}

impl ServerConfig {
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error (or any `EnvFilter` directive)
    pub level: String,
    /// "pretty" or "json"
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

/// Per-command reply timeouts and start-charging defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub start_charging_ms: u64,
    pub stop_charging_ms: u64,
    pub get_status_ms: u64,
    pub heartbeat_ms: u64,
    pub set_power_ms: u64,
    pub emergency_stop_ms: u64,
    pub default_power_kw: f64,
    pub default_charger: String,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            start_charging_ms: 10_000,
            stop_charging_ms: 10_000,
            get_status_ms: 5_000,
            heartbeat_ms: 3_000,
            set_power_ms: 5_000,
            emergency_stop_ms: 2_000,
            default_power_kw: DEFAULT_POWER_KW,
            default_charger: DEFAULT_CHARGER.to_string(),
        }
    }
}

impl CommandConfig {
    pub fn timeout_for(&self, kind: CommandKind) -> Duration {
        let ms = match kind {
            CommandKind::StartCharging => self.start_charging_ms,
            CommandKind::StopCharging => self.stop_charging_ms,
            CommandKind::GetStatus => self.get_status_ms,
            CommandKind::Heartbeat => self.heartbeat_ms,
            CommandKind::SetPower => self.set_power_ms,
            CommandKind::EmergencyStop => self.emergency_stop_ms,
        };
        Duration::from_millis(ms)
    }

    fn all_timeouts(&self) -> [(&'static str, u64); 6] {
        [
            ("start_charging_ms", self.start_charging_ms),
            ("stop_charging_ms", self.stop_charging_ms),
            ("get_status_ms", self.get_status_ms),
            ("heartbeat_ms", self.heartbeat_ms),
            ("set_power_ms", self.set_power_ms),
            ("emergency_stop_ms", self.emergency_stop_ms),
        ]
    }
}

impl AppConfig {
    /// Read and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// `MQTT_USERNAME` / `MQTT_PASSWORD` replace the file credentials when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(username) = std::env::var("MQTT_USERNAME") {
            self.mqtt.username = username;
        }
        if let Ok(password) = std::env::var("MQTT_PASSWORD") {
            self.mqtt.password = password;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.host must not be empty".to_string()));
        }
        if self.mqtt.port == 0 {
            return Err(ConfigError::Invalid("mqtt.port must be non-zero".to_string()));
        }
        if self.mqtt.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "mqtt.client_id must not be empty".to_string(),
            ));
        }
        if self.mqtt.qos > 2 {
            return Err(ConfigError::Invalid(format!(
                "mqtt.qos must be 0, 1 or 2 (got {})",
                self.mqtt.qos
            )));
        }
        if self.mqtt.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "mqtt.channel_capacity must be non-zero".to_string(),
            ));
        }
        if self.server.api_port == 0 {
            return Err(ConfigError::Invalid("server.api_port must be non-zero".to_string()));
        }
        for (name, value) in self.commands.all_timeouts() {
            if value == 0 {
                return Err(ConfigError::Invalid(format!(
                    "commands.{} must be greater than zero",
                    name
                )));
            }
        }
        let power = self.commands.default_power_kw;
        if power.is_nan() || power <= 0.0 {
            return Err(ConfigError::Invalid(
                "commands.default_power_kw must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
