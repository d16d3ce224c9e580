//! Bridge configuration.
//!
//! Loaded from a TOML file. The two format switches under `[scanner]` are
//! deliberately required: whether a deployment broadcasts legacy format 6 or
//! extended advertisements is a property of its tag fleet, and guessing wrong
//! silently drops data.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ruuvi_core::{Device, ListenerOptions, MacKey, PublishMode, RetentionPolicy, parse_mac};

/// Bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// BLE scanner settings.
    pub scanner: ScannerConfig,
    /// Publishing settings.
    #[serde(default)]
    pub publish: PublishConfig,
    /// Delivery sink settings.
    #[serde(default)]
    pub sink: SinkConfig,
    /// Known devices.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration and collect every error at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.publish.validate());
        errors.extend(self.sink.validate());

        let mut seen = std::collections::HashSet::new();
        for (i, device) in self.devices.iter().enumerate() {
            let prefix = format!("devices[{i}]");
            errors.extend(device.validate(&prefix));

            if !device.mac.is_empty() && !seen.insert(MacKey::new(&device.mac)) {
                errors.push(ValidationError {
                    field: format!("{prefix}.mac"),
                    message: format!("duplicate device address '{}'", device.mac),
                });
            }
        }

        if self.scanner.known_devices_only && self.devices.is_empty() {
            errors.push(ValidationError {
                field: "scanner.known_devices_only".to_string(),
                message: "requires at least one [[devices]] entry".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Listener options derived from the scanner section.
    #[must_use]
    pub fn listener_options(&self) -> ListenerOptions {
        ListenerOptions::new(
            self.scanner.enable_data_format_6,
            self.scanner.enable_extended_formats,
        )
        .known_devices_only(self.scanner.known_devices_only)
    }

    /// Publish mode derived from the publish section.
    #[must_use]
    pub fn publish_mode(&self) -> PublishMode {
        if self.publish.batching {
            PublishMode::Batched {
                interval: Duration::from_secs(self.publish.interval_seconds),
                retention: self.publish.retention,
            }
        } else {
            PublishMode::Immediate
        }
    }

    /// The configured devices as registry entries.
    #[must_use]
    pub fn registry_devices(&self) -> Vec<Device> {
        self.devices
            .iter()
            .map(|d| Device {
                mac_address: d.mac.clone(),
                device_id: d.id.clone(),
                display_name: d.name.clone(),
            })
            .collect()
    }
}

/// BLE scanner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Accept Data Format 6 payloads. Required.
    pub enable_data_format_6: bool,
    /// Accept Extended V1 payloads. Required.
    ///
    /// When set, format 6 payloads are dropped as truncated duplicates even
    /// if `enable_data_format_6` is also set.
    pub enable_extended_formats: bool,
    /// Only publish samples from devices listed under `[[devices]]`.
    #[serde(default)]
    pub known_devices_only: bool,
    /// Index of the BLE adapter to use when the host has several.
    #[serde(default)]
    pub adapter_index: usize,
}

/// Publishing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Accumulate samples and flush on an interval instead of publishing
    /// each sample as it arrives.
    pub batching: bool,
    /// Seconds between flushes in batching mode.
    pub interval_seconds: u64,
    /// Per-device retention between flushes.
    pub retention: RetentionPolicy,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            batching: false,
            interval_seconds: 60,
            retention: RetentionPolicy::AllSamples,
        }
    }
}

/// Bounds for the batching interval.
pub const MIN_INTERVAL_SECONDS: u64 = 1;
/// One hour; longer windows lose too much on a crash.
pub const MAX_INTERVAL_SECONDS: u64 = 3600;

impl PublishConfig {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.batching && self.interval_seconds < MIN_INTERVAL_SECONDS {
            errors.push(ValidationError {
                field: "publish.interval_seconds".to_string(),
                message: format!(
                    "interval {} is too short (minimum {MIN_INTERVAL_SECONDS} seconds)",
                    self.interval_seconds
                ),
            });
        }
        if self.batching && self.interval_seconds > MAX_INTERVAL_SECONDS {
            errors.push(ValidationError {
                field: "publish.interval_seconds".to_string(),
                message: format!(
                    "interval {} is too long (maximum {MAX_INTERVAL_SECONDS} seconds / 1 hour)",
                    self.interval_seconds
                ),
            });
        }
        errors
    }
}

/// Delivery sink settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    /// Print samples as JSON lines to stdout.
    #[default]
    Console,
    /// Publish to an MQTT broker.
    Mqtt(MqttConfig),
    /// POST batches to an HTTP endpoint.
    Http(HttpConfig),
}

impl SinkConfig {
    fn validate(&self) -> Vec<ValidationError> {
        match self {
            SinkConfig::Console => Vec::new(),
            SinkConfig::Mqtt(mqtt) => mqtt.validate(),
            SinkConfig::Http(http) => http.validate(),
        }
    }
}

/// MQTT sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker URL (`mqtt://host:port` or `mqtts://host:port`).
    pub broker: String,
    /// MQTT client identifier.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Topic prefix; samples go to `{prefix}/{mac}`.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// QoS level (0, 1, or 2).
    #[serde(default = "default_qos")]
    pub qos: u8,
    /// Publish with the retain flag set.
    #[serde(default)]
    pub retain: bool,
    /// Broker username.
    #[serde(default)]
    pub username: Option<String>,
    /// Broker password.
    #[serde(default)]
    pub password: Option<String>,
    /// Keep-alive in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u64,
}

fn default_client_id() -> String {
    "ruuvi-bridge".to_string()
}

fn default_topic_prefix() -> String {
    "ruuvi".to_string()
}

fn default_qos() -> u8 {
    1
}

fn default_keep_alive() -> u64 {
    30
}

impl MqttConfig {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if let Err(message) = crate::sink::parse_broker_url(&self.broker) {
            errors.push(ValidationError {
                field: "sink.broker".to_string(),
                message,
            });
        }
        if self.qos > 2 {
            errors.push(ValidationError {
                field: "sink.qos".to_string(),
                message: format!("QoS {} is invalid: must be 0, 1 or 2", self.qos),
            });
        }
        if self.topic_prefix.is_empty() {
            errors.push(ValidationError {
                field: "sink.topic_prefix".to_string(),
                message: "topic prefix cannot be empty".to_string(),
            });
        }
        errors
    }
}

/// HTTP sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Endpoint batches are POSTed to as JSON arrays.
    pub url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,
    /// Bearer token attached to every request.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

fn default_http_timeout() -> u64 {
    10
}

impl HttpConfig {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            errors.push(ValidationError {
                field: "sink.url".to_string(),
                message: format!("invalid URL '{}': must start with http:// or https://", self.url),
            });
        }
        if self.timeout_seconds == 0 {
            errors.push(ValidationError {
                field: "sink.timeout_seconds".to_string(),
                message: "timeout cannot be 0".to_string(),
            });
        }
        errors
    }
}

/// A known device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device MAC address.
    pub mac: String,
    /// Stable identifier forwarded to downstream consumers.
    #[serde(default)]
    pub id: Option<String>,
    /// Friendly display name.
    #[serde(default)]
    pub name: Option<String>,
}

impl DeviceConfig {
    fn validate(&self, prefix: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.mac.is_empty() {
            errors.push(ValidationError {
                field: format!("{prefix}.mac"),
                message: "device address cannot be empty".to_string(),
            });
        } else if parse_mac(&self.mac).is_err() {
            errors.push(ValidationError {
                field: format!("{prefix}.mac"),
                message: format!("'{}' is not a valid MAC address", self.mac),
            });
        }
        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g. `publish.interval_seconds` or `devices[0].mac`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ruuvi-bridge")
        .join("bridge.toml")
}
