//! ClinicPulse Configuration
//!
//! Configuration structures with serde defaults on every field, so a partial
//! (or empty) YAML file is always a valid configuration.

use crate::cache::CacheKey;
use crate::emergency::DEFAULT_ALERT_CAPACITY;
use crate::error::ClinicPulseError;
use crate::notifications::DEFAULT_NOTIFICATION_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default messaging endpoint (scheme + authority)
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080";
/// Default WebSocket path of the STOMP endpoint
pub const DEFAULT_WS_PATH: &str = "/ws";
/// Fixed delay between reconnect attempts (milliseconds)
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;
/// Time allowed for CONNECT → CONNECTED (milliseconds)
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10000;
/// Advertised STOMP heart-beat intervals (milliseconds)
pub const DEFAULT_HEARTBEAT_MS: u64 = 10000;

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_clinicpulse_dir() -> PathBuf {
    home_dir().join(".clinicpulse")
}

// ============================================================================
// Main Config
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Live connection settings
    #[serde(default)]
    pub live: LiveConfig,
    /// Notification log settings
    #[serde(default)]
    pub notifications: NotificationConfig,
    /// Read-cache coordination
    #[serde(default)]
    pub cache: CacheConfig,
}

// ============================================================================
// Live Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Messaging endpoint, e.g. "ws://localhost:8080" or "wss://portal.example"
    #[serde(default = "LiveConfig::default_endpoint")]
    pub endpoint: String,
    /// WebSocket path appended to the endpoint
    #[serde(default = "LiveConfig::default_ws_path")]
    pub ws_path: String,
    #[serde(default = "LiveConfig::default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "LiveConfig::default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// How often we promise to send heart-beats (0 = never)
    #[serde(default = "LiveConfig::default_heartbeat_ms")]
    pub heartbeat_outgoing_ms: u64,
    /// How often we want the server's heart-beats (0 = never)
    #[serde(default = "LiveConfig::default_heartbeat_ms")]
    pub heartbeat_incoming_ms: u64,
}

impl LiveConfig {
    fn default_endpoint() -> String {
        DEFAULT_ENDPOINT.to_string()
    }
    fn default_ws_path() -> String {
        DEFAULT_WS_PATH.to_string()
    }
    fn default_reconnect_delay_ms() -> u64 {
        DEFAULT_RECONNECT_DELAY_MS
    }
    fn default_handshake_timeout_ms() -> u64 {
        DEFAULT_HANDSHAKE_TIMEOUT_MS
    }
    fn default_heartbeat_ms() -> u64 {
        DEFAULT_HEARTBEAT_MS
    }

    /// Full WebSocket URL of the STOMP endpoint
    pub fn url(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        if self.ws_path.is_empty() {
            endpoint.to_string()
        } else if self.ws_path.starts_with('/') {
            format!("{}{}", endpoint, self.ws_path)
        } else {
            format!("{}/{}", endpoint, self.ws_path)
        }
    }

    /// Host name sent in the STOMP CONNECT frame
    pub fn host(&self) -> String {
        let without_scheme = self
            .endpoint
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.endpoint);
        let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
        match authority.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host.to_string(),
            _ => authority.to_string(),
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            ws_path: DEFAULT_WS_PATH.to_string(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            heartbeat_outgoing_ms: DEFAULT_HEARTBEAT_MS,
            heartbeat_incoming_ms: DEFAULT_HEARTBEAT_MS,
        }
    }
}

// ============================================================================
// Notification Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Maximum retained notifications; oldest are evicted first
    #[serde(default = "NotificationConfig::default_capacity")]
    pub capacity: usize,
    /// Directory of the client-local key-value store
    #[serde(default = "NotificationConfig::default_store_dir")]
    pub store_dir: PathBuf,
    /// Maximum unacknowledged emergency alerts kept on screen
    #[serde(default = "NotificationConfig::default_alert_capacity")]
    pub alert_capacity: usize,
}

impl NotificationConfig {
    fn default_capacity() -> usize {
        DEFAULT_NOTIFICATION_CAPACITY
    }
    fn default_store_dir() -> PathBuf {
        default_clinicpulse_dir().join("store")
    }
    fn default_alert_capacity() -> usize {
        DEFAULT_ALERT_CAPACITY
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_NOTIFICATION_CAPACITY,
            store_dir: Self::default_store_dir(),
            alert_capacity: DEFAULT_ALERT_CAPACITY,
        }
    }
}

// ============================================================================
// Cache Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Aggregate keys refetched (marked stale) whenever a notification arrives
    #[serde(default = "CacheConfig::default_stale_on_notification")]
    pub stale_on_notification: Vec<CacheKey>,
}

impl CacheConfig {
    fn default_stale_on_notification() -> Vec<CacheKey> {
        vec![
            CacheKey::upcoming_appointments(),
            CacheKey::todays_appointments(),
        ]
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_on_notification: Self::default_stale_on_notification(),
        }
    }
}

// ============================================================================
// Config Loading and Validation
// ============================================================================

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from `path` or the first default location that exists
    pub fn load(path: Option<&str>) -> Result<Config, ClinicPulseError> {
        let config_path = Self::resolve_config_path(path)?;
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ClinicPulseError::config_parse_error(format!("Failed to read: {}", e)))?;
        let config = Self::parse(&content)?;
        ConfigValidator::validate(&config)?;
        tracing::debug!("Loaded configuration from {:?}", config_path);
        Ok(config)
    }

    /// Load configuration, falling back to defaults when no file exists
    pub fn load_or_default(path: Option<&str>) -> Result<Config, ClinicPulseError> {
        match Self::load(path) {
            Err(ClinicPulseError::Domain(crate::error::DomainError::ConfigNotFound { .. }))
                if path.is_none() =>
            {
                tracing::debug!("No configuration file found, using defaults");
                Ok(Config::default())
            }
            other => other,
        }
    }

    pub fn parse(content: &str) -> Result<Config, ClinicPulseError> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yml::from_str(content)
            .map_err(|e| ClinicPulseError::config_parse_error(format!("Failed to parse: {}", e)))
    }

    fn resolve_config_path(path: Option<&str>) -> Result<PathBuf, ClinicPulseError> {
        if let Some(p) = path {
            let p = PathBuf::from(p);
            if !p.exists() {
                return Err(ClinicPulseError::config_not_found(p.display().to_string()));
            }
            return Ok(p);
        }

        let default_paths = [
            default_clinicpulse_dir().join("config.yaml"),
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("clinicpulse.yaml"),
            PathBuf::from("./clinicpulse.yaml"),
        ];

        default_paths
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| {
                ClinicPulseError::config_not_found(
                    "Config not found. Run `clinicpulse config-sample` or create ~/.clinicpulse/config.yaml",
                )
            })
    }
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> Result<(), ClinicPulseError> {
        let endpoint = config.live.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ClinicPulseError::config_invalid(
                "live.endpoint",
                "Endpoint cannot be empty",
            ));
        }
        if !endpoint.starts_with("ws://") && !endpoint.starts_with("wss://") {
            return Err(ClinicPulseError::config_invalid(
                "live.endpoint",
                format!("Endpoint '{}' must use ws:// or wss://", endpoint),
            ));
        }
        if config.live.reconnect_delay_ms == 0 {
            return Err(ClinicPulseError::config_invalid(
                "live.reconnect_delay_ms",
                "Reconnect delay must be greater than zero",
            ));
        }
        if config.live.handshake_timeout_ms == 0 {
            return Err(ClinicPulseError::config_invalid(
                "live.handshake_timeout_ms",
                "Handshake timeout must be greater than zero",
            ));
        }
        if config.notifications.capacity == 0 {
            return Err(ClinicPulseError::config_invalid(
                "notifications.capacity",
                "Capacity must be greater than zero",
            ));
        }
        if config.notifications.alert_capacity == 0 {
            return Err(ClinicPulseError::config_invalid(
                "notifications.alert_capacity",
                "Alert capacity must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn load(path: Option<&str>) -> Result<Self, ClinicPulseError> {
        ConfigLoader::load_or_default(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ClinicPulseError> {
        let content = serde_yml::to_string(self).map_err(|e| {
            ClinicPulseError::config_parse_error(format!("Serialization failed: {}", e))
        })?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Sample configuration with every section filled in
    pub fn sample() -> Self {
        Config {
            live: LiveConfig {
                endpoint: "wss://clinic.example.com".to_string(),
                ..LiveConfig::default()
            },
            notifications: NotificationConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}
