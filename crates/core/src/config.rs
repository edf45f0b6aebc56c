//! Configuration management for Vetline.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then environment variable overrides. The result is validated before the
//! service starts.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the TOML configuration file
pub const CONFIG_PATH_ENV: &str = "VETLINE_CONFIG";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    EnvError { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Config(err.to_string())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub maps: MapsConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Candidate search radius in meters
    #[serde(default = "default_search_radius_m")]
    pub search_radius_m: f64,
    /// Maximum number of candidates alerted per case
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// Fallback travel estimate when no routing provider answers
    #[serde(default = "default_eta_minutes_per_km")]
    pub eta_minutes_per_km: f64,
    /// Grid cell size for the in-memory responder index, in degrees
    #[serde(default = "default_grid_cell_deg")]
    pub grid_cell_deg: f64,
}

/// One fixed-window rate-limit policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    pub window_secs: u64,
    pub max_requests: u32,
    pub message: String,
}

/// Where rate-limit counters live
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitBackendKind {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub backend: RateLimitBackendKind,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_distress_call_policy")]
    pub distress_call: PolicyConfig,
    #[serde(default = "default_ai_assist_policy")]
    pub ai_assist: PolicyConfig,
    #[serde(default = "default_general_policy")]
    pub general: PolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Shared Redis used for cross-instance fan-out, presence and rate limits
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_fanout_channel")]
    pub fanout_channel: String,
    #[serde(default = "default_presence_ttl_secs")]
    pub presence_ttl_secs: u64,
    /// Per-connection outbound buffer; deliveries beyond it are dropped
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapsConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_maps_endpoint")]
    pub distance_matrix_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_store_timeout_ms")]
    pub store_ms: u64,
    #[serde(default = "default_distance_timeout_ms")]
    pub distance_ms: u64,
    #[serde(default = "default_notify_timeout_ms")]
    pub notify_ms: u64,
}

impl TimeoutConfig {
    pub fn store(&self) -> Duration {
        Duration::from_millis(self.store_ms)
    }

    pub fn distance(&self) -> Duration {
        Duration::from_millis(self.distance_ms)
    }

    pub fn notify(&self) -> Duration {
        Duration::from_millis(self.notify_ms)
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_ws_port() -> u16 {
    5001
}

fn default_database_path() -> String {
    "data/vetline.db".to_string()
}

fn default_search_radius_m() -> f64 {
    50_000.0
}

fn default_max_candidates() -> usize {
    20
}

fn default_eta_minutes_per_km() -> f64 {
    2.0
}

fn default_grid_cell_deg() -> f64 {
    0.5
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_distress_call_policy() -> PolicyConfig {
    PolicyConfig {
        window_secs: 60,
        max_requests: 3,
        message: "Too many distress calls. Please wait before creating another.".to_string(),
    }
}

fn default_ai_assist_policy() -> PolicyConfig {
    PolicyConfig {
        window_secs: 60,
        max_requests: 10,
        message: "AI rate limit exceeded. Please wait.".to_string(),
    }
}

fn default_general_policy() -> PolicyConfig {
    PolicyConfig {
        window_secs: 15 * 60,
        max_requests: 100,
        message: "Too many requests, please try again later.".to_string(),
    }
}

fn default_fanout_channel() -> String {
    "vetline:events".to_string()
}

fn default_presence_ttl_secs() -> u64 {
    120
}

fn default_channel_capacity() -> usize {
    64
}

fn default_maps_endpoint() -> String {
    "https://maps.googleapis.com/maps/api/distancematrix/json".to_string()
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_distance_timeout_ms() -> u64 {
    3_000
}

fn default_notify_timeout_ms() -> u64 {
    2_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            ws_port: default_ws_port(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            search_radius_m: default_search_radius_m(),
            max_candidates: default_max_candidates(),
            eta_minutes_per_km: default_eta_minutes_per_km(),
            grid_cell_deg: default_grid_cell_deg(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: RateLimitBackendKind::default(),
            sweep_interval_secs: default_sweep_interval_secs(),
            distress_call: default_distress_call_policy(),
            ai_assist: default_ai_assist_policy(),
            general: default_general_policy(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            fanout_channel: default_fanout_channel(),
            presence_ttl_secs: default_presence_ttl_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for MapsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            distance_matrix_url: default_maps_endpoint(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            store_ms: default_store_timeout_ms(),
            distance_ms: default_distance_timeout_ms(),
            notify_ms: default_notify_timeout_ms(),
        }
    }
}

impl Config {
    /// Parse a TOML configuration file. Missing sections take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Full layered load: file (if any), then process environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match std::env::var(CONFIG_PATH_ENV) {
                Ok(path) => Self::from_file(path)?,
                Err(_) => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("PORT") {
            self.server.port = parse_env("PORT", &value)?;
        }
        if let Some(value) = lookup("WS_PORT") {
            self.server.ws_port = parse_env("WS_PORT", &value)?;
        }
        if let Some(value) = lookup("DATABASE_PATH") {
            self.store.database_path = value;
        }
        if let Some(value) = lookup("REDIS_URL") {
            self.notify.redis_url = Some(value);
        }
        if let Some(value) = lookup("MAPS_API_KEY") {
            self.maps.api_key = Some(value);
        }
        if let Some(value) = lookup("LOG_FORMAT") {
            self.log_format = match value.as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                _ => {
                    return Err(ConfigError::EnvError {
                        key: "LOG_FORMAT".to_string(),
                        value,
                    })
                }
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.dispatch.search_radius_m.is_finite() && self.dispatch.search_radius_m > 0.0) {
            return Err(ConfigError::ValidationError(
                "dispatch.search_radius_m must be positive".to_string(),
            ));
        }
        if self.dispatch.max_candidates == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.max_candidates must be at least 1".to_string(),
            ));
        }
        if !(self.dispatch.grid_cell_deg > 0.0 && self.dispatch.grid_cell_deg <= 10.0) {
            return Err(ConfigError::ValidationError(
                "dispatch.grid_cell_deg must be in (0, 10]".to_string(),
            ));
        }
        for (name, policy) in [
            ("distress_call", &self.rate_limit.distress_call),
            ("ai_assist", &self.rate_limit.ai_assist),
            ("general", &self.rate_limit.general),
        ] {
            if policy.window_secs == 0 || policy.max_requests == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "rate_limit.{} needs a non-zero window and limit",
                    name
                )));
            }
        }
        if self.rate_limit.backend == RateLimitBackendKind::Redis && self.notify.redis_url.is_none()
        {
            return Err(ConfigError::ValidationError(
                "rate_limit.backend = \"redis\" requires notify.redis_url".to_string(),
            ));
        }
        if self.notify.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "notify.channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::EnvError {
        key: key.to_string(),
        value: value.to_string(),
    })
}
