//! Configuration management for the shelf scanning service.

use config::{ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the shelf scanning service.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service-level settings (name, logging, metrics)
    #[serde(default)]
    pub service: ServiceConfig,

    /// Media intake and frame sampling settings
    #[serde(default)]
    pub media: MediaConfig,

    /// Vision inference provider settings
    pub vision: VisionConfig,

    /// Inventory database settings
    pub database: DatabaseConfig,

    /// HTTP API settings
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging and metrics
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Port for the Prometheus metrics endpoint
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Media intake and frame sampling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    /// Path to the ffmpeg binary used for frame extraction
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Maximum number of frames kept per scan
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,

    /// Wall-clock timeout for one extraction run in seconds
    #[serde(default = "default_extract_timeout_secs")]
    pub extract_timeout_secs: u64,

    /// Maximum concurrent ffmpeg processes across all scans
    #[serde(default = "default_extract_concurrency")]
    pub extract_concurrency: usize,

    /// Maximum concurrent frame decodes while building a collage
    #[serde(default = "default_decode_concurrency")]
    pub decode_concurrency: usize,

    /// Scratch directory for scan workspaces (system temp dir when unset)
    #[serde(default)]
    pub work_dir: Option<String>,
}

/// Vision inference configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    /// Primary provider, always tried first
    pub primary: ProviderConfig,

    /// Optional fallback provider, tried once when the primary fails
    #[serde(default)]
    pub fallback: Option<ProviderConfig>,

    /// Per-request timeout in seconds for provider calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// A single vision provider's credentials and model selection.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Provider API family
    pub kind: ProviderKind,

    /// API key for the provider
    pub api_key: String,

    /// Model name; empty selects the provider's default model
    #[serde(default)]
    pub model: String,

    /// Override for the provider's API base URL
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Supported vision provider API families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Openai,
    Gemini,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// HTTP API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,

    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (empty list allows any origin)
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Sources are layered; later sources override earlier ones:
    /// 1. Default config file (config/default.toml)
    /// 2. Environment-specific config (config/{RUN_MODE}.toml)
    /// 3. Environment variables prefixed with SHELFSCAN, e.g.
    ///    SHELFSCAN__VISION__PRIMARY__API_KEY
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::with_prefix("SHELFSCAN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration before startup.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingField("database.url".to_string()));
        }

        if self.vision.primary.api_key.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "vision.primary.api_key".to_string(),
            ));
        }

        if let Some(fallback) = &self.vision.fallback {
            if fallback.api_key.is_empty() {
                return Err(ConfigValidationError::MissingField(
                    "vision.fallback.api_key".to_string(),
                ));
            }
        }

        if self.vision.request_timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "vision.request_timeout_secs".to_string(),
                message: "Timeout must be greater than 0".to_string(),
            });
        }

        if self.media.ffmpeg_path.is_empty() {
            return Err(ConfigValidationError::MissingField("media.ffmpeg_path".to_string()));
        }

        if self.media.max_frames == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "media.max_frames".to_string(),
                message: "Frame cap must be greater than 0".to_string(),
            });
        }

        if self.media.extract_concurrency == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "media.extract_concurrency".to_string(),
                message: "Concurrency limit must be greater than 0".to_string(),
            });
        }

        if self.media.decode_concurrency == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "media.decode_concurrency".to_string(),
                message: "Concurrency limit must be greater than 0".to_string(),
            });
        }

        if self.api.max_upload_bytes == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "api.max_upload_bytes".to_string(),
                message: "Upload size limit must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl MediaConfig {
    /// Get the extraction timeout as a Duration.
    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }
}

impl VisionConfig {
    /// Get the provider request timeout as a Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl DatabaseConfig {
    /// Get the connection timeout as a Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get the idle timeout as a Duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            max_frames: default_max_frames(),
            extract_timeout_secs: default_extract_timeout_secs(),
            extract_concurrency: default_extract_concurrency(),
            decode_concurrency: default_decode_concurrency(),
            work_dir: None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

// Default value functions

fn default_service_name() -> String {
    "shelfscan".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_max_frames() -> usize {
    20
}

fn default_extract_timeout_secs() -> u64 {
    120
}

fn default_extract_concurrency() -> usize {
    2
}

fn default_decode_concurrency() -> usize {
    4
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    100 * 1024 * 1024
}
