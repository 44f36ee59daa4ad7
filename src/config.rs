//! Configuration loading and management.
//!
//! Supports TOML configuration files with environment variable overrides.
//! Environment variables follow the pattern `PROXIMITY_PUSH_<SECTION>__<KEY>`,
//! for example `PROXIMITY_PUSH_FCM__PROJECT_ID`.

use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::push::payload::{
    DEFAULT_ANDROID_CHANNEL_ID, DEFAULT_CLICK_ACTION, DEFAULT_WEB_BADGE, DEFAULT_WEB_ICON,
    DEFAULT_WEB_LINK,
};

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "PROXIMITY_PUSH";

/// Default search radius for proximity events.
pub const DEFAULT_RADIUS_KM: f64 = 10.0;

/// Per-call batch limit of the reference transport.
pub const DEFAULT_BATCH_LIMIT: usize = 500;

/// Default per-recipient request concurrency inside one batch.
pub const DEFAULT_MAX_CONCURRENCY: usize = 20;

/// Default hard cap on the degraded "scan everyone" candidate set.
pub const DEFAULT_FALLBACK_CANDIDATE_CAP: usize = 5_000;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration.
    pub server: ServerConfig,

    /// Dispatch engine tuning.
    pub dispatch: DispatchConfig,

    /// FCM transport configuration.
    pub fcm: FcmConfig,

    /// Wire payload decoration constants.
    #[serde(default)]
    pub payload: PayloadConfig,

    /// User/location directory configuration.
    pub directory: DirectoryConfig,

    /// Metrics configuration.
    pub metrics: MetricsConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the trigger and health endpoints.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_timeout() -> u64 {
    10
}

impl ServerConfig {
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Dispatch engine tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Radius for proximity events, in kilometers.
    #[serde(default = "default_radius_km")]
    pub radius_km: f64,

    /// Maximum tokens per provider batch call.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    /// Maximum concurrent per-recipient requests inside one batch.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Maximum provider batch calls in flight for one dispatch.
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,

    /// Deadline for one dispatch call, in seconds.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    /// Hard cap on candidates returned by the degraded directory scan.
    #[serde(default = "default_fallback_candidate_cap")]
    pub fallback_candidate_cap: usize,

    /// Application name used in founder broadcast titles.
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

fn default_radius_km() -> f64 {
    DEFAULT_RADIUS_KM
}

fn default_batch_limit() -> usize {
    DEFAULT_BATCH_LIMIT
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_max_concurrent_batches() -> usize {
    4
}

fn default_deadline_secs() -> u64 {
    30
}

fn default_fallback_candidate_cap() -> usize {
    DEFAULT_FALLBACK_CANDIDATE_CAP
}

fn default_app_name() -> String {
    "Meetup".to_string()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            radius_km: default_radius_km(),
            batch_limit: default_batch_limit(),
            max_concurrency: default_max_concurrency(),
            max_concurrent_batches: default_max_concurrent_batches(),
            deadline_secs: default_deadline_secs(),
            fallback_candidate_cap: default_fallback_candidate_cap(),
            app_name: default_app_name(),
        }
    }
}

impl DispatchConfig {
    #[must_use]
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

/// FCM push transport configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FcmConfig {
    /// Whether FCM is enabled.
    #[serde(default)]
    pub enabled: bool,

    /// Path to the service account JSON file.
    #[serde(default)]
    pub service_account_path: String,

    /// FCM project ID (falls back to the service account's).
    #[serde(default)]
    pub project_id: String,

    /// Base URL of the FCM HTTP v1 API.
    #[serde(default = "default_fcm_api_base_url")]
    pub api_base_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_fcm_request_timeout")]
    pub request_timeout_secs: u64,

    /// Transport retries for 429/5xx responses.
    #[serde(default = "default_fcm_max_retries")]
    pub max_retries: u32,
}

fn default_fcm_api_base_url() -> String {
    "https://fcm.googleapis.com".to_string()
}

fn default_fcm_request_timeout() -> u64 {
    30
}

fn default_fcm_max_retries() -> u32 {
    2
}

/// Constants stamped into platform-specific payload blocks.
#[derive(Debug, Clone, Deserialize)]
pub struct PayloadConfig {
    #[serde(default = "default_android_channel_id")]
    pub android_channel_id: String,

    #[serde(default = "default_click_action")]
    pub click_action: String,

    #[serde(default = "default_web_icon")]
    pub web_icon: String,

    #[serde(default = "default_web_badge")]
    pub web_badge: String,

    #[serde(default = "default_web_link")]
    pub web_link: String,
}

fn default_android_channel_id() -> String {
    DEFAULT_ANDROID_CHANNEL_ID.to_string()
}

fn default_click_action() -> String {
    DEFAULT_CLICK_ACTION.to_string()
}

fn default_web_icon() -> String {
    DEFAULT_WEB_ICON.to_string()
}

fn default_web_badge() -> String {
    DEFAULT_WEB_BADGE.to_string()
}

fn default_web_link() -> String {
    DEFAULT_WEB_LINK.to_string()
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            android_channel_id: default_android_channel_id(),
            click_action: default_click_action(),
            web_icon: default_web_icon(),
            web_badge: default_web_badge(),
            web_link: default_web_link(),
        }
    }
}

/// User/location directory configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    /// Path to a JSON snapshot of users and activities. Empty means an empty
    /// directory.
    #[serde(default)]
    pub snapshot_path: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

fn default_metrics_enabled() -> bool {
    true
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error", "off".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json", "pretty" or "compact".
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn with_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> std::result::Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("server.bind_address", default_bind_address())?
        .set_default("server.shutdown_timeout_secs", 10)?
        .set_default("dispatch.radius_km", DEFAULT_RADIUS_KM)?
        .set_default("dispatch.batch_limit", DEFAULT_BATCH_LIMIT as i64)?
        .set_default("dispatch.max_concurrency", DEFAULT_MAX_CONCURRENCY as i64)?
        .set_default("dispatch.max_concurrent_batches", 4)?
        .set_default("dispatch.deadline_secs", 30)?
        .set_default(
            "dispatch.fallback_candidate_cap",
            DEFAULT_FALLBACK_CANDIDATE_CAP as i64,
        )?
        .set_default("dispatch.app_name", default_app_name())?
        .set_default("fcm.enabled", false)?
        .set_default("fcm.service_account_path", "")?
        .set_default("fcm.project_id", "")?
        .set_default("fcm.api_base_url", default_fcm_api_base_url())?
        .set_default("fcm.request_timeout_secs", 30)?
        .set_default("fcm.max_retries", 2)?
        .set_default("directory.snapshot_path", "")?
        .set_default("metrics.enabled", true)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "json")
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl AppConfig {
    /// Load configuration from a file path with environment variable overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = with_defaults(Config::builder())?
            .add_source(File::from(path.as_ref()))
            .add_source(environment())
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only (no config file).
    pub fn from_env() -> Result<Self> {
        let config = with_defaults(Config::builder())?
            .add_source(environment())
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid =
            |msg: &str| -> Result<()> { Err(Error::Config(ConfigError::Message(msg.to_string()))) };

        if self.dispatch.batch_limit == 0 {
            return invalid("dispatch.batch_limit must be greater than zero");
        }
        if self.dispatch.max_concurrency == 0 {
            return invalid("dispatch.max_concurrency must be greater than zero");
        }
        if self.dispatch.max_concurrent_batches == 0 {
            return invalid("dispatch.max_concurrent_batches must be greater than zero");
        }
        if self.dispatch.radius_km.is_nan() || self.dispatch.radius_km <= 0.0 {
            return invalid("dispatch.radius_km must be positive");
        }
        if self.dispatch.fallback_candidate_cap == 0 {
            return invalid("dispatch.fallback_candidate_cap must be greater than zero");
        }
        Ok(())
    }
}
