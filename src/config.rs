use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::info;
use validator::{Validate, ValidationError};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;
const DEFAULT_BANK_TRANSFER_EXPIRY_MINUTES: i64 = 15;
const DEFAULT_VIETQR_IMAGE_BASE_URL: &str = "https://img.vietqr.io/image";

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to bootstrap the schema on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Flat shipping fee charged per order
    #[serde(default = "default_shipping_fee")]
    #[validate(custom = "validate_non_negative")]
    pub shipping_fee: f64,

    /// Subtotal at or above which shipping is free (disabled when unset)
    #[serde(default)]
    pub free_shipping_threshold: Option<f64>,

    /// Tax rate applied to the subtotal (0.0 disables tax)
    #[serde(default)]
    #[validate(custom = "validate_tax_rate")]
    pub default_tax_rate: f64,

    /// How long a bank-transfer payment stays payable
    #[serde(default = "default_bank_transfer_expiry_minutes")]
    pub bank_transfer_expiry_minutes: i64,

    /// Bank used when the checkout request does not pick one
    #[serde(default)]
    pub default_bank_code: Option<String>,

    /// External VietQR rendering service
    #[serde(default = "default_vietqr_image_base_url")]
    pub vietqr_image_base_url: String,

    /// Capacity of the event channel
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Convenience constructor used by tests and tooling.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            shipping_fee: default_shipping_fee(),
            free_shipping_threshold: None,
            default_tax_rate: 0.0,
            bank_transfer_expiry_minutes: default_bank_transfer_expiry_minutes(),
            default_bank_code: None,
            vietqr_image_base_url: default_vietqr_image_base_url(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development" || self.environment == "test"
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Flat shipping fee as a decimal amount.
    pub fn shipping_fee_decimal(&self) -> Decimal {
        Decimal::from_f64_retain(self.shipping_fee).unwrap_or(Decimal::ZERO)
    }

    pub fn free_shipping_threshold_decimal(&self) -> Option<Decimal> {
        self.free_shipping_threshold
            .and_then(Decimal::from_f64_retain)
    }

    pub fn tax_rate_decimal(&self) -> Decimal {
        Decimal::from_f64_retain(self.default_tax_rate).unwrap_or(Decimal::ZERO)
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_shipping_fee() -> f64 {
    0.0
}
fn default_bank_transfer_expiry_minutes() -> i64 {
    DEFAULT_BANK_TRANSFER_EXPIRY_MINUTES
}
fn default_vietqr_image_base_url() -> String {
    DEFAULT_VIETQR_IMAGE_BASE_URL.to_string()
}
fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

fn validate_non_negative(value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || value < 0.0 {
        let mut err = ValidationError::new("shipping_fee");
        err.message = Some("shipping_fee must be a finite, non-negative value".into());
        return Err(err);
    }
    Ok(())
}

fn validate_tax_rate(value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || value < 0.0 || value > 1.0 {
        let mut err = ValidationError::new("default_tax_rate");
        err.message = Some("default_tax_rate must be a finite value between 0.0 and 1.0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Loads configuration from `config/{default,<env>,local}.toml` plus
/// `APP__`-prefixed environment variables, then validates it.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder()
        .set_default("host", "127.0.0.1")?
        .set_default("environment", run_env.clone())?;

    let default_path = Path::new(CONFIG_DIR).join("default.toml");
    if default_path.exists() {
        builder = builder.add_source(File::from(default_path));
    }
    let env_path = Path::new(CONFIG_DIR).join(format!("{}.toml", run_env));
    if env_path.exists() {
        builder = builder.add_source(File::from(env_path));
    }
    let local_path = Path::new(CONFIG_DIR).join("local.toml");
    if local_path.exists() {
        builder = builder.add_source(File::from(local_path));
    }

    builder = builder.add_source(Environment::with_prefix("APP").separator("__"));

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    info!(environment = %cfg.environment, "configuration loaded");
    Ok(cfg)
}

/// Initializes tracing using the provided log level as the default filter.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("checkout_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}
