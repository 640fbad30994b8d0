use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CHECKOUT_TOKEN_TTL_DAYS: i64 = 7;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const STRIPE_API_BASE: &str = "https://api.stripe.com";
const RESEND_API_BASE: &str = "https://api.resend.com";
const LINE_API_BASE: &str = "https://api.line.me";

/// Stripe payment configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct StripeConfig {
    /// Secret API key (sk_...)
    pub secret_key: String,

    /// Shared secret for webhook signature verification (whsec_...).
    /// Required: the webhook endpoint always fails closed.
    #[validate(length(min = 1))]
    pub webhook_secret: String,

    /// Signature timestamp tolerance (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: u64,

    /// API base URL, overridable for tests
    #[serde(default = "default_stripe_api_base")]
    pub api_base: String,
}

/// Resend transactional email configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EmailConfig {
    pub api_key: String,

    /// Sender address shown to patients
    pub from_email: String,

    #[serde(default = "default_resend_api_base")]
    pub api_base: String,
}

/// LINE Messaging API push configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LineConfig {
    pub channel_access_token: String,

    #[serde(default = "default_line_api_base")]
    pub api_base: String,
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Public base URL of the patient-facing site; checkout links,
    /// success and cancel URLs are built from it
    pub site_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
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

    /// Checkout link lifetime in days
    #[serde(default = "default_checkout_token_ttl_days")]
    #[validate(range(min = 1, max = 90))]
    pub checkout_token_ttl_days: i64,

    /// Fallback currency when a recommendation item carries none
    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Reconciliation worker poll interval (seconds)
    #[serde(default = "default_reconciliation_poll_secs")]
    pub reconciliation_poll_secs: u64,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    #[validate]
    pub stripe: StripeConfig,

    #[validate]
    pub email: EmailConfig,

    #[validate]
    pub line: LineConfig,
}

impl AppConfig {
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn checkout_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.checkout_token_ttl_days)
    }

    /// The URL a patient opens to pay for a recommendation.
    pub fn checkout_url(&self, token: &str) -> String {
        format!("{}/checkout/{}", self.site_url.trim_end_matches('/'), token)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.is_production() && self.stripe.secret_key.starts_with("sk_test_") {
            let mut err = ValidationError::new("stripe_test_key_in_production");
            err.message =
                Some("A Stripe test key must not be used in the production environment".into());
            errors.add("stripe", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_checkout_token_ttl_days() -> i64 {
    DEFAULT_CHECKOUT_TOKEN_TTL_DAYS
}

fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_stripe_api_base() -> String {
    STRIPE_API_BASE.to_string()
}

fn default_resend_api_base() -> String {
    RESEND_API_BASE.to_string()
}

fn default_line_api_base() -> String {
    LINE_API_BASE.to_string()
}

fn default_currency() -> String {
    "THB".to_string()
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_reconciliation_poll_secs() -> u64 {
    30
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("apothecary_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://apothecary.db?mode=rwc")?
        .set_default("site_url", "http://localhost:3000")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    // The webhook endpoint fails closed, so a missing secret is a startup
    // error rather than a silently-unverified endpoint.
    if config.get_string("stripe.webhook_secret").is_err() {
        error!("Stripe webhook secret is not configured. Set APP__STRIPE__WEBHOOK_SECRET.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "stripe.webhook_secret is required but not configured".into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
