use config::{Config, ConfigError, Environment, File};
use rand::{distributions::Alphanumeric, Rng};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 60;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_MAX_KEYS: usize = 10_000;
const DEFAULT_MP_API_BASE_URL: &str = "https://api.mercadopago.com";
const DEFAULT_TELEGRAM_API_BASE_URL: &str = "https://api.telegram.org";
const MIN_SECRET_LEN: usize = 32;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL (Postgres or SQLite)
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Application environment: development, test or production
    #[validate(custom = "validate_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default = "default_true_bool")]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Public URL of the storefront, used for gateway back_urls and notification_url
    #[serde(default = "default_public_base_url")]
    #[validate(custom = "validate_base_url")]
    pub public_base_url: String,

    /// MercadoPago access token; payments are simulated when absent
    #[serde(default)]
    pub mp_access_token: Option<String>,
    #[serde(default = "default_mp_api_base_url")]
    #[validate(custom = "validate_base_url")]
    pub mp_api_base_url: String,
    #[serde(default = "default_gateway_timeout_secs")]
    #[validate(range(min = 1, max = 60))]
    pub mp_timeout_secs: u64,

    /// HMAC key for the cart cookie and gateway external references
    #[serde(default)]
    pub signing_secret: Option<String>,

    /// HS256 key for admin session tokens
    #[serde(default)]
    pub admin_token_secret: Option<String>,

    /// Key accepted in `X-Admin-Key` by the admin login endpoint
    #[serde(default)]
    pub admin_api_key: Option<String>,

    /// Comma-separated list of emails allowed to hold an admin session
    #[serde(default)]
    pub admin_allowed_emails: String,

    #[serde(default = "default_admin_token_ttl_secs")]
    #[validate(range(min = 60))]
    pub admin_token_ttl_secs: u64,

    #[serde(default = "default_admin_cookie_max_age_secs")]
    pub admin_cookie_max_age_secs: u64,

    /// Telegram notification channel
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
    #[serde(default = "default_telegram_api_base_url")]
    #[validate(custom = "validate_base_url")]
    pub telegram_api_base_url: String,

    /// Delivery attempts before a notification is dead-lettered
    #[serde(default = "default_notification_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub notification_max_attempts: u32,

    /// Rate limiting: requests per window on /api/*
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests_per_window: u32,
    /// Rate limiting: window size (seconds)
    #[serde(default = "default_rate_limit_window_secs")]
    #[validate(range(min = 1))]
    pub rate_limit_window_seconds: u64,
    /// Rate limiting: upper bound on tracked client keys
    #[serde(default = "default_rate_limit_max_keys")]
    #[validate(range(min = 1))]
    pub rate_limit_max_tracked_keys: usize,
    /// Rate limiting: include headers
    #[serde(default = "default_true_bool")]
    pub rate_limit_enable_headers: bool,
}

impl AppConfig {
    /// Builds a configuration with defaults for every optional setting.
    pub fn new(database_url: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            host: "0.0.0.0".to_string(),
            port: default_port(),
            environment: environment.into(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            public_base_url: default_public_base_url(),
            mp_access_token: None,
            mp_api_base_url: default_mp_api_base_url(),
            mp_timeout_secs: default_gateway_timeout_secs(),
            signing_secret: None,
            admin_token_secret: None,
            admin_api_key: None,
            admin_allowed_emails: String::new(),
            admin_token_ttl_secs: default_admin_token_ttl_secs(),
            admin_cookie_max_age_secs: default_admin_cookie_max_age_secs(),
            telegram_bot_token: None,
            telegram_chat_id: None,
            telegram_api_base_url: default_telegram_api_base_url(),
            notification_max_attempts: default_notification_max_attempts(),
            rate_limit_requests_per_window: default_rate_limit_requests(),
            rate_limit_window_seconds: default_rate_limit_window_secs(),
            rate_limit_max_tracked_keys: default_rate_limit_max_keys(),
            rate_limit_enable_headers: true,
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
            || self.environment.eq_ignore_ascii_case("prod")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    /// True when no gateway token is configured and the pay page may simulate results.
    pub fn payments_simulated(&self) -> bool {
        self.mp_access_token
            .as_deref()
            .map(|t| t.trim().is_empty())
            .unwrap_or(true)
    }

    /// Lower-cased admin allow-list
    pub fn admin_emails(&self) -> Vec<String> {
        self.admin_allowed_emails
            .split(',')
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect()
    }

    pub fn base_url(&self) -> &str {
        self.public_base_url.trim_end_matches('/')
    }

    /// Fills missing signing keys with per-process random values in development.
    /// Outside development the keys must come from configuration.
    pub fn resolve_secrets(&mut self) {
        if !self.is_development() {
            return;
        }
        for (name, slot) in [
            ("signing_secret", &mut self.signing_secret),
            ("admin_token_secret", &mut self.admin_token_secret),
        ] {
            if slot.as_deref().map(str::trim).unwrap_or("").is_empty() {
                warn!(
                    secret = name,
                    "no secret configured; using an ephemeral key (sessions reset on restart)"
                );
                *slot = Some(random_secret());
            }
        }
    }

    pub fn signing_key(&self) -> &[u8] {
        self.signing_secret.as_deref().unwrap_or_default().as_bytes()
    }

    pub fn admin_token_key(&self) -> &[u8] {
        self.admin_token_secret
            .as_deref()
            .unwrap_or_default()
            .as_bytes()
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() {
            for (field, value) in [
                ("signing_secret", &self.signing_secret),
                ("admin_token_secret", &self.admin_token_secret),
            ] {
                if let Err(err) = validate_secret(value.as_deref().unwrap_or_default()) {
                    errors.add(field, err);
                }
            }
        }

        if self.mp_access_token.is_some() && self.public_base_url.contains("localhost") {
            warn!("gateway token configured with a localhost public_base_url; callbacks will not reach this instance");
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
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

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
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
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_public_base_url() -> String {
    format!("http://localhost:{}", DEFAULT_PORT)
}
fn default_mp_api_base_url() -> String {
    DEFAULT_MP_API_BASE_URL.to_string()
}
fn default_gateway_timeout_secs() -> u64 {
    10
}
fn default_admin_token_ttl_secs() -> u64 {
    30 * 60
}
fn default_admin_cookie_max_age_secs() -> u64 {
    6 * 60 * 60
}
fn default_telegram_api_base_url() -> String {
    DEFAULT_TELEGRAM_API_BASE_URL.to_string()
}
fn default_notification_max_attempts() -> u32 {
    3
}
fn default_rate_limit_requests() -> u32 {
    DEFAULT_RATE_LIMIT_REQUESTS
}
fn default_rate_limit_window_secs() -> u64 {
    DEFAULT_RATE_LIMIT_WINDOW_SECS
}
fn default_rate_limit_max_keys() -> usize {
    DEFAULT_RATE_LIMIT_MAX_KEYS
}
fn default_true_bool() -> bool {
    true
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_environment(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "development" | "test" | "staging" | "production" | "prod" => Ok(()),
        _ => {
            let mut err = ValidationError::new("environment");
            err.message =
                Some("environment must be development, test, staging or production".into());
            Err(err)
        }
    }
}

fn validate_base_url(value: &str) -> Result<(), ValidationError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        let mut err = ValidationError::new("base_url");
        err.message = Some("URL must start with http:// or https://".into());
        Err(err)
    }
}

fn validate_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();
    if trimmed.len() < MIN_SECRET_LEN {
        let mut err = ValidationError::new("secret_too_short");
        err.message = Some(
            format!("secret must be at least {MIN_SECRET_LEN} characters outside development")
                .into(),
        );
        return Err(err);
    }

    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("secret_weak");
            err.message = Some("secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("chroma3d_store={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
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
        .set_default("database_url", "sqlite://chroma3d.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let mut app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.resolve_secrets();

    info!("Configuration loaded successfully");
    Ok(app_config)
}
