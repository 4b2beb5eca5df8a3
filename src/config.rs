use config::{Config, ConfigError, Environment, File};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::services::dashboard::CostPolicy;
use crate::services::ledger::LedgerSettings;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_DATABASE_URL: &str = "sqlite://repairdesk.db?mode=rwc";
const DEFAULT_LOCAL_DATA_DIR: &str = "data";
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_PARTS_COST_RATIO: f64 = 0.7;
const DEFAULT_LABOR_COST_RATIO: f64 = 0.5;

/// Which persistence backend the ledger runs against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StorageBackend {
    /// SQL database through sea-orm (Postgres or SQLite URL)
    Database,
    /// One JSON document per collection in a local directory
    Local,
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::Database
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Persistence backend selected at startup
    #[serde(default)]
    pub storage_backend: StorageBackend,

    /// Database connection URL (database backend)
    pub database_url: String,

    /// Directory holding the collection files (local backend)
    #[serde(default = "default_local_data_dir")]
    pub local_data_dir: String,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
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

    /// Upper bound on waiting for a ticket or spare-part lock
    #[serde(default = "default_lock_timeout_ms")]
    #[validate(range(min = 1, max = 600000))]
    pub lock_timeout_ms: u64,

    /// Reject part usages that exceed the stock on hand instead of clamping
    #[serde(default)]
    pub strict_stock: bool,

    /// Share of parts price counted as cost on the dashboard
    #[serde(default = "default_parts_cost_ratio")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub dashboard_parts_cost_ratio: f64,

    /// Share of labor counted as cost on the dashboard
    #[serde(default = "default_labor_cost_ratio")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub dashboard_labor_cost_ratio: f64,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS outside development
    #[serde(default)]
    pub cors_allow_any_origin: bool,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the storage selection
    pub fn new(
        storage_backend: StorageBackend,
        database_url: impl Into<String>,
        local_data_dir: impl Into<String>,
    ) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: default_port(),
            environment: DEFAULT_ENV.to_string(),
            log_level: default_log_level(),
            log_json: false,
            storage_backend,
            database_url: database_url.into(),
            local_data_dir: local_data_dir.into(),
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            lock_timeout_ms: default_lock_timeout_ms(),
            strict_stock: false,
            dashboard_parts_cost_ratio: default_parts_cost_ratio(),
            dashboard_labor_cost_ratio: default_labor_cost_ratio(),
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn local_data_dir(&self) -> PathBuf {
        PathBuf::from(&self.local_data_dir)
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

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            lock_timeout: self.lock_timeout(),
            strict_stock: self.strict_stock,
        }
    }

    pub fn cost_policy(&self) -> CostPolicy {
        let ratio = |value: f64, fallback: Decimal| {
            Decimal::from_f64(value)
                .map(|d| d.round_dp(6))
                .unwrap_or(fallback)
        };
        let defaults = CostPolicy::default();
        CostPolicy {
            parts_cost_ratio: ratio(self.dashboard_parts_cost_ratio, defaults.parts_cost_ratio),
            labor_cost_ratio: ratio(self.dashboard_labor_cost_ratio, defaults.labor_cost_ratio),
        }
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

        match self.storage_backend {
            StorageBackend::Database if self.database_url.trim().is_empty() => {
                let mut err = ValidationError::new("database_url_required");
                err.message = Some("database_url is required for the database backend".into());
                errors.add("database_url", err);
            }
            StorageBackend::Local if self.local_data_dir.trim().is_empty() => {
                let mut err = ValidationError::new("local_data_dir_required");
                err.message = Some("local_data_dir is required for the local backend".into());
                errors.add("local_data_dir", err);
            }
            _ => {}
        }

        for (field, ratio) in [
            ("dashboard_parts_cost_ratio", self.dashboard_parts_cost_ratio),
            ("dashboard_labor_cost_ratio", self.dashboard_labor_cost_ratio),
        ] {
            if !ratio.is_finite() {
                let mut err = ValidationError::new("ratio");
                err.message = Some("cost ratios must be finite values between 0.0 and 1.0".into());
                errors.add(field, err);
            }
        }

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_min_connections");
            err.message = Some("db_min_connections must not exceed db_max_connections".into());
            errors.add("db_min_connections", err);
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
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_local_data_dir() -> String {
    DEFAULT_LOCAL_DATA_DIR.to_string()
}

fn default_db_max_connections() -> u32 {
    8
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

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

fn default_parts_cost_ratio() -> f64 {
    DEFAULT_PARTS_COST_RATIO
}

fn default_labor_cost_ratio() -> f64 {
    DEFAULT_LABOR_COST_RATIO
}

/// Validates log level values
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


/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("repairdesk_api={},tower_http=debug", level);
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
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("storage_backend", "database")?
        .set_default("database_url", DEFAULT_DATABASE_URL)?
        .set_default("local_data_dir", DEFAULT_LOCAL_DATA_DIR)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!(
        storage_backend = %app_config.storage_backend,
        "Configuration loaded successfully"
    );
    Ok(app_config)
}
