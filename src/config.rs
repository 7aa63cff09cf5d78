//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub gateway: GatewayConfig,
    pub reconciliation: ReconciliationConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Payment gateway (Razorpay) credentials and call limits
#[derive(Clone)]
pub struct GatewayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub base_url: String,
    /// One currency per deployment.
    pub currency: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub receipt_prefix: String,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("key_id", &self.key_id)
            .field("key_secret", &"***")
            .field("webhook_secret", &"***")
            .field("base_url", &self.base_url)
            .field("currency", &self.currency)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("receipt_prefix", &self.receipt_prefix)
            .finish()
    }
}

/// Periodic sweep over payments stuck in Pending
#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub enabled: bool,
    pub interval: Duration,
    /// Pending payments untouched for longer than this are checked at the gateway.
    pub stale_after: Duration,
    /// Pending payments older than this with no capture are failed.
    pub abandon_after: Duration,
    pub batch_size: i64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(300),
            stale_after: Duration::from_secs(900),
            abandon_after: Duration::from_secs(86_400),
            batch_size: 100,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            gateway: GatewayConfig::from_env()?,
            reconciliation: ReconciliationConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.gateway.validate()?;
        self.reconciliation.validate()?;

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

fn required_var(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingVariable(name.to_string()))
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("SERVER_PORT", "8000")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: required_var("DATABASE_URL")?,
            max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            format: LogFormat::Plain,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(GatewayConfig {
            key_id: required_var("RAZORPAY_KEY_ID")?,
            key_secret: required_var("RAZORPAY_KEY_SECRET")?,
            webhook_secret: required_var("RAZORPAY_WEBHOOK_SECRET")?,
            base_url: env::var("RAZORPAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.razorpay.com/v1".to_string()),
            currency: env::var("PAYMENT_CURRENCY")
                .unwrap_or_else(|_| "INR".to_string())
                .to_uppercase(),
            timeout_secs: parse_var("RAZORPAY_TIMEOUT_SECS", "5")?,
            max_retries: parse_var("RAZORPAY_MAX_RETRIES", "2")?,
            receipt_prefix: env::var("PAYMENT_RECEIPT_PREFIX")
                .unwrap_or_else(|_| "rent_".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_id.is_empty() {
            return Err(ConfigError::InvalidValue("RAZORPAY_KEY_ID".to_string()));
        }

        if self.key_secret.is_empty() {
            return Err(ConfigError::InvalidValue("RAZORPAY_KEY_SECRET".to_string()));
        }

        if self.webhook_secret.is_empty() {
            return Err(ConfigError::InvalidValue(
                "RAZORPAY_WEBHOOK_SECRET".to_string(),
            ));
        }

        if self.webhook_secret == self.key_secret {
            return Err(ConfigError::ValidationFailed(
                "RAZORPAY_WEBHOOK_SECRET must differ from RAZORPAY_KEY_SECRET".to_string(),
            ));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "RAZORPAY_BASE_URL must be a valid URL".to_string(),
            ));
        }

        if self.currency.len() != 3 {
            return Err(ConfigError::InvalidValue("PAYMENT_CURRENCY".to_string()));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "RAZORPAY_TIMEOUT_SECS".to_string(),
            ));
        }

        // Razorpay caps receipts at 40 chars; the generated suffix takes 22.
        if self.receipt_prefix.len() > 18 {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_RECEIPT_PREFIX must be at most 18 characters".to_string(),
            ));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ReconciliationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(ReconciliationConfig {
            enabled: parse_var("RECONCILIATION_ENABLED", "true")?,
            interval: Duration::from_secs(parse_var(
                "RECONCILIATION_INTERVAL_SECS",
                &defaults.interval.as_secs().to_string(),
            )?),
            stale_after: Duration::from_secs(parse_var(
                "RECONCILIATION_STALE_AFTER_SECS",
                &defaults.stale_after.as_secs().to_string(),
            )?),
            abandon_after: Duration::from_secs(parse_var(
                "RECONCILIATION_ABANDON_AFTER_SECS",
                &defaults.abandon_after.as_secs().to_string(),
            )?),
            batch_size: parse_var(
                "RECONCILIATION_BATCH_SIZE",
                &defaults.batch_size.to_string(),
            )?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "RECONCILIATION_INTERVAL_SECS".to_string(),
            ));
        }

        if self.abandon_after < self.stale_after {
            return Err(ConfigError::ValidationFailed(
                "RECONCILIATION_ABANDON_AFTER_SECS must be >= RECONCILIATION_STALE_AFTER_SECS"
                    .to_string(),
            ));
        }

        if self.batch_size <= 0 {
            return Err(ConfigError::InvalidValue(
                "RECONCILIATION_BATCH_SIZE".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
