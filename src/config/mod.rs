use std::env;
use std::fmt;

use rust_decimal::Decimal;

/// Distinguishes runtime behavior for different stages of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the collections engine.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub telemetry: TelemetryConfig,
    pub balance: BalanceConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let sign_multiplier = match env::var("DUNNING_BALANCE_SIGN") {
            Ok(raw) => parse_sign(&raw)?,
            Err(_) => Decimal::ONE,
        };

        let use_due_date = match env::var("DUNNING_BALANCE_USE_DUE_DATE") {
            Ok(raw) => parse_flag(&raw)?,
            Err(_) => true,
        };

        Ok(Self {
            environment,
            telemetry: TelemetryConfig { log_level },
            balance: BalanceConfig {
                sign_multiplier,
                use_due_date,
            },
        })
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Knobs governing customer-account balance computation.
#[derive(Debug, Clone)]
pub struct BalanceConfig {
    /// Global multiplier applied to every computed balance, 1 or -1.
    pub sign_multiplier: Decimal,
    /// Cut operations off by due date when true, by transaction date otherwise.
    pub use_due_date: bool,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            sign_multiplier: Decimal::ONE,
            use_due_date: true,
        }
    }
}

fn parse_sign(raw: &str) -> Result<Decimal, ConfigError> {
    match raw.trim() {
        "1" | "+1" => Ok(Decimal::ONE),
        "-1" => Ok(Decimal::NEGATIVE_ONE),
        other => Err(ConfigError::InvalidBalanceSign {
            value: other.to_string(),
        }),
    }
}

fn parse_flag(raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(ConfigError::InvalidFlag {
            value: other.to_string(),
        }),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidBalanceSign { value: String },
    InvalidFlag { value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidBalanceSign { value } => {
                write!(f, "DUNNING_BALANCE_SIGN must be 1 or -1, found '{value}'")
            }
            ConfigError::InvalidFlag { value } => {
                write!(f, "expected a boolean flag (1/0/true/false), found '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
