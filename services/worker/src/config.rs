//! services/worker/src/config.rs
//!
//! Defines the worker's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::str::FromStr;
use std::time::Duration;

use auto_apply_core::{OrchestratorSettings, Platform, PlatformLimits, RateLimitConfig};
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub log_level: Level,
    /// Time between two scheduler ticks.
    pub cycle_interval: Duration,
    /// Run a single cycle and exit.
    pub run_once: bool,
    pub orchestrator: OrchestratorSettings,
    pub rate_limits: RateLimitConfig,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Database and logging ---
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;
        let database_max_connections = parse_var("DATABASE_MAX_CONNECTIONS", 5u32)?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Scheduling ---
        let cycle_interval_secs = parse_var("CYCLE_INTERVAL_SECS", 900u64)?;
        if cycle_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "CYCLE_INTERVAL_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let run_once = parse_flag("RUN_ONCE", false)?;

        // --- Orchestrator tuning ---
        let defaults = OrchestratorSettings::default();
        let orchestrator = OrchestratorSettings {
            search_timeout: Duration::from_secs(parse_var(
                "SEARCH_TIMEOUT_SECS",
                defaults.search_timeout.as_secs(),
            )?),
            apply_timeout: Duration::from_secs(parse_var(
                "APPLY_TIMEOUT_SECS",
                defaults.apply_timeout.as_secs(),
            )?),
            max_concurrent_cycles: parse_var(
                "MAX_CONCURRENT_CYCLES",
                defaults.max_concurrent_cycles,
            )?,
            search_result_limit: parse_var("SEARCH_RESULT_LIMIT", defaults.search_result_limit)?,
        };

        Ok(Self {
            database_url,
            database_max_connections,
            log_level,
            cycle_interval: Duration::from_secs(cycle_interval_secs),
            run_once,
            orchestrator,
            rate_limits: rate_limits_from_env()?,
        })
    }
}

/// Platform defaults, overridden per field by `RATE_LIMIT_<PLATFORM>_{HOURLY,DAILY,BURST_FLOOR}`.
fn rate_limits_from_env() -> Result<RateLimitConfig, ConfigError> {
    let mut config = RateLimitConfig::default();

    for platform in Platform::ALL {
        let prefix = format!("RATE_LIMIT_{}", platform.as_str().to_uppercase());
        let defaults = config.limits(platform);
        let limits = PlatformLimits::new(
            parse_var(&format!("{}_HOURLY", prefix), defaults.hourly)?,
            parse_var(&format!("{}_DAILY", prefix), defaults.daily)?,
            parse_var(&format!("{}_BURST_FLOOR", prefix), defaults.burst_floor)?,
        );
        limits
            .validate()
            .map_err(|e| ConfigError::InvalidValue(prefix.clone(), e.to_string()))?;
        config.set_limits(platform, limits);
    }

    config.fail_closed_after = match std::env::var("TRACKER_FAIL_CLOSED_AFTER") {
        Ok(raw) => Some(parse_value("TRACKER_FAIL_CLOSED_AFTER", &raw)?),
        Err(_) => None,
    };
    Ok(config)
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("'{}': {}", raw, e)))
}

fn parse_flag(name: &str, default: bool) -> Result<bool, ConfigError> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' is not a boolean", raw),
        )),
    }
}
