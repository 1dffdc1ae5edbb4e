//! Configuration for the lifecycle worker.

use std::time::Duration;

use salonpass_core::LifecycleConfig;
use salonpass_db::PoolOptions;

/// Lifecycle worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL
    pub database_url: String,
    /// Connection pool tuning
    pub pool: PoolOptions,
    /// Engine configuration
    pub lifecycle: LifecycleConfig,
    /// Metrics enabled
    pub metrics_enabled: bool,
    /// Prometheus listener port
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let defaults = LifecycleConfig::default();
        let max_connections = parse(&lookup, "DATABASE_MAX_CONNECTIONS", 10u32)?;
        let sweep_interval_secs =
            parse(&lookup, "SWEEP_INTERVAL_SECS", defaults.sweep_interval.as_secs())?;
        let sweep_batch_size = parse(&lookup, "SWEEP_BATCH_SIZE", defaults.sweep_batch_size)?;
        let grace_period_hours =
            parse(&lookup, "GRACE_PERIOD_HOURS", defaults.grace_period.num_hours())?;
        let low_quota_threshold =
            parse(&lookup, "LOW_QUOTA_THRESHOLD", defaults.low_quota_threshold)?;

        if sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("SWEEP_INTERVAL_SECS"));
        }
        if sweep_batch_size == 0 {
            return Err(ConfigError::Invalid("SWEEP_BATCH_SIZE"));
        }
        if grace_period_hours < 0 {
            return Err(ConfigError::Invalid("GRACE_PERIOD_HOURS"));
        }

        let metrics_enabled = lookup("METRICS_ENABLED")
            .map(|v| v.parse().unwrap_or(true))
            .unwrap_or(true);
        let metrics_port = parse(&lookup, "METRICS_PORT", 9464u16)?;

        let lifecycle = defaults
            .with_sweep(sweep_batch_size, Duration::from_secs(sweep_interval_secs))
            .with_grace_period(chrono::Duration::hours(grace_period_hours))
            .with_low_quota_threshold(low_quota_threshold);

        Ok(Self {
            database_url,
            pool: PoolOptions {
                max_connections,
                ..PoolOptions::default()
            },
            lifecycle,
            metrics_enabled,
            metrics_port,
        })
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_database_is_set() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/salonpass")]).unwrap();

        assert_eq!(config.pool.max_connections, 10);
        assert_eq!(config.lifecycle.sweep_batch_size, 500);
        assert_eq!(config.lifecycle.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.lifecycle.grace_period, chrono::Duration::days(7));
        assert!(config.metrics_enabled);
        assert_eq!(config.metrics_port, 9464);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db/salonpass"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
            ("SWEEP_INTERVAL_SECS", "15"),
            ("SWEEP_BATCH_SIZE", "50"),
            ("GRACE_PERIOD_HOURS", "48"),
            ("LOW_QUOTA_THRESHOLD", "2"),
            ("METRICS_ENABLED", "false"),
            ("METRICS_PORT", "9100"),
        ])
        .unwrap();

        assert_eq!(config.pool.max_connections, 4);
        assert_eq!(config.lifecycle.sweep_interval, Duration::from_secs(15));
        assert_eq!(config.lifecycle.sweep_batch_size, 50);
        assert_eq!(config.lifecycle.grace_period, chrono::Duration::hours(48));
        assert_eq!(config.lifecycle.low_quota_threshold, 2);
        assert!(!config.metrics_enabled);
        assert_eq!(config.metrics_port, 9100);
    }

    #[test]
    fn missing_database_url_is_reported() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn unparsable_values_are_reported() {
        let err = load(&[
            ("DATABASE_URL", "postgres://db/salonpass"),
            ("SWEEP_BATCH_SIZE", "lots"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("SWEEP_BATCH_SIZE")));

        let err = load(&[
            ("DATABASE_URL", "postgres://db/salonpass"),
            ("SWEEP_INTERVAL_SECS", "0"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("SWEEP_INTERVAL_SECS")));
    }
}
