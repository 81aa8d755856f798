//! Environment-driven configuration.
//!
//! Values come from the process environment, with a `.env` file loaded
//! first when present. `Config::from_lookup` takes any key lookup so tests
//! never touch the real environment.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::metrics::ledger::DEFAULT_CAPACITY;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub environment: Environment,
    pub redis_url: String,

    pub razorpay_webhook_secret: Option<String>,
    pub admin_api_token: Option<String>,
    pub cache_warming_enabled: bool,
    pub cache_warm_token: Option<String>,

    pub supabase_url: Option<String>,
    pub supabase_service_key: Option<String>,

    pub resend_api_key: Option<String>,
    pub email_from: String,

    pub security_alert_webhook_url: Option<String>,

    pub performance_capacity: usize,
    pub security_capacity: usize,
    pub stream_interval: Duration,

    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env is normal outside local development
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Blank values count as unset
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let environment = match get("APP_ENV").as_deref() {
            None | Some("development") | Some("dev") | Some("test") => Environment::Development,
            Some("production") | Some("prod") => Environment::Production,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "APP_ENV",
                    value: other.to_owned(),
                    reason: "expected development or production".into(),
                })
            }
        };

        let log_format = match get("LOG_FORMAT").as_deref() {
            None | Some("pretty") | Some("text") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "LOG_FORMAT",
                    value: other.to_owned(),
                    reason: "expected pretty or json".into(),
                })
            }
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into()),
            environment,
            redis_url: get("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379/".into()),
            razorpay_webhook_secret: get("RAZORPAY_WEBHOOK_SECRET"),
            admin_api_token: get("ADMIN_API_TOKEN"),
            cache_warming_enabled: parse_bool("CACHE_WARMING_ENABLED", get("CACHE_WARMING_ENABLED"))?,
            cache_warm_token: get("CACHE_WARM_TOKEN"),
            supabase_url: get("SUPABASE_URL"),
            supabase_service_key: get("SUPABASE_SERVICE_KEY"),
            resend_api_key: get("RESEND_API_KEY"),
            email_from: get("EMAIL_FROM").unwrap_or_else(|| "noreply@localhost".into()),
            security_alert_webhook_url: get("SECURITY_ALERT_WEBHOOK_URL"),
            performance_capacity: parse_num(
                "PERFORMANCE_LEDGER_CAPACITY",
                get("PERFORMANCE_LEDGER_CAPACITY"),
                DEFAULT_CAPACITY,
            )?,
            security_capacity: parse_num(
                "SECURITY_LEDGER_CAPACITY",
                get("SECURITY_LEDGER_CAPACITY"),
                DEFAULT_CAPACITY,
            )?,
            stream_interval: Duration::from_millis(parse_num(
                "METRICS_STREAM_INTERVAL_MS",
                get("METRICS_STREAM_INTERVAL_MS"),
                2_000u64,
            )?),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".into()),
            log_format,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Config for tests: development, everything optional unset.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self::from_lookup(|_| None).unwrap_or_else(|e| panic!("default config is valid: {e}"))
    }
}

fn parse_bool(key: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    let Some(raw) = value else {
        return Ok(false);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "expected a boolean".into(),
        }),
    }
}

fn parse_num<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let Some(raw) = value else {
        return Ok(default);
    };
    match raw.parse::<T>() {
        Ok(v) if v > T::default() => Ok(v),
        Ok(_) => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "must be greater than zero".into(),
        }),
        Err(e) => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = from_pairs(&[]).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:3000");
        assert_eq!(cfg.environment, Environment::Development);
        assert!(!cfg.cache_warming_enabled);
        assert_eq!(cfg.performance_capacity, 10_000);
        assert_eq!(cfg.security_capacity, 10_000);
        assert_eq!(cfg.stream_interval, Duration::from_secs(2));
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert!(cfg.razorpay_webhook_secret.is_none());
    }

    #[test]
    fn reads_values() {
        let cfg = from_pairs(&[
            ("APP_ENV", "production"),
            ("CACHE_WARMING_ENABLED", "TRUE"),
            ("CACHE_WARM_TOKEN", "t0k"),
            ("RAZORPAY_WEBHOOK_SECRET", "whsec"),
            ("PERFORMANCE_LEDGER_CAPACITY", "500"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert!(cfg.is_production());
        assert!(cfg.cache_warming_enabled);
        assert_eq!(cfg.cache_warm_token.as_deref(), Some("t0k"));
        assert_eq!(cfg.razorpay_webhook_secret.as_deref(), Some("whsec"));
        assert_eq!(cfg.performance_capacity, 500);
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn blank_values_are_unset() {
        let cfg = from_pairs(&[("ADMIN_API_TOKEN", "   ")]).unwrap();
        assert!(cfg.admin_api_token.is_none());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(from_pairs(&[("APP_ENV", "staging")]).is_err());
        assert!(from_pairs(&[("CACHE_WARMING_ENABLED", "maybe")]).is_err());
        assert!(from_pairs(&[("SECURITY_LEDGER_CAPACITY", "0")]).is_err());
        assert!(from_pairs(&[("SECURITY_LEDGER_CAPACITY", "lots")]).is_err());
    }
}
