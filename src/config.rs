//! Configuration, built from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::mail::FallbackConfig;
use crate::mail::smtp::{DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_MESSAGE_BYTES, SmtpConfig};
use crate::relay::{DEFAULT_QUEUE_CAPACITY, DEFAULT_SEND_INTERVAL, DEFAULT_SUPPRESS_PHRASE};
use crate::routing::DestinationRegistry;

const RECEIVERS_KEY: &str = "RELAY_RECEIVERS";

/// Logging setup.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
    /// Default to `debug` instead of `info` when `RUST_LOG` is unset.
    pub debug: bool,
}

/// Everything the relay needs to start.
#[derive(Debug)]
pub struct RelayConfig {
    pub telegram_token: SecretString,
    pub registry: DestinationRegistry,
    pub smtp: SmtpConfig,
    pub queue_capacity: usize,
    pub send_interval: Duration,
    /// Messages whose text contains this phrase are dropped. Empty disables it.
    pub suppress_phrase: String,
    pub fallback: Option<FallbackConfig>,
    pub log: LogConfig,
}

impl RelayConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let telegram_token = SecretString::from(required(
            &var,
            "TELEGRAM_BOT_TOKEN",
            "Create a bot with @BotFather and export its token.",
        )?);

        let receivers = required(
            &var,
            RECEIVERS_KEY,
            "Example: RELAY_RECEIVERS='alice@example.com=123456,*=-100987654'",
        )?;
        let registry = DestinationRegistry::from_pairs(parse_receivers(&receivers)?, RECEIVERS_KEY)?;

        let smtp = SmtpConfig {
            listen: required(&var, "RELAY_SMTP_LISTEN", "Example: RELAY_SMTP_LISTEN=0.0.0.0:2525")?,
            name: required(&var, "RELAY_SMTP_NAME", "Host name announced to SMTP clients.")?,
            max_message_bytes: parse_or(&var, "RELAY_SMTP_MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES)?,
            idle_timeout: parse_or(&var, "RELAY_SMTP_IDLE_TIMEOUT_SECS", DEFAULT_IDLE_TIMEOUT.as_secs())
                .map(Duration::from_secs)?,
        };

        let queue_capacity = parse_or(&var, "RELAY_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?;
        if queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_QUEUE_CAPACITY".into(),
                message: "must be at least 1".into(),
            });
        }

        let send_interval = parse_or(&var, "RELAY_SEND_INTERVAL_SECS", DEFAULT_SEND_INTERVAL.as_secs())
            .map(Duration::from_secs)?;

        // Read raw so an explicitly empty value disables the filter.
        let suppress_phrase =
            lookup("RELAY_SUPPRESS_PHRASE").unwrap_or_else(|| DEFAULT_SUPPRESS_PHRASE.to_string());

        let fallback = match var("FALLBACK_HOST") {
            Some(host) => Some(FallbackConfig {
                host,
                port: parse_or(&var, "FALLBACK_PORT", 25)?,
                username: var("FALLBACK_USER"),
                password: var("FALLBACK_PASSWORD").map(SecretString::from),
                starttls: parse_or(&var, "FALLBACK_STARTTLS", false)?,
            }),
            None => None,
        };

        let log = LogConfig {
            file: var("RELAY_LOG_FILE").map(PathBuf::from),
            debug: parse_or(&var, "RELAY_DEBUG", false)?,
        };

        Ok(Self {
            telegram_token,
            registry,
            smtp,
            queue_capacity,
            send_interval,
            suppress_phrase,
            fallback,
            log,
        })
    }
}

fn required<F>(var: &F, key: &str, hint: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    var(key).ok_or_else(|| ConfigError::MissingRequired {
        key: key.to_string(),
        hint: hint.to_string(),
    })
}

fn parse_or<F, T>(var: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}

/// Parse `addr=chat_id` pairs separated by commas.
pub fn parse_receivers(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(addr, id)| (addr.trim().to_string(), id.trim().to_string()))
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: RECEIVERS_KEY.into(),
                    message: format!("expected address=chat_id, got {entry:?}"),
                })
        })
        .collect()
}
