//! Configuration loading and persistence.
//!
//! Handles reading and writing the pushrelay configuration file. The VAPID
//! keypair lives in its own file next to the config (see [`crate::vapid`])
//! so the config itself never holds secret material.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};

use crate::outcome::RetryPolicy;

/// Configuration for the pushrelay service.
///
/// Loaded from `config.json` in the config directory with environment
/// variable overrides. All knobs have documented defaults; none are
/// required for first run.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    /// Maximum sends in flight simultaneously during one dispatch.
    pub max_concurrency: usize,
    /// Retries allowed per subscription within one dispatch.
    pub max_retries_per_dispatch: u32,
    /// Base delay for exponential retry backoff, in milliseconds.
    pub base_backoff_ms: u64,
    /// Cap on the exponential retry backoff, in milliseconds.
    pub max_backoff_ms: u64,
    /// Wall-clock bound on one dispatch call, in milliseconds.
    pub dispatch_timeout_ms: u64,
    /// Bound on one transport send, in milliseconds.
    pub attempt_timeout_ms: u64,
    /// Contact for the VAPID `sub` claim (mailto: or https URL).
    pub contact: String,
    /// Lifetime of each signed authorization token, in seconds.
    /// RFC 8292 caps this at 24 hours.
    pub token_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            max_retries_per_dispatch: 3,
            base_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            dispatch_timeout_ms: 60_000,
            attempt_timeout_ms: 10_000,
            contact: "mailto:admin@example.com".to_string(),
            token_ttl_secs: 12 * 60 * 60,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `PUSHRELAY_CONFIG_DIR` env var: explicit override (tests, CI)
    /// 2. Default: platform config dir (macOS: ~/Library/Application Support/pushrelay)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(override_dir) = std::env::var("PUSHRELAY_CONFIG_DIR") {
            PathBuf::from(override_dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("pushrelay")
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Path of the VAPID keypair file.
    pub fn vapid_key_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("vapid.json"))
    }

    /// Path of the persisted subscription store.
    pub fn subscription_store_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("subscriptions.json"))
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file().unwrap_or_default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");
        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            anyhow::bail!("Config file not found")
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(contact) = std::env::var("PUSHRELAY_CONTACT") {
            self.contact = contact;
        }

        if let Ok(value) = std::env::var("PUSHRELAY_MAX_CONCURRENCY") {
            if let Ok(parsed) = value.parse::<usize>() {
                self.max_concurrency = parsed;
            }
        }

        if let Ok(value) = std::env::var("PUSHRELAY_MAX_RETRIES") {
            if let Ok(parsed) = value.parse::<u32>() {
                self.max_retries_per_dispatch = parsed;
            }
        }

        if let Ok(value) = std::env::var("PUSHRELAY_DISPATCH_TIMEOUT_MS") {
            if let Ok(parsed) = value.parse::<u64>() {
                self.dispatch_timeout_ms = parsed;
            }
        }

        if let Ok(value) = std::env::var("PUSHRELAY_TOKEN_TTL_SECS") {
            if let Ok(parsed) = value.parse::<u64>() {
                self.token_ttl_secs = parsed;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.max_concurrency > 0, "max_concurrency must be at least 1");
        anyhow::ensure!(self.base_backoff_ms > 0, "base_backoff_ms must be at least 1");
        anyhow::ensure!(
            self.max_backoff_ms >= self.base_backoff_ms,
            "max_backoff_ms must be >= base_backoff_ms"
        );
        anyhow::ensure!(
            self.token_ttl_secs <= 24 * 60 * 60,
            "token_ttl_secs must not exceed 24 hours (RFC 8292)"
        );
        Ok(())
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Retry knobs in the form the delivery pipeline consumes.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries_per_dispatch,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
        }
    }

    /// Wall-clock bound on one dispatch call.
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    /// Bound on one transport send.
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Lifetime of each signed authorization token.
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_concurrency, 16);
        assert_eq!(config.max_retries_per_dispatch, 3);
        assert_eq!(config.base_backoff_ms, 1_000);
        assert_eq!(config.max_backoff_ms, 30_000);
        assert_eq!(config.dispatch_timeout_ms, 60_000);
        assert_eq!(config.token_ttl_secs, 43_200);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = Config {
            max_concurrency: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_backoff_cap_below_base() {
        let config = Config {
            base_backoff_ms: 5_000,
            max_backoff_ms: 1_000,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_token_ttl() {
        let config = Config {
            token_ttl_secs: 48 * 60 * 60,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy_reflects_config() {
        let config = Config::default();
        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_backoff, Duration::from_secs(1));
        assert_eq!(policy.max_backoff, Duration::from_secs(30));
        assert_eq!(policy.attempt_timeout, Duration::from_secs(10));
    }
}
