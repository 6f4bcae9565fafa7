//! Timeouts and other knobs read from the environment

use crate::error::{ConfigError, Result};
use std::time::Duration;

pub const STAGING_TIMEOUT_VAR: &str = "CF_STAGING_TIMEOUT";
pub const STARTUP_TIMEOUT_VAR: &str = "CF_STARTUP_TIMEOUT";
pub const POLL_INTERVAL_VAR: &str = "PUSHFLOW_POLL_INTERVAL_MS";
pub const DOCKER_PASSWORD_VAR: &str = "CF_DOCKER_PASSWORD";

const DEFAULT_STAGING_MINUTES: u64 = 15;
const DEFAULT_STARTUP_MINUTES: u64 = 5;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Push settings that do not belong in a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushConfig {
    pub staging_timeout: Duration,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    pub docker_password: Option<String>,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            staging_timeout: Duration::from_secs(DEFAULT_STAGING_MINUTES * 60),
            startup_timeout: Duration::from_secs(DEFAULT_STARTUP_MINUTES * 60),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            docker_password: None,
        }
    }
}

impl PushConfig {
    /// Defaults overridden by whatever is set in the environment
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            staging_timeout: minutes_var(STAGING_TIMEOUT_VAR)?.unwrap_or(defaults.staging_timeout),
            startup_timeout: minutes_var(STARTUP_TIMEOUT_VAR)?.unwrap_or(defaults.startup_timeout),
            poll_interval: millis_var(POLL_INTERVAL_VAR)?.unwrap_or(defaults.poll_interval),
            docker_password: std::env::var(DOCKER_PASSWORD_VAR)
                .ok()
                .filter(|p| !p.is_empty()),
        })
    }
}

fn positive_var(name: &str) -> Result<Option<u64>> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(None);
    };
    let invalid = |reason: &str| ConfigError::InvalidValue {
        name: name.to_string(),
        value: raw.clone(),
        reason: reason.to_string(),
    };
    let value: u64 = raw.trim().parse().map_err(|_| invalid("not a number"))?;
    if value == 0 {
        return Err(invalid("must be greater than 0"));
    }
    Ok(Some(value))
}

fn minutes_var(name: &str) -> Result<Option<Duration>> {
    Ok(positive_var(name)?.map(|m| Duration::from_secs(m * 60)))
}

fn millis_var(name: &str) -> Result<Option<Duration>> {
    Ok(positive_var(name)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ALL_VARS: [&str; 4] = [
        STAGING_TIMEOUT_VAR,
        STARTUP_TIMEOUT_VAR,
        POLL_INTERVAL_VAR,
        DOCKER_PASSWORD_VAR,
    ];

    #[test]
    #[serial]
    fn test_defaults() {
        temp_env::with_vars_unset(ALL_VARS, || {
            let config = PushConfig::from_env().unwrap();
            assert_eq!(config, PushConfig::default());
            assert_eq!(config.staging_timeout, Duration::from_secs(900));
            assert_eq!(config.startup_timeout, Duration::from_secs(300));
        });
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        temp_env::with_vars(
            [
                (STAGING_TIMEOUT_VAR, Some("30")),
                (STARTUP_TIMEOUT_VAR, Some("2")),
                (POLL_INTERVAL_VAR, Some("250")),
                (DOCKER_PASSWORD_VAR, Some("hunter2")),
            ],
            || {
                let config = PushConfig::from_env().unwrap();
                assert_eq!(config.staging_timeout, Duration::from_secs(1800));
                assert_eq!(config.startup_timeout, Duration::from_secs(120));
                assert_eq!(config.poll_interval, Duration::from_millis(250));
                assert_eq!(config.docker_password.as_deref(), Some("hunter2"));
            },
        );
    }

    #[test]
    #[serial]
    fn test_invalid_timeout() {
        temp_env::with_var(STAGING_TIMEOUT_VAR, Some("soon"), || {
            assert!(matches!(
                PushConfig::from_env(),
                Err(ConfigError::InvalidValue { .. })
            ));
        });
        temp_env::with_var(STARTUP_TIMEOUT_VAR, Some("0"), || {
            assert!(matches!(
                PushConfig::from_env(),
                Err(ConfigError::InvalidValue { .. })
            ));
        });
    }
}
