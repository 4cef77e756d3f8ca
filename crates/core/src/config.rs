// ABOUTME: Runtime configuration read from the environment, with an optional .env file.
// ABOUTME: Covers the data directory, daily schedule, fetch options and SMTP settings.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{NaiveTime, TimeDelta};

use crate::error::ConfigError;
use crate::fetch::FetchOptions;
use crate::schedule::DailySchedule;

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_SMTP_SERVER: &str = "smtp.mail.me.com";
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// SMTP delivery settings. Empty strings mean "unset".
#[derive(Debug, Clone, PartialEq)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub to: String,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            server: DEFAULT_SMTP_SERVER.to_string(),
            port: DEFAULT_SMTP_PORT,
            username: String::new(),
            password: String::new(),
            from: String::new(),
            to: String::new(),
        }
    }
}

impl SmtpSettings {
    /// Username, sender and recipient are all present.
    pub fn is_configured(&self) -> bool {
        !self.username.is_empty() && !self.from.is_empty() && !self.to.is_empty()
    }

    /// Names of the variables that still need a value.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.username.is_empty() {
            missing.push("SMTP_USERNAME");
        }
        if self.password.is_empty() {
            missing.push("SMTP_PASSWORD");
        }
        if self.from.is_empty() {
            missing.push("FROM_EMAIL");
        }
        if self.to.is_empty() {
            missing.push("TO_EMAIL");
        }
        missing
    }
}

/// Everything the binary needs to run.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub schedule: DailySchedule,
    pub fetch: FetchOptions,
    pub smtp: SmtpSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            schedule: DailySchedule::default(),
            fetch: FetchOptions::default(),
            smtp: SmtpSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unset and blank values take
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = AppConfig::default();

        if let Some(dir) = get("PAGEWATCH_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(value) = get("PAGEWATCH_CHECK_TIME") {
            config.schedule.at = NaiveTime::parse_from_str(&value, "%H:%M").map_err(|_| {
                ConfigError::Invalid {
                    var: "PAGEWATCH_CHECK_TIME",
                    expected: "HH:MM",
                    value: value.clone(),
                }
            })?;
        }

        if let Some(value) = get("PAGEWATCH_MISFIRE_GRACE_SECS") {
            let secs: u32 = parse_number("PAGEWATCH_MISFIRE_GRACE_SECS", &value)?;
            config.schedule.misfire_grace = TimeDelta::seconds(i64::from(secs));
        }

        if let Some(value) = get("PAGEWATCH_STARTUP_THRESHOLD_HOURS") {
            let hours: u32 = parse_number("PAGEWATCH_STARTUP_THRESHOLD_HOURS", &value)?;
            config.schedule.startup_threshold = TimeDelta::hours(i64::from(hours));
        }

        if let Some(value) = get("PAGEWATCH_TIMEOUT_SECS") {
            let secs: u64 = parse_number("PAGEWATCH_TIMEOUT_SECS", &value)?;
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    var: "PAGEWATCH_TIMEOUT_SECS",
                    expected: "a positive number of seconds",
                    value,
                });
            }
            config.fetch.timeout = Duration::from_secs(secs);
        }

        if let Some(agent) = get("PAGEWATCH_USER_AGENT") {
            config.fetch.user_agent = agent;
        }

        if let Some(server) = get("SMTP_SERVER") {
            config.smtp.server = server;
        }
        if let Some(value) = get("SMTP_PORT") {
            config.smtp.port = parse_number("SMTP_PORT", &value)?;
        }
        config.smtp.username = get("SMTP_USERNAME").unwrap_or_default();
        config.smtp.password = get("SMTP_PASSWORD").unwrap_or_default();
        config.smtp.from = get("FROM_EMAIL").unwrap_or_default();
        config.smtp.to = get("TO_EMAIL").unwrap_or_default();

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        var,
        expected: "a non-negative integer",
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.schedule.at, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(config.fetch.timeout, Duration::from_secs(10));
        assert_eq!(config.smtp.server, "smtp.mail.me.com");
        assert_eq!(config.smtp.port, 587);
        assert!(!config.smtp.is_configured());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PAGEWATCH_DATA_DIR", "/var/lib/pagewatch"),
            ("PAGEWATCH_CHECK_TIME", "07:30"),
            ("PAGEWATCH_MISFIRE_GRACE_SECS", "600"),
            ("PAGEWATCH_STARTUP_THRESHOLD_HOURS", "12"),
            ("PAGEWATCH_TIMEOUT_SECS", "5"),
            ("PAGEWATCH_USER_AGENT", "pagewatch-test"),
            ("SMTP_SERVER", "smtp.example.com"),
            ("SMTP_PORT", "2525"),
            ("SMTP_USERNAME", "me"),
            ("SMTP_PASSWORD", "secret"),
            ("FROM_EMAIL", "me@example.com"),
            ("TO_EMAIL", "you@example.com"),
        ])
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/pagewatch"));
        assert_eq!(config.schedule.at, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert_eq!(config.schedule.misfire_grace, TimeDelta::seconds(600));
        assert_eq!(config.schedule.startup_threshold, TimeDelta::hours(12));
        assert_eq!(config.fetch.timeout, Duration::from_secs(5));
        assert_eq!(config.fetch.user_agent, "pagewatch-test");
        assert_eq!(config.smtp.port, 2525);
        assert!(config.smtp.is_configured());
        assert!(config.smtp.missing().is_empty());
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = config_from(&[("SMTP_SERVER", "  "), ("PAGEWATCH_CHECK_TIME", "")]).unwrap();
        assert_eq!(config.smtp.server, DEFAULT_SMTP_SERVER);
        assert_eq!(config.schedule.at, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    }

    #[test]
    fn test_invalid_values() {
        let err = config_from(&[("PAGEWATCH_CHECK_TIME", "9am")]).unwrap_err();
        assert!(err.to_string().contains("PAGEWATCH_CHECK_TIME"));

        assert!(config_from(&[("SMTP_PORT", "smtp")]).is_err());
        assert!(config_from(&[("SMTP_PORT", "70000")]).is_err());
        assert!(config_from(&[("PAGEWATCH_TIMEOUT_SECS", "0")]).is_err());
        assert!(config_from(&[("PAGEWATCH_MISFIRE_GRACE_SECS", "-1")]).is_err());
    }

    #[test]
    fn test_smtp_requires_username_from_and_to() {
        let config = config_from(&[("SMTP_USERNAME", "me"), ("FROM_EMAIL", "me@example.com")])
            .unwrap();
        assert!(!config.smtp.is_configured());
        assert_eq!(config.smtp.missing(), vec!["SMTP_PASSWORD", "TO_EMAIL"]);
    }
}
