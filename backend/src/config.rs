//! Service configuration, read from the environment at startup.
//!
//! A `.env` file in the working directory is honoured for local runs.

use crate::import::commit::CommitSettings;
use crate::import::retry::{Backoff, RetryPolicy};
use crate::import::ImportSettings;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const MAX_CONCURRENCY: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_host: String,
    pub bind_port: u16,
    pub database_path: PathBuf,
    pub batch_size: usize,
    pub course_batch_size: usize,
    /// Commit workers, clamped to `1..=4`.
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff: Duration,
    pub batch_pause: Duration,
    pub max_upload_bytes: usize,
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key, format!("'{}': {}", raw, e))),
        None => Ok(default),
    }
}

fn positive(key: &'static str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        Err(ConfigError::InvalidValue(key, "must be greater than zero".to_string()))
    } else {
        Ok(value)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Tests stay hermetic.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key → value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_host = lookup("BIND_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = parse_or(&lookup, "BIND_PORT", 8080u16)?;
        let database_path = lookup("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("attendance.sqlite"));

        let batch_size = positive("IMPORT_BATCH_SIZE", parse_or(&lookup, "IMPORT_BATCH_SIZE", 200)?)?;
        let course_batch_size = positive(
            "IMPORT_COURSE_BATCH_SIZE",
            parse_or(&lookup, "IMPORT_COURSE_BATCH_SIZE", 400)?,
        )?;
        let concurrency = parse_or(&lookup, "IMPORT_CONCURRENCY", 1usize)?.clamp(1, MAX_CONCURRENCY);
        let max_attempts = parse_or(&lookup, "IMPORT_MAX_ATTEMPTS", 3u32)?.max(1);
        let backoff = Duration::from_millis(parse_or(&lookup, "IMPORT_BACKOFF_MS", 1000u64)?);
        let batch_pause = Duration::from_millis(parse_or(&lookup, "IMPORT_BATCH_PAUSE_MS", 50u64)?);
        let max_upload_mb = positive(
            "IMPORT_MAX_UPLOAD_MB",
            parse_or(&lookup, "IMPORT_MAX_UPLOAD_MB", 50usize)?,
        )?;
        let max_upload_bytes = max_upload_mb.checked_mul(1024 * 1024).ok_or_else(|| {
            ConfigError::InvalidValue(
                "IMPORT_MAX_UPLOAD_MB",
                format!("{} MB is too large", max_upload_mb),
            )
        })?;

        Ok(Config {
            bind_host,
            bind_port,
            database_path,
            batch_size,
            course_batch_size,
            concurrency,
            max_attempts,
            backoff,
            batch_pause,
            max_upload_bytes,
        })
    }

    pub fn import_settings(&self) -> ImportSettings {
        ImportSettings {
            commit: CommitSettings {
                batch_size: self.batch_size,
                course_batch_size: self.course_batch_size,
                concurrency: self.concurrency,
                pause: self.batch_pause,
                retry: RetryPolicy {
                    max_attempts: self.max_attempts,
                    backoff: if self.backoff.is_zero() {
                        Backoff::None
                    } else {
                        Backoff::Linear(self.backoff)
                    },
                },
            },
            ..ImportSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let config = config(&[]).unwrap();
        assert_eq!(config.bind_host, "127.0.0.1");
        assert_eq!(config.bind_port, 8080);
        assert_eq!(config.database_path, PathBuf::from("attendance.sqlite"));
        assert_eq!(config.max_upload_bytes, 50 * 1024 * 1024);

        let settings = config.import_settings();
        assert_eq!(settings.commit.batch_size, 200);
        assert_eq!(settings.commit.course_batch_size, 400);
        assert_eq!(settings.commit.concurrency, 1);
        assert_eq!(settings.commit.pause, Duration::from_millis(50));
        assert_eq!(settings.commit.retry, RetryPolicy::default());
        assert_eq!(settings.error_detail_limit, 10);
    }

    #[test]
    fn concurrency_is_clamped() {
        assert_eq!(config(&[("IMPORT_CONCURRENCY", "16")]).unwrap().concurrency, 4);
        assert_eq!(config(&[("IMPORT_CONCURRENCY", "0")]).unwrap().concurrency, 1);
    }

    #[test]
    fn rejects_unparseable_and_zero_values() {
        let err = config(&[("BIND_PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("BIND_PORT"));
        assert!(matches!(
            config(&[("IMPORT_BATCH_SIZE", "0")]),
            Err(ConfigError::InvalidValue("IMPORT_BATCH_SIZE", _))
        ));
    }

    #[test]
    fn oversized_upload_limit_is_rejected() {
        let huge = usize::MAX.to_string();
        assert!(matches!(
            config(&[("IMPORT_MAX_UPLOAD_MB", huge.as_str())]),
            Err(ConfigError::InvalidValue("IMPORT_MAX_UPLOAD_MB", _))
        ));
        assert_eq!(
            config(&[("IMPORT_MAX_UPLOAD_MB", "2")]).unwrap().max_upload_bytes,
            2 * 1024 * 1024
        );
    }
}
