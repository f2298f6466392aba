use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tutor_core::model::Task3Eligibility;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_DB_URL: &str = "sqlite://tutor_database.sqlite3";
pub const DEFAULT_BLOB_PATH: &str = "tutor_backup_store.json";
pub const DEFAULT_GROUP_SIZE: usize = 5;

/// Client settings, read from `TUTOR_*` environment variables.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub api_base_url: Url,
    pub timeout: Duration,
    pub db_url: String,
    pub blob_path: PathBuf,
    pub group_size: usize,
    pub task3_policy: Task3Eligibility,
}

impl ClientConfig {
    /// Reads the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads settings through `lookup`, falling back to defaults for
    /// missing or blank values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a value is present but invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let base_url = get("TUTOR_API_BASE_URL");
        let mut config = Self {
            api_base_url: parse_base_url(base_url.as_deref().unwrap_or(DEFAULT_API_BASE_URL))?,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            db_url: DEFAULT_DB_URL.into(),
            blob_path: PathBuf::from(DEFAULT_BLOB_PATH),
            group_size: DEFAULT_GROUP_SIZE,
            task3_policy: Task3Eligibility::default(),
        };

        if let Some(raw) = get("TUTOR_API_TIMEOUT_SECS") {
            let secs = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or(ConfigError::Invalid {
                    key: "TUTOR_API_TIMEOUT_SECS",
                    value: raw.clone(),
                })?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = get("TUTOR_DB_URL") {
            config.db_url = raw;
        }
        if let Some(raw) = get("TUTOR_BLOB_PATH") {
            config.blob_path = PathBuf::from(raw);
        }
        if let Some(raw) = get("TUTOR_GROUP_SIZE") {
            config.group_size = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::Invalid {
                    key: "TUTOR_GROUP_SIZE",
                    value: raw.clone(),
                })?;
        }
        if let Some(raw) = get("TUTOR_TASK3_POLICY") {
            config.task3_policy = raw.parse().map_err(|_| ConfigError::Invalid {
                key: "TUTOR_TASK3_POLICY",
                value: raw.clone(),
            })?;
        }

        Ok(config)
    }
}

/// Parses an http(s) base URL.
///
/// # Errors
///
/// Returns `ConfigError` for unparsable URLs or other schemes.
pub fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim())?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(ConfigError::Invalid {
            key: "TUTOR_API_BASE_URL",
            value: raw.to_owned(),
        });
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.api_base_url.as_str(), "http://localhost:8000/");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.group_size, 5);
        assert_eq!(config.task3_policy, Task3Eligibility::Contiguous);
    }

    #[test]
    fn overrides_are_read() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("TUTOR_API_BASE_URL", "https://tutor.example.com"),
            ("TUTOR_API_TIMEOUT_SECS", "10"),
            ("TUTOR_GROUP_SIZE", "8"),
            ("TUTOR_TASK3_POLICY", "count"),
            ("TUTOR_DB_URL", " "),
        ]))
        .unwrap();
        assert_eq!(config.api_base_url.host_str(), Some("tutor.example.com"));
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.group_size, 8);
        assert_eq!(config.task3_policy, Task3Eligibility::CountBased);
        assert_eq!(config.db_url, DEFAULT_DB_URL);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(ClientConfig::from_lookup(lookup(&[("TUTOR_GROUP_SIZE", "0")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[("TUTOR_API_BASE_URL", "ftp://x")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[("TUTOR_TASK3_POLICY", "maybe")])).is_err());
    }
}
