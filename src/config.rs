use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Location;
use crate::utils;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid value for {name}: {value}")]
    Env { name: &'static str, value: String },
}

const DEFAULT_BASE_URL: &str = "https://tixel.com/nuxt-api";
const DEFAULT_SITE_URL: &str = "https://tixel.com";
const DEFAULT_COUNTRY: &str = "au";
const DEFAULT_CITY: &str = "Sydney";
const DEFAULT_DATE_RANGE: &str = "this-month";
const DEFAULT_BUCKET: &str = "tixel-data";
const DEFAULT_PREFIX: &str = "events";
const DEFAULT_CURRENCY: &str = "AUD";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub cache_dir: CacheDir,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub site_url: String,
    pub country: String,
    pub city: String,
    pub date_range: String,
    pub page_limit: u32,
    /// Hard stop for a single category even if the API keeps reporting more.
    pub max_pages: u32,
    pub base_delay_secs: f64,
    pub jitter_min_secs: f64,
    pub jitter_max_secs: f64,
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub max_backoff_secs: f64,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            site_url: DEFAULT_SITE_URL.to_string(),
            country: DEFAULT_COUNTRY.to_string(),
            city: DEFAULT_CITY.to_string(),
            date_range: DEFAULT_DATE_RANGE.to_string(),
            page_limit: 1000,
            max_pages: 100,
            base_delay_secs: 2.0,
            jitter_min_secs: 0.5,
            jitter_max_secs: 1.5,
            max_retries: 3,
            backoff_factor: 1.5,
            max_backoff_secs: 120.0,
            timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    pub fn location(&self) -> Location {
        Location::new(self.country.clone(), self.city.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        secs(self.max_backoff_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub bucket: String,
    pub root: PathBuf,
    pub prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            root: utils::storage_root(),
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub default_currency: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: utils::database_path(),
            default_currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct CacheDir(pub PathBuf);

impl Default for CacheDir {
    fn default() -> Self {
        Self(utils::cache_dir())
    }
}

impl AppConfig {
    /// Defaults, then the optional JSON file, then `TIXEL_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => read_config(path)?,
            None => AppConfig::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("TIXEL_BASE_URL") {
            self.api.base_url = value;
        }
        if let Some(value) = lookup("TIXEL_COUNTRY") {
            self.api.country = value;
        }
        if let Some(value) = lookup("TIXEL_CITY") {
            self.api.city = value;
        }
        if let Some(value) = lookup("TIXEL_BASE_DELAY") {
            self.api.base_delay_secs = parse_env("TIXEL_BASE_DELAY", value)?;
        }
        if let Some(value) = lookup("TIXEL_MAX_RETRIES") {
            self.api.max_retries = parse_env("TIXEL_MAX_RETRIES", value)?;
        }
        if let Some(value) = lookup("TIXEL_MAX_PAGES") {
            self.api.max_pages = parse_env("TIXEL_MAX_PAGES", value)?;
        }
        if let Some(value) = lookup("TIXEL_BUCKET") {
            self.storage.bucket = value;
        }
        if let Some(value) = lookup("TIXEL_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(value);
        }
        if let Some(value) = lookup("TIXEL_DB_PATH") {
            self.database.path = PathBuf::from(value);
        }
        if let Some(value) = lookup("TIXEL_CACHE_DIR") {
            self.cache_dir = CacheDir(PathBuf::from(value));
        }
        Ok(())
    }

    pub fn bucket_path(&self) -> PathBuf {
        self.storage.root.join(&self.storage.bucket)
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::Env { name, value })
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"api": {"city": "Melbourne", "max_retries": 5}, "storage": {"bucket": "snapshots"}}"#,
        )
        .expect("write config");

        let config = read_config(&path).expect("read config");
        assert_eq!(config.api.city, "Melbourne");
        assert_eq!(config.api.max_retries, 5);
        assert_eq!(config.api.country, "au");
        assert_eq!(config.api.backoff_factor, 1.5);
        assert_eq!(config.storage.bucket, "snapshots");
        assert_eq!(config.storage.prefix, "events");
        assert_eq!(config.database.default_currency, "AUD");
    }

    #[test]
    fn no_file_means_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.api.page_limit, 1000);
        assert_eq!(config.api.max_pages, 100);
    }

    #[test]
    fn explicit_missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nope.json");
        let err = AppConfig::load(Some(path.as_path())).expect_err("missing file should fail");
        match err {
            ConfigError::Read { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("TIXEL_CITY", "Brisbane"),
            ("TIXEL_MAX_PAGES", "7"),
            ("TIXEL_DB_PATH", "/tmp/x.sqlite"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_env(|name| vars.get(name).map(|v| v.to_string()))
            .expect("apply env");
        assert_eq!(config.api.city, "Brisbane");
        assert_eq!(config.api.max_pages, 7);
        assert_eq!(config.database.path, PathBuf::from("/tmp/x.sqlite"));
    }

    #[test]
    fn bad_env_number_is_reported() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(|name| (name == "TIXEL_MAX_RETRIES").then(|| "lots".to_string()))
            .expect_err("should reject");
        assert!(matches!(err, ConfigError::Env { name: "TIXEL_MAX_RETRIES", .. }));
    }
}
