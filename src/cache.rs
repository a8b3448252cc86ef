use std::{fs, io::ErrorKind, path::PathBuf};

use serde_json::Value;
use thiserror::Error;

use crate::utils;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache key: {0:?}")]
    InvalidKey(String),
    #[error("cache io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cache encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct LocalCache {
    root: PathBuf,
}

impl LocalCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf, CacheError> {
        utils::key_to_relative_path(key)
            .map(|relative| self.root.join(relative))
            .ok_or_else(|| CacheError::InvalidKey(key.to_string()))
    }

    pub fn load(&self, key: &str) -> Option<Value> {
        let path = self.path_for(key).ok()?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!(key, error = %err, "unable to read cached object");
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(value) => {
                tracing::debug!(key, "loaded from local cache");
                Some(value)
            }
            Err(err) => {
                tracing::warn!(
                    key,
                    path = %path.display(),
                    error = %err,
                    "discarding corrupt cache entry"
                );
                if let Err(err) = fs::remove_file(&path) {
                    tracing::warn!(key, error = %err, "failed to remove corrupt cache entry");
                }
                None
            }
        }
    }

    pub fn store(&self, key: &str, value: &Value) -> Result<(), CacheError> {
        let path = self.path_for(key)?;
        let io_err = |source| CacheError::Io {
            path: path.clone(),
            source,
        };
        utils::ensure_parent(&path).map_err(io_err)?;
        let contents = serde_json::to_string_pretty(value)?;
        fs::write(&path, contents).map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn miss_then_hit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = LocalCache::new(dir.path());
        let key = "events/20250101_000000/all_events.json";

        assert!(cache.load(key).is_none());
        cache.store(key, &json!({"music-tickets": []})).expect("store");
        assert_eq!(cache.load(key), Some(json!({"music-tickets": []})));
        assert!(dir.path().join(key).is_file());
    }

    #[test]
    fn corrupt_entry_is_removed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = LocalCache::new(dir.path());
        let key = "events/broken.json";
        let path = cache.path_for(key).expect("path");
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, "{ not json").expect("write");

        assert!(cache.load(key).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn escaping_keys_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = LocalCache::new(dir.path());
        assert!(matches!(
            cache.store("../x.json", &json!([])),
            Err(CacheError::InvalidKey(_))
        ));
        assert!(cache.load("../x.json").is_none());
    }
}
