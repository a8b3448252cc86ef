use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::utils;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object key: {0:?}")]
    InvalidKey(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("storage io error on {key}: {source}")]
    Io {
        key: String,
        source: std::io::Error,
    },
}

pub trait ObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;
    /// Keys starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
    fn exists(&self, key: &str) -> Result<bool, StorageError>;
}

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StorageError::Io {
            key: root.display().to_string(),
            source,
        })?;
        tracing::info!(bucket = %root.display(), "opened object store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        utils::key_to_relative_path(key)
            .map(|relative| self.root.join(relative))
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))
    }

    fn walk(&self, dir: &Path, out: &mut Vec<String>) -> Result<(), StorageError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(StorageError::Io {
                    key: dir.display().to_string(),
                    source,
                })
            }
        };
        for entry in entries {
            let entry = entry.map_err(|source| StorageError::Io {
                key: dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            if path.is_dir() {
                self.walk(&path, out)?;
            } else if let Ok(relative) = path.strip_prefix(&self.root) {
                let key = relative
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(key);
            }
        }
        Ok(())
    }
}

impl ObjectStore for FsObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        let io_err = |source| StorageError::Io {
            key: key.to_string(),
            source,
        };
        utils::ensure_parent(&path).map_err(io_err)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
        // Staged next to the target so the rename stays on one filesystem.
        let staging = path.with_file_name(format!(".{file_name}.partial"));
        tracing::info!(key, bytes = bytes.len(), "uploading object");
        if let Err(err) = fs::write(&staging, bytes).and_then(|_| fs::rename(&staging, &path)) {
            let _ = fs::remove_file(&staging);
            tracing::error!(key, error = %err, "upload failed");
            return Err(io_err(err));
        }
        tracing::debug!(key, "upload complete");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(key)?;
        fs::read(&path).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io {
                    key: key.to_string(),
                    source,
                }
            }
        })
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        self.walk(&self.root.clone(), &mut keys)?;
        keys.retain(|key| key.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.object_path(key)?.is_file())
    }
}
