use dirs::data_dir;
use once_cell::sync::Lazy;
use std::{
    fs,
    path::{Component, Path, PathBuf},
};

static DATA_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    let base = data_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    base.join("ticket-scrape")
});

pub fn data_root() -> PathBuf {
    DATA_ROOT.clone()
}

pub fn database_path() -> PathBuf {
    data_root().join("tixel.sqlite")
}

pub fn storage_root() -> PathBuf {
    data_root().join("buckets")
}

pub fn cache_dir() -> PathBuf {
    data_root().join("cache")
}

pub fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

pub fn key_to_relative_path(key: &str) -> Option<PathBuf> {
    let path = Path::new(key);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}
