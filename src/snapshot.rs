use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;

use crate::collector::CategoryEvents;
use crate::storage::{ObjectStore, StorageError};

pub const SNAPSHOT_FILE: &str = "all_events.json";
const KEY_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot {0} already exists")]
    Exists(String),
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// `<prefix>/<YYYYMMDD_HHMMSS>/all_events.json`
pub fn snapshot_key(prefix: &str, timestamp: DateTime<Utc>) -> String {
    let prefix = prefix.trim_end_matches('/');
    format!(
        "{prefix}/{}/{SNAPSHOT_FILE}",
        timestamp.format(KEY_TIMESTAMP_FORMAT)
    )
}

pub fn timestamp_from_key(key: &str) -> Option<DateTime<Utc>> {
    key.split('/').find_map(|segment| {
        NaiveDateTime::parse_from_str(segment, KEY_TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    })
}

struct SnapshotBody<'a>(&'a [CategoryEvents]);

impl Serialize for SnapshotBody<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for entry in self.0 {
            map.serialize_entry(&entry.category.as_slug(), &entry.events)?;
        }
        map.end()
    }
}

pub struct SnapshotWriter<'a, O: ObjectStore> {
    store: &'a O,
    prefix: String,
}

impl<'a, O: ObjectStore> SnapshotWriter<'a, O> {
    pub fn new(store: &'a O, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn write(
        &self,
        categories: &[CategoryEvents],
        timestamp: DateTime<Utc>,
    ) -> Result<String, SnapshotError> {
        let key = snapshot_key(&self.prefix, timestamp);
        if self.store.exists(&key)? {
            tracing::error!(key, "snapshot key already taken");
            return Err(SnapshotError::Exists(key));
        }
        let bytes = serde_json::to_vec(&SnapshotBody(categories))?;
        tracing::info!(key, bytes = bytes.len(), "uploading snapshot");
        self.store.put(&key, &bytes)?;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    use crate::models::Category;
    use crate::storage::FsObjectStore;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).single().expect("valid time")
    }

    #[test]
    fn key_is_timestamped() {
        let key = snapshot_key("events/", at(2025, 3, 7, 9, 5, 1));
        assert_eq!(key, "events/20250307_090501/all_events.json");
        assert_eq!(timestamp_from_key(&key), Some(at(2025, 3, 7, 9, 5, 1)));
        assert_eq!(timestamp_from_key("events/manual/all_events.json"), None);
    }

    #[test]
    fn writes_category_map() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsObjectStore::open(dir.path()).expect("open");
        let writer = SnapshotWriter::new(&store, "events");
        let bundle = vec![
            CategoryEvents {
                category: Category::Music,
                events: vec![json!({"id": "1"}), json!({"id": "2"})],
            },
            CategoryEvents {
                category: Category::FoodAndDrink,
                events: vec![],
            },
        ];

        let key = writer
            .write(&bundle, at(2025, 1, 1, 0, 0, 0))
            .expect("write");
        assert_eq!(key, "events/20250101_000000/all_events.json");

        let stored: Value =
            serde_json::from_slice(&store.get(&key).expect("get")).expect("json");
        assert_eq!(
            stored,
            json!({
                "music-tickets": [{"id": "1"}, {"id": "2"}],
                "food-and-drink-tickets": []
            })
        );
    }

    #[test]
    fn new_timestamps_never_collide_and_old_keys_are_kept() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsObjectStore::open(dir.path()).expect("open");
        let writer = SnapshotWriter::new(&store, "events");
        let bundle = vec![CategoryEvents {
            category: Category::Sports,
            events: vec![json!({"id": "s"})],
        }];

        let first = writer.write(&bundle, at(2025, 1, 1, 0, 0, 0)).expect("first");
        let second = writer.write(&[], at(2025, 1, 1, 0, 0, 1)).expect("second");
        assert_ne!(first, second);

        let err = writer
            .write(&[], at(2025, 1, 1, 0, 0, 0))
            .expect_err("duplicate");
        assert!(matches!(err, SnapshotError::Exists(_)));
        let stored: Value = serde_json::from_slice(&store.get(&first).expect("get")).expect("json");
        assert_eq!(stored, json!({"sports-tickets": [{"id": "s"}]}));
    }
}
