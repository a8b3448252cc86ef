pub mod cache;
pub mod client;
pub mod collector;
pub mod config;
pub mod db;
pub mod ingest;
pub mod models;
pub mod snapshot;
pub mod storage;
mod utils;

#[cfg(test)]
mod testing;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;

use cache::LocalCache;
use client::ApiClient;
use collector::{Collector, PageSource};
use config::AppConfig;
use db::Store;
use ingest::{IngestReport, Ingestor};
use models::{Category, Location};
use snapshot::SnapshotWriter;
use storage::{FsObjectStore, ObjectStore};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CollectionReport {
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub categories: usize,
    pub total_events: usize,
}

pub fn collect_snapshot<S: PageSource, O: ObjectStore>(
    source: &S,
    objects: &O,
    location: &Location,
    categories: &[Category],
    max_pages: u32,
    prefix: &str,
    timestamp: DateTime<Utc>,
) -> anyhow::Result<CollectionReport> {
    tracing::info!(%location, %timestamp, "starting event collection");
    let bundle = Collector::new(source, max_pages).collect_categories(location, categories);
    let total_events = bundle.iter().map(|c| c.events.len()).sum();

    let key = SnapshotWriter::new(objects, prefix)
        .write(&bundle, timestamp)
        .context("failed to store snapshot")?;

    let report = CollectionReport {
        key,
        timestamp,
        categories: bundle.len(),
        total_events,
    };
    tracing::info!(
        key = %report.key,
        categories = report.categories,
        total_events = report.total_events,
        "collection stored"
    );
    Ok(report)
}

pub fn run_collection(
    config: &AppConfig,
    categories: &[Category],
) -> anyhow::Result<CollectionReport> {
    let client = ApiClient::from_config(&config.api).context("failed to build http client")?;
    let objects = FsObjectStore::open(config.bucket_path()).context("failed to open bucket")?;
    collect_snapshot(
        &client,
        &objects,
        &config.api.location(),
        categories,
        config.api.max_pages,
        &config.storage.prefix,
        Utc::now(),
    )
}

pub fn snapshot_prefix(config: &AppConfig) -> String {
    format!("{}/", config.storage.prefix.trim_end_matches('/'))
}

pub fn run_ingestion(config: &AppConfig, reset: bool) -> anyhow::Result<IngestReport> {
    let mut store = Store::open(&config.database.path).with_context(|| {
        format!(
            "failed to open database at {}",
            config.database.path.display()
        )
    })?;
    if reset {
        store.reset_schema().context("failed to reset schema")?;
    }
    let objects = FsObjectStore::open(config.bucket_path()).context("failed to open bucket")?;
    let cache = LocalCache::new(config.cache_dir.0.clone());

    let prefix = snapshot_prefix(config);
    let report = Ingestor::new(
        &mut store,
        &objects,
        &cache,
        config.database.default_currency.clone(),
    )
    .ingest(&prefix)
    .context("ingestion aborted")?;
    Ok(report)
}
