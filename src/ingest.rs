use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::cache::LocalCache;
use crate::db::Store;
use crate::models::{EventRecord, TicketRecord, Venue};
use crate::snapshot::timestamp_from_key;
use crate::storage::{ObjectStore, StorageError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("missing required field {0}")]
    MissingField(&'static str),
    #[error("unparsable timestamp in {0}")]
    InvalidTimestamp(&'static str),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub objects: usize,
    pub processed: usize,
    pub errors: usize,
}

/// Map-shaped documents are walked in document order, which decides the
/// winner when one id appears under several labels.
pub fn extract_events(document: Value) -> Vec<Value> {
    match document {
        Value::Array(events) => events,
        Value::Object(categories) => {
            let mut out = Vec::new();
            for (label, events) in categories {
                let Value::Array(events) = events else {
                    continue;
                };
                for mut event in events {
                    if let Value::Object(fields) = &mut event {
                        fields.insert("category".to_string(), Value::String(label.clone()));
                    }
                    out.push(event);
                }
            }
            out
        }
        _ => Vec::new(),
    }
}

pub fn epoch_to_datetime(value: &Value) -> Option<DateTime<Utc>> {
    let seconds = match value {
        Value::Number(number) => number
            .as_i64()
            .map(|secs| secs as f64)
            .or_else(|| number.as_f64())?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    Utc.timestamp_opt(whole as i64, nanos).single()
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn owned_str(value: &Value, key: &str) -> Option<String> {
    str_field(value, key).map(str::to_string)
}

fn tag_title(payload: &Value, tag: &str) -> Option<String> {
    payload.get(tag).and_then(|t| owned_str(t, "title"))
}

fn number_field(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn integer_field(value: &Value, key: &str) -> Option<i64> {
    match value.get(key)? {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

pub fn extract_venue(payload: &Value) -> Venue {
    if let Some(venue) = payload.get("venue").filter(|v| v.is_object()) {
        return Venue {
            name: owned_str(venue, "title"),
            city: owned_str(venue, "city"),
            address: owned_str(venue, "streetAddress"),
            country: owned_str(venue, "country"),
        };
    }
    if let Some(city_tag) = payload.get("cityTag").filter(|v| v.is_object()) {
        return Venue {
            name: None,
            city: owned_str(city_tag, "title"),
            address: None,
            country: owned_str(payload, "country"),
        };
    }
    Venue::default()
}

fn event_id(payload: &Value) -> Option<String> {
    match payload.get("id")? {
        Value::String(id) if !id.trim().is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn required_time(payload: &Value, field: &'static str) -> Result<DateTime<Utc>, RecordError> {
    let value = payload
        .get(field)
        .filter(|v| !v.is_null())
        .ok_or(RecordError::MissingField(field))?;
    epoch_to_datetime(value).ok_or(RecordError::InvalidTimestamp(field))
}

pub fn normalize_event(
    payload: &Value,
    snapshot_timestamp: DateTime<Utc>,
    default_currency: &str,
) -> Result<(EventRecord, Vec<TicketRecord>), RecordError> {
    let id = event_id(payload).ok_or(RecordError::MissingField("id"))?;
    let title = str_field(payload, "title")
        .filter(|t| !t.trim().is_empty())
        .ok_or(RecordError::MissingField("title"))?
        .to_string();
    let start_time = required_time(payload, "startsAt")?;
    let end_time = required_time(payload, "endsAt")?;

    let category = tag_title(payload, "categoryTag").or_else(|| owned_str(payload, "category"));

    let tickets = payload
        .get("tickets")
        .and_then(|t| t.get("available"))
        .and_then(Value::as_array)
        .map(|available| {
            available
                .iter()
                .map(|ticket| TicketRecord {
                    event_id: id.clone(),
                    price: number_field(ticket, "price"),
                    currency: owned_str(ticket, "currency")
                        .unwrap_or_else(|| default_currency.to_string()),
                    ticket_type: owned_str(ticket, "type"),
                    quantity: integer_field(ticket, "quantity"),
                    raw_data: ticket.clone(),
                    snapshot_timestamp,
                })
                .collect()
        })
        .unwrap_or_default();

    let event = EventRecord {
        id,
        title,
        start_time,
        end_time,
        venue: extract_venue(payload),
        category,
        genre: tag_title(payload, "genreTag"),
        is_festival: payload
            .get("isFestival")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        raw_data: payload.clone(),
        snapshot_timestamp,
    };
    Ok((event, tickets))
}

pub struct Ingestor<'a, O: ObjectStore> {
    store: &'a mut Store,
    objects: &'a O,
    cache: &'a LocalCache,
    default_currency: String,
}

impl<'a, O: ObjectStore> Ingestor<'a, O> {
    pub fn new(
        store: &'a mut Store,
        objects: &'a O,
        cache: &'a LocalCache,
        default_currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            objects,
            cache,
            default_currency: default_currency.into(),
        }
    }

    pub fn ingest(&mut self, prefix: &str) -> Result<IngestReport, IngestError> {
        let started_at = Utc::now();
        let mut report = IngestReport::default();

        let keys = self.objects.list(prefix)?;
        tracing::info!(prefix, objects = keys.len(), "listing snapshots");

        for key in keys.iter().filter(|key| key.ends_with(".json")) {
            report.objects += 1;
            let Some(document) = self.load_document(key)? else {
                report.errors += 1;
                continue;
            };
            let snapshot_timestamp = timestamp_from_key(key).unwrap_or(started_at);
            let events = extract_events(document);
            tracing::info!(key, events = events.len(), "processing snapshot");

            for payload in &events {
                self.ingest_event(payload, snapshot_timestamp, &mut report);
            }
        }

        tracing::info!(
            objects = report.objects,
            processed = report.processed,
            errors = report.errors,
            "ingestion complete"
        );
        Ok(report)
    }

    fn ingest_event(
        &mut self,
        payload: &Value,
        snapshot_timestamp: DateTime<Utc>,
        report: &mut IngestReport,
    ) {
        let (event, tickets) =
            match normalize_event(payload, snapshot_timestamp, &self.default_currency) {
                Ok(parts) => parts,
                Err(err) => {
                    let id = payload.get("id").map(Value::to_string);
                    tracing::warn!(id = ?id, error = %err, "skipping event");
                    report.errors += 1;
                    return;
                }
            };

        match self.store.save_event(&event, &tickets) {
            Ok(()) => {
                report.processed += 1;
                if report.processed % 10 == 0 {
                    tracing::info!(processed = report.processed, "progress");
                }
            }
            Err(err) => {
                tracing::error!(id = %event.id, error = %err, "failed to save event, rolled back");
                report.errors += 1;
            }
        }
    }

    /// `None` means the object body is not JSON.
    fn load_document(&self, key: &str) -> Result<Option<Value>, StorageError> {
        if let Some(document) = self.cache.load(key) {
            return Ok(Some(document));
        }

        tracing::info!(key, "downloading snapshot");
        let bytes = self.objects.get(key)?;
        let document: Value = match serde_json::from_slice(&bytes) {
            Ok(document) => document,
            Err(err) => {
                tracing::error!(key, error = %err, "snapshot is not valid json");
                return Ok(None);
            }
        };
        if let Err(err) = self.cache.store(key, &document) {
            tracing::warn!(key, error = %err, "failed to cache snapshot");
        }
        Ok(Some(document))
    }
}
