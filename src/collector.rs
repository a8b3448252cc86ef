use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::client::{ApiClient, FetchError, Transport};
use crate::models::{Category, Location};

// Upstream fields may be missing, null or oddly typed; none of that may
// discard the events on the page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPage {
    #[serde(default, deserialize_with = "lenient_events")]
    pub events: Vec<Value>,
    #[serde(default, rename = "hasMore", deserialize_with = "lenient_bool")]
    pub has_more: bool,
    #[serde(default, deserialize_with = "lenient_count")]
    pub total: u64,
}

fn lenient_events<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Value>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(events) => events,
        _ => Vec::new(),
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Value::deserialize(deserializer)?.as_bool().unwrap_or(false))
}

fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

pub trait PageSource {
    fn fetch_page(
        &self,
        location: &Location,
        category: Category,
        page: u32,
    ) -> Result<EventPage, FetchError>;
}

impl<T: Transport> PageSource for ApiClient<T> {
    fn fetch_page(
        &self,
        location: &Location,
        category: Category,
        page: u32,
    ) -> Result<EventPage, FetchError> {
        tracing::info!(%location, %category, page, "requesting events");
        let url = self.events_url(location, category, page)?;
        let value = self.fetch_for(&url, location)?;
        let parsed: EventPage =
            serde_json::from_value(value).map_err(|err| FetchError::InvalidJson {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        tracing::info!(
            events = parsed.events.len(),
            has_more = parsed.has_more,
            total = parsed.total,
            "retrieved events"
        );
        Ok(parsed)
    }
}

#[derive(Debug, Clone)]
pub struct CategoryEvents {
    pub category: Category,
    pub events: Vec<Value>,
}

pub struct Collector<'a, S: PageSource> {
    source: &'a S,
    max_pages: u32,
}

impl<'a, S: PageSource> Collector<'a, S> {
    pub fn new(source: &'a S, max_pages: u32) -> Self {
        Self {
            source,
            max_pages: max_pages.max(1),
        }
    }

    pub fn collect_all(&self, location: &Location, category: Category) -> Vec<Value> {
        tracing::info!(%location, %category, "starting collection");
        let mut all_events = Vec::new();
        let mut page = 1u32;

        loop {
            let data = match self.source.fetch_page(location, category, page) {
                Ok(data) => data,
                Err(err) => {
                    tracing::error!(%category, page, error = %err, "failed to fetch page");
                    EventPage::default()
                }
            };

            if data.events.is_empty() {
                tracing::info!(%category, page, "no events on page");
                break;
            }

            let count = data.events.len();
            all_events.extend(data.events);
            tracing::debug!(%category, page, count, "added events");

            if !data.has_more {
                tracing::debug!(%category, "no more pages available");
                break;
            }
            if page >= self.max_pages {
                tracing::warn!(
                    %category,
                    max_pages = self.max_pages,
                    "page cap reached while server still reports more"
                );
                break;
            }
            page += 1;
        }

        tracing::info!(%category, total = all_events.len(), "completed collection");
        all_events
    }

    pub fn collect_categories(
        &self,
        location: &Location,
        categories: &[Category],
    ) -> Vec<CategoryEvents> {
        categories
            .iter()
            .map(|&category| {
                let events = self.collect_all(location, category);
                tracing::info!(%category, events = events.len(), "category complete");
                CategoryEvents { category, events }
            })
            .collect()
    }
}
