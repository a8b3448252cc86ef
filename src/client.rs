use std::time::Duration;

use rand::{seq::SliceRandom, Rng};
use reqwest::blocking::Client;
use reqwest::Url;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::{secs, ApiConfig};
use crate::models::{Category, Location};

const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
];

const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

pub type Headers = Vec<(&'static str, String)>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url {0}")]
    InvalidUrl(String),
    #[error("status {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("gave up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        status: Option<u16>,
        last: String,
    },
    #[error("response from {url} is not valid json: {reason}")]
    InvalidJson { url: String, reason: String },
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::RetriesExhausted { status, .. } => *status,
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
#[error("http error: {0}")]
pub struct TransportError(pub String);

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub body: String,
}

pub trait Transport {
    fn get(&self, url: &str, headers: &[(&'static str, String)])
        -> Result<HttpResponse, TransportError>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|err| TransportError(err.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn get(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
    ) -> Result<HttpResponse, TransportError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        let response = request
            .send()
            .map_err(|err| TransportError(err.to_string()))?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response
            .text()
            .map_err(|err| TransportError(err.to_string()))?;
        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ApiConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_factor: config.backoff_factor,
            max_backoff: config.max_backoff(),
        }
    }

    pub fn is_retryable(status: u16) -> bool {
        RETRYABLE_STATUSES.contains(&status)
    }

    /// Delay before retry number `retry` (1-based): `factor * 2^(retry-1)`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(30) as i32;
        let raw = secs(self.backoff_factor * 2f64.powi(exponent));
        raw.min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pacing {
    pub base_delay: Duration,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl Pacing {
    pub fn from_config(config: &ApiConfig) -> Self {
        Self {
            base_delay: secs(config.base_delay_secs),
            jitter_min: secs(config.jitter_min_secs),
            jitter_max: secs(config.jitter_max_secs),
        }
    }

    pub fn none() -> Self {
        Self {
            base_delay: Duration::ZERO,
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
        }
    }

    pub fn next_delay<R: Rng>(&self, rng: &mut R) -> Duration {
        let jitter = if self.jitter_max > self.jitter_min {
            rng.gen_range(self.jitter_min..self.jitter_max)
        } else {
            self.jitter_min
        };
        self.base_delay + jitter
    }
}

pub type Sleeper = Box<dyn Fn(Duration)>;

pub struct ApiClient<T: Transport = ReqwestTransport> {
    transport: T,
    base_url: String,
    site_url: String,
    date_range: String,
    page_limit: u32,
    retry: RetryPolicy,
    pacing: Pacing,
    sleep: Sleeper,
}

impl ApiClient<ReqwestTransport> {
    pub fn from_config(config: &ApiConfig) -> Result<Self, TransportError> {
        let transport = ReqwestTransport::new(config.timeout())?;
        Ok(Self::with_transport(transport, config))
    }
}

impl<T: Transport> ApiClient<T> {
    pub fn with_transport(transport: T, config: &ApiConfig) -> Self {
        tracing::info!(
            base_delay = config.base_delay_secs,
            max_retries = config.max_retries,
            "initialising api client"
        );
        Self {
            transport,
            base_url: config.base_url.clone(),
            site_url: config.site_url.trim_end_matches('/').to_string(),
            date_range: config.date_range.clone(),
            page_limit: config.page_limit,
            retry: RetryPolicy::from_config(config),
            pacing: Pacing::from_config(config),
            sleep: Box::new(std::thread::sleep),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_sleeper(mut self, sleep: Sleeper) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn page_limit(&self) -> u32 {
        self.page_limit
    }

    pub fn events_url(
        &self,
        location: &Location,
        category: Category,
        page: u32,
    ) -> Result<Url, FetchError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|_| FetchError::InvalidUrl(self.base_url.clone()))?;
        url.path_segments_mut()
            .map_err(|_| FetchError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["events-by-city", location.country.as_str(), location.city.as_str()]);
        let dates = json!({ "named": self.date_range }).to_string();
        url.query_pairs_mut()
            .append_pair("category", &category.as_slug())
            .append_pair("dates", &dates)
            .append_pair("genres", "")
            .append_pair("limit", &self.page_limit.to_string())
            .append_pair("availableOnly", "false")
            .append_pair("page", &page.to_string())
            .append_pair("sortBy", "date")
            .append_pair("sortOrder", "asc");
        Ok(url)
    }

    fn headers(&self, referer_path: &str) -> Headers {
        let mut rng = rand::thread_rng();
        let user_agent = USER_AGENTS.choose(&mut rng).copied().unwrap_or(USER_AGENTS[0]);
        tracing::debug!(user_agent, "selected user agent");
        vec![
            ("User-Agent", user_agent.to_string()),
            ("Accept", "application/json, text/plain, */*".to_string()),
            ("Accept-Language", "en-US,en;q=0.9".to_string()),
            ("Referer", format!("{}{}", self.site_url, referer_path)),
            ("Origin", self.site_url.clone()),
            ("DNT", "1".to_string()),
            ("Connection", "keep-alive".to_string()),
        ]
    }

    pub fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        self.fetch_with_referer(url, "/")
    }

    pub(crate) fn fetch_for(&self, url: &Url, location: &Location) -> Result<Value, FetchError> {
        let referer = format!("/{}/discover/{}", location.country, location.city);
        self.fetch_with_referer(url.as_str(), &referer)
    }

    fn fetch_with_referer(&self, url: &str, referer_path: &str) -> Result<Value, FetchError> {
        let delay = self.pacing.next_delay(&mut rand::thread_rng());
        tracing::debug!(delay_secs = delay.as_secs_f64(), "waiting before request");
        (self.sleep)(delay);

        let headers = self.headers(referer_path);
        let mut retries = 0u32;
        loop {
            tracing::debug!(url, attempt = retries + 1, "requesting");
            let (status, reason, retry_after) = match self.transport.get(url, &headers) {
                Ok(response) if (200..300).contains(&response.status) => {
                    return serde_json::from_str(&response.body).map_err(|err| {
                        tracing::error!(url, error = %err, "response body is not json");
                        FetchError::InvalidJson {
                            url: url.to_string(),
                            reason: err.to_string(),
                        }
                    });
                }
                Ok(response) if RetryPolicy::is_retryable(response.status) => (
                    Some(response.status),
                    format!("status {}", response.status),
                    response.retry_after,
                ),
                Ok(response) => {
                    tracing::error!(url, status = response.status, "request failed");
                    tracing::debug!(body = %truncate(&response.body, 500), "response text");
                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status: response.status,
                    });
                }
                Err(err) => (None, err.to_string(), None),
            };

            if retries >= self.retry.max_retries {
                tracing::error!(url, ?status, attempts = retries + 1, %reason, "retries exhausted");
                return Err(FetchError::RetriesExhausted {
                    url: url.to_string(),
                    attempts: retries + 1,
                    status,
                    last: reason,
                });
            }

            retries += 1;
            let wait = retry_after
                .map(|after| after.min(self.retry.max_backoff))
                .unwrap_or_else(|| self.retry.backoff(retries));
            tracing::warn!(
                url,
                ?status,
                retry = retries,
                wait_secs = wait.as_secs_f64(),
                "retrying request"
            );
            (self.sleep)(wait);
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
