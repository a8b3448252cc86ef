use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crate::client::{Headers, HttpResponse, Sleeper, Transport, TransportError};
use crate::config::ApiConfig;
use crate::storage::{ObjectStore, StorageError};

pub fn test_api_config() -> ApiConfig {
    ApiConfig::default()
}

/// Replays queued responses in order and records what was asked of it.
#[derive(Default)]
pub struct ScriptedTransport {
    script: RefCell<VecDeque<Result<HttpResponse, TransportError>>>,
    urls: RefCell<Vec<String>>,
    headers: RefCell<Vec<Headers>>,
}

impl ScriptedTransport {
    pub fn respond(self, status: u16, body: &str) -> Self {
        self.push(Ok(HttpResponse {
            status,
            retry_after: None,
            body: body.to_string(),
        }))
    }

    pub fn respond_retry_after(self, status: u16, after_secs: u64) -> Self {
        self.push(Ok(HttpResponse {
            status,
            retry_after: Some(Duration::from_secs(after_secs)),
            body: String::new(),
        }))
    }

    pub fn fail(self, reason: &str) -> Self {
        self.push(Err(TransportError(reason.to_string())))
    }

    fn push(self, entry: Result<HttpResponse, TransportError>) -> Self {
        self.script.borrow_mut().push_back(entry);
        self
    }

    pub fn calls(&self) -> usize {
        self.urls.borrow().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.borrow().clone()
    }

    pub fn headers(&self) -> Vec<Headers> {
        self.headers.borrow().clone()
    }
}

impl Transport for ScriptedTransport {
    fn get(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
    ) -> Result<HttpResponse, TransportError> {
        self.urls.borrow_mut().push(url.to_string());
        self.headers.borrow_mut().push(headers.to_vec());
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError("script exhausted".to_string())))
    }
}

pub fn recording_sleeper() -> (Sleeper, Rc<RefCell<Vec<Duration>>>) {
    let sleeps = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&sleeps);
    let sleeper: Sleeper = Box::new(move |duration| sink.borrow_mut().push(duration));
    (sleeper, sleeps)
}

pub struct CountingStore<S> {
    pub inner: S,
    gets: Cell<usize>,
}

impl<S> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            gets: Cell::new(0),
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.get()
    }
}

impl<S: ObjectStore> ObjectStore for CountingStore<S> {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.inner.put(key, bytes)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.gets.set(self.gets.get() + 1);
        self.inner.get(key)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(prefix)
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.exists(key)
    }
}
