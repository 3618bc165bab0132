//! In-memory [`HttpFetch`] for tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{EngineError, HttpFetch, Result};

#[derive(Debug, Clone)]
enum Response {
    Body(Bytes),
    Status(u16),
}

/// Serves fixed bodies by URL; unknown URLs answer 404.
#[derive(Debug, Default)]
pub struct StaticHttp {
    responses: Mutex<HashMap<String, Response>>,
    requests: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl StaticHttp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits `delay` before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn insert(&self, url: impl Into<String>, body: impl Into<Bytes>) {
        self.responses
            .lock()
            .insert(url.into(), Response::Body(body.into()));
    }

    pub fn fail(&self, url: impl Into<String>, status: u16) {
        self.responses
            .lock()
            .insert(url.into(), Response::Status(status));
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|r| *r == url).count()
    }
}

#[async_trait]
impl HttpFetch for StaticHttp {
    async fn get(&self, url: &Url, token: &CancellationToken) -> Result<Bytes> {
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = token.cancelled() => return Err(EngineError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        self.requests.lock().push(url.to_string());
        let response = self.responses.lock().get(url.as_str()).cloned();
        match response {
            Some(Response::Body(body)) => Ok(body),
            Some(Response::Status(status)) => Err(EngineError::http_status(url.as_str(), status)),
            None => Err(EngineError::http_status(url.as_str(), 404)),
        }
    }
}
