use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::{EngineError, HttpConfig, Result};

/// Plain GET access to the network. Implementations must return
/// [`EngineError::Cancelled`] promptly once `token` fires.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// Body of a successful response; any other status is
    /// [`EngineError::HttpStatus`].
    async fn get(&self, url: &Url, token: &CancellationToken) -> Result<Bytes>;
}

/// `reqwest` backed [`HttpFetch`] with retries on transient failures.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    retries: u32,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: config.build_client()?,
            retries: config.retries,
            retry_delay: config.retry_delay,
        })
    }

    async fn get_once(&self, url: &Url) -> Result<Bytes> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| EngineError::network(url.as_str(), e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::http_status(url.as_str(), status.as_u16()));
        }
        response
            .bytes()
            .await
            .map_err(|e| EngineError::network(url.as_str(), e))
    }
}

#[async_trait]
impl HttpFetch for HttpClient {
    async fn get(&self, url: &Url, token: &CancellationToken) -> Result<Bytes> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                _ = token.cancelled() => return Err(EngineError::Cancelled),
                result = self.get_once(url) => result,
            };
            match result {
                Ok(body) => {
                    debug!(%url, bytes = body.len(), attempt, "fetched");
                    return Ok(body);
                }
                Err(e) if e.is_transient() && attempt <= self.retries => {
                    let delay = self.retry_delay * 2u32.saturating_pow(attempt - 1);
                    warn!(%url, attempt, ?delay, error = %e, "transient network error, retrying");
                    tokio::select! {
                        _ = token.cancelled() => return Err(EngineError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
