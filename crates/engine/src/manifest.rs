//! Service document indirection between a content reference and its
//! master playlists.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::Deserialize;
use url::Url;

use crate::{EngineError, Result};

#[derive(Debug, Default, Deserialize)]
struct StreamSource {
    #[serde(default)]
    source: Option<String>,
}

/// JSON document returned by the video service for one episode.
#[derive(Debug, Default, Deserialize)]
pub struct ServiceDocument {
    #[serde(default)]
    stitchedstream: Option<StreamSource>,
    #[serde(default)]
    content: Vec<StreamSource>,
}

impl ServiceDocument {
    pub fn parse(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| EngineError::ServiceDocument(e.to_string()))
    }

    /// One master playlist per part: the `content` sources in order, or the
    /// stitched stream when the episode is not split.
    pub fn master_urls(&self, base: &Url) -> Result<Vec<Url>> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|entry| entry.source.as_deref())
            .filter(|source| !source.is_empty())
            .collect();
        let sources = if parts.is_empty() {
            self.stitchedstream
                .as_ref()
                .and_then(|stream| stream.source.as_deref())
                .filter(|source| !source.is_empty())
                .into_iter()
                .collect()
        } else {
            parts
        };
        if sources.is_empty() {
            return Err(EngineError::NoStreams);
        }
        sources
            .into_iter()
            .map(|source| {
                base.join(source).map_err(|e| {
                    EngineError::ServiceDocument(format!("invalid stream URL '{source}': {e}"))
                })
            })
            .collect()
    }
}

/// Read-through cache of resolved master playlist URLs, keyed by content id.
///
/// Owned by the caller and handed to the resolver, so one cache can serve
/// every job.
#[derive(Clone)]
pub struct ManifestCache {
    inner: Cache<String, Arc<[Url]>>,
}

impl ManifestCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder().max_capacity(capacity).time_to_live(ttl).build(),
        }
    }

    pub async fn get(&self, content_id: &str) -> Option<Arc<[Url]>> {
        self.inner.get(content_id).await
    }

    pub async fn insert(&self, content_id: impl Into<String>, urls: Arc<[Url]>) {
        self.inner.insert(content_id.into(), urls).await;
    }

    pub async fn invalidate(&self, content_id: &str) {
        self.inner.invalidate(content_id).await;
    }
}

impl Default for ManifestCache {
    fn default() -> Self {
        Self::new(256, Duration::from_secs(30 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://media.example/services/doc?clientPlatform=desktop").unwrap()
    }

    #[test]
    fn content_sources_win_over_stitched_stream() {
        let doc = ServiceDocument::parse(
            br#"{
                "stitchedstream": {"source": "https://cdn.example/full/master.m3u8"},
                "content": [
                    {"id": "a", "source": "https://cdn.example/a/master.m3u8"},
                    {"id": "x"},
                    {"id": "b", "source": "/b/master.m3u8"}
                ]
            }"#,
        )
        .unwrap();
        let urls: Vec<String> = doc.master_urls(&base()).unwrap().iter().map(Url::to_string).collect();
        assert_eq!(
            urls,
            vec!["https://cdn.example/a/master.m3u8", "https://media.example/b/master.m3u8"]
        );
    }

    #[test]
    fn falls_back_to_stitched_stream() {
        let doc = ServiceDocument::parse(
            br#"{"stitchedstream": {"source": "https://cdn.example/full/master.m3u8"}, "content": [{"id": "a"}]}"#,
        )
        .unwrap();
        assert_eq!(doc.master_urls(&base()).unwrap().len(), 1);
    }

    #[test]
    fn empty_document_has_no_streams() {
        let doc = ServiceDocument::parse(b"{}").unwrap();
        assert!(matches!(doc.master_urls(&base()), Err(EngineError::NoStreams)));
        assert!(matches!(
            ServiceDocument::parse(b"<html>"),
            Err(EngineError::ServiceDocument(_))
        ));
    }

    #[tokio::test]
    async fn cache_round_trip() {
        let cache = ManifestCache::default();
        assert!(cache.get("ep").await.is_none());
        let urls: Arc<[Url]> = Arc::from(vec![base()]);
        cache.insert("ep", urls.clone()).await;
        assert_eq!(cache.get("ep").await, Some(urls));
        cache.invalidate("ep").await;
        assert!(cache.get("ep").await.is_none());
    }
}
