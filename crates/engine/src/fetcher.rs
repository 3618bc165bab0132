use std::sync::Arc;

use bytes::Bytes;
use hls::SegmentRef;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::{HttpFetch, Result, Stage, decrypt_segment};

/// Downloads single segments and decrypts them with the key they carry.
#[derive(Clone)]
pub struct SegmentFetcher {
    http: Arc<dyn HttpFetch>,
}

impl SegmentFetcher {
    pub fn new(http: Arc<dyn HttpFetch>) -> Self {
        Self { http }
    }

    pub async fn fetch(&self, segment: &SegmentRef, token: &CancellationToken) -> Result<Bytes> {
        let stage = Stage::Segment(segment.sequence);
        let data = self
            .http
            .get(&segment.url, token)
            .await
            .map_err(|e| e.at(stage))?;
        match &segment.key {
            Some(key) => {
                trace!(sequence = segment.sequence, bytes = data.len(), "decrypting segment");
                decrypt_segment(data, key, segment.sequence).map_err(|e| e.at(stage))
            }
            None => Ok(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use hls::{KeyMethod, MediaKey};
    use url::Url;

    use super::*;
    use crate::testing::StaticHttp;
    use crate::{EngineError, encrypt_segment};

    const URL: &str = "https://cdn.example/seg5.ts";

    fn segment(key: Option<MediaKey>) -> SegmentRef {
        SegmentRef {
            sequence: 5,
            url: Url::parse(URL).unwrap(),
            duration: Some(4.0),
            key: key.map(Arc::new),
        }
    }

    #[tokio::test]
    async fn decrypts_with_sequence_iv() {
        let key = MediaKey {
            method: KeyMethod::Aes128,
            key: [3; 16],
            iv: None,
        };
        let plaintext = vec![0x47u8; 188 * 4];
        let http = Arc::new(StaticHttp::new());
        http.insert(URL, encrypt_segment(&plaintext, &key, 5).unwrap());

        let fetcher = SegmentFetcher::new(http);
        let data = fetcher.fetch(&segment(Some(key)), &CancellationToken::new()).await.unwrap();
        assert_eq!(&data[..], &plaintext[..]);
    }

    #[tokio::test]
    async fn http_errors_carry_url_and_status() {
        let http = Arc::new(StaticHttp::new());
        http.fail(URL, 403);
        let err = SegmentFetcher::new(http)
            .fetch(&segment(None), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Segment(5)));
        assert_eq!(err.to_string(), format!("segment 5: HTTP 403 for {URL}"));
    }

    #[tokio::test]
    async fn cancelled_token_stops_fetch() {
        let http = Arc::new(StaticHttp::new());
        http.insert(URL, vec![0u8; 16]);
        let token = CancellationToken::new();
        token.cancel();
        let err = SegmentFetcher::new(http).fetch(&segment(None), &token).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }
}
