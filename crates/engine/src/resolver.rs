use std::collections::HashMap;
use std::sync::Arc;

use hls::{
    ContentReference, KeyDeclaration, MediaKey, Part, SegmentRef, Track, TrackKind,
    parse_master_playlist, parse_media_playlist,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::{EngineError, HttpFetch, ManifestCache, RenditionSelector, Result, ServiceDocument, Stage};

/// Turns a content reference into the parts of an episode.
#[derive(Clone)]
pub struct StreamResolver {
    http: Arc<dyn HttpFetch>,
    cache: Option<ManifestCache>,
}

impl StreamResolver {
    pub fn new(http: Arc<dyn HttpFetch>) -> Self {
        Self { http, cache: None }
    }

    pub fn with_cache(mut self, cache: ManifestCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Resolves every part of `reference`, choosing the video rendition of
    /// each part with `selector`.
    pub async fn resolve(
        &self,
        reference: &ContentReference,
        selector: &dyn RenditionSelector,
        token: &CancellationToken,
    ) -> Result<Vec<Part>> {
        let masters = self.master_urls(reference, token).await?;
        let mut keys = KeyStore::default();
        let mut parts = Vec::with_capacity(masters.len());
        for (index, master) in masters.iter().enumerate() {
            parts.push(self.resolve_part(index, master, selector, &mut keys, token).await?);
        }
        info!(content = %reference, parts = parts.len(), "resolved episode");
        Ok(parts)
    }

    async fn master_urls(&self, reference: &ContentReference, token: &CancellationToken) -> Result<Arc<[Url]>> {
        if reference.is_playlist() {
            return Ok(Arc::from(vec![reference.url.clone()]));
        }
        if let Some(cache) = &self.cache
            && let Some(urls) = cache.get(&reference.id).await
        {
            debug!(content = %reference.id, "manifest cache hit");
            return Ok(urls);
        }

        let urls: Arc<[Url]> = async {
            let data = self.http.get(&reference.url, token).await?;
            let document = ServiceDocument::parse(&data)?;
            Ok::<_, EngineError>(Arc::from(document.master_urls(&reference.url)?))
        }
        .await
        .map_err(|e| e.at(Stage::Manifest))?;

        if let Some(cache) = &self.cache {
            cache.insert(reference.id.clone(), urls.clone()).await;
        }
        Ok(urls)
    }

    async fn resolve_part(
        &self,
        index: usize,
        master_url: &Url,
        selector: &dyn RenditionSelector,
        keys: &mut KeyStore,
        token: &CancellationToken,
    ) -> Result<Part> {
        let master = async {
            let data = self.http.get(master_url, token).await?;
            Ok::<_, EngineError>(parse_master_playlist(&data, master_url)?)
        }
        .await
        .map_err(|e| e.at(Stage::MasterPlaylist))?;

        let rendition = selector
            .select(&master.renditions)
            .map_err(|e| e.at(Stage::RenditionSelection))?;
        info!(part = index + 1, %rendition, codecs = ?rendition.codecs, "selected rendition");

        let video = self.track(TrackKind::Video, &rendition.uri, keys, token).await?;
        let audio = match master.audio_for(&rendition).and_then(|alt| alt.uri.as_ref()) {
            Some(uri) => Some(self.track(TrackKind::Audio, uri, keys, token).await?),
            None => {
                debug!(part = index + 1, "no separate audio rendition, audio is muxed");
                None
            }
        };
        let subtitles = match master.subtitles_for(&rendition).and_then(|alt| alt.uri.as_ref()) {
            Some(uri) => Some(self.track(TrackKind::Subtitles, uri, keys, token).await?),
            None => None,
        };

        Ok(Part {
            index,
            rendition,
            video,
            audio,
            subtitles,
        })
    }

    async fn track(&self, kind: TrackKind, url: &Url, keys: &mut KeyStore, token: &CancellationToken) -> Result<Track> {
        let playlist = async {
            let data = self.http.get(url, token).await?;
            Ok::<_, EngineError>(parse_media_playlist(&data, url)?)
        }
        .await
        .map_err(|e| e.at(Stage::MediaPlaylist(kind)))?;

        let mut resolved: Vec<(Arc<KeyDeclaration>, Arc<MediaKey>)> = Vec::new();
        for declaration in playlist.keys() {
            let key = keys
                .fetch(self.http.as_ref(), &declaration, token)
                .await
                .map_err(|e| e.at(Stage::Key))?;
            resolved.push((declaration, key));
        }

        let segments = playlist
            .segments
            .into_iter()
            .map(|segment| SegmentRef {
                sequence: segment.sequence,
                url: segment.url,
                duration: segment.duration,
                key: segment.key.as_ref().and_then(|declaration| {
                    resolved
                        .iter()
                        .find(|(known, _)| Arc::ptr_eq(known, declaration))
                        .map(|(_, key)| Arc::clone(key))
                }),
            })
            .collect::<Vec<_>>();

        debug!(
            %kind,
            %url,
            segments = segments.len(),
            keys = resolved.len(),
            "parsed media playlist"
        );
        Ok(Track::new(kind, segments))
    }
}

/// Key bytes fetched so far, one request per key URI.
#[derive(Default)]
struct KeyStore {
    keys: HashMap<Url, [u8; 16]>,
}

impl KeyStore {
    async fn fetch(
        &mut self,
        http: &dyn HttpFetch,
        declaration: &KeyDeclaration,
        token: &CancellationToken,
    ) -> Result<Arc<MediaKey>> {
        let key = match self.keys.get(&declaration.uri) {
            Some(key) => *key,
            None => {
                let data = http.get(&declaration.uri, token).await?;
                let key: [u8; 16] = data.as_ref().try_into().map_err(|_| EngineError::InvalidKeyLength {
                    url: declaration.uri.to_string(),
                    len: data.len(),
                })?;
                debug!(url = %declaration.uri, "fetched key");
                self.keys.insert(declaration.uri.clone(), key);
                key
            }
        };
        Ok(Arc::new(MediaKey {
            method: declaration.method,
            key,
            iv: declaration.iv,
        }))
    }
}
