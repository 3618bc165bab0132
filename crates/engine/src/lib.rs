//! Network side of episode downloads: service document indirection, HLS
//! playlist resolution with rendition selection, and segment fetching with
//! AES-128 decryption.

mod config;
mod decryption;
mod error;
mod fetcher;
mod http;
mod manifest;
mod resolver;
mod selector;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{DEFAULT_USER_AGENT, HttpConfig, install_rustls_provider};
pub use decryption::{decrypt_segment, derive_iv, encrypt_segment};
pub use error::{EngineError, Stage};
pub use fetcher::SegmentFetcher;
pub use http::{HttpClient, HttpFetch};
pub use manifest::{ManifestCache, ServiceDocument};
pub use resolver::StreamResolver;
pub use selector::{FirstAvailable, Quality, RenditionSelector};

pub type Result<T> = std::result::Result<T, EngineError>;
