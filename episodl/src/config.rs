//! Application configuration, loaded from TOML and overridden by the CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use episodl_engine::{HttpConfig, Quality};
use hls::ContentReference;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::downloader::JobParams;
use crate::error::{Error, Result};
use crate::filename;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where finished videos and subtitles are written.
    pub output_dir: PathBuf,
    /// Parent of the per-job segment directories. Defaults to
    /// `<output_dir>/.episodl`.
    pub temp_dir: Option<PathBuf>,
    /// Jobs downloading at the same time.
    pub concurrency: usize,
    pub quality: Quality,
    /// Output name without extension; `{title}` and `{id}` are expanded.
    pub filename_template: String,
    pub video: bool,
    pub subtitles: bool,
    /// Entries kept by the manifest cache.
    pub cache_capacity: u64,
    #[serde(with = "cache_ttl_secs")]
    pub cache_ttl: Duration,
    pub http: HttpConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            temp_dir: None,
            concurrency: 2,
            quality: Quality::Best,
            filename_template: filename::DEFAULT_TEMPLATE.to_string(),
            video: true,
            subtitles: true,
            cache_capacity: 256,
            cache_ttl: Duration::from_secs(30 * 60),
            http: HttpConfig::default(),
        }
    }
}

mod cache_ttl_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(ttl.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

impl AppConfig {
    /// `<config_dir>/episodl/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("episodl").join("config.toml"))
    }

    /// Loads `path`, or the default location when `None`.
    ///
    /// An explicit path must exist; a missing default file yields the
    /// defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.is_file() => path,
                _ => {
                    debug!("no configuration file, using defaults");
                    return Ok(Self::default());
                }
            },
        };
        let text = std::fs::read_to_string(&path).map_err(Error::file(&path))?;
        let config = Self::from_toml(&text)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::config("concurrency must be at least 1"));
        }
        if !self.video && !self.subtitles {
            return Err(Error::config("nothing to download: both video and subtitles are disabled"));
        }
        Ok(())
    }

    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join(".episodl"))
    }

    /// Parameters of a job for `content`. Paths are derived from the
    /// sanitized title, so the same content maps to the same temporary
    /// directory across runs.
    pub fn job_params(&self, content: ContentReference, title: &str) -> JobParams {
        let stem = filename::render(&self.filename_template, title, &content.id);
        JobParams {
            temp_dir: self.temp_root().join(filename::sanitize_filename(&content.id)),
            video_path: self
                .video
                .then(|| self.output_dir.join(format!("{stem}.mp4"))),
            subtitle_path: self
                .subtitles
                .then(|| self.output_dir.join(format!("{stem}.vtt"))),
            quality: self.quality,
            title: title.to_string(),
            content,
        }
    }
}
