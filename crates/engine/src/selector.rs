use std::fmt;
use std::str::FromStr;

use hls::Rendition;
use serde::{Deserialize, Serialize};

use crate::{EngineError, Result};

/// Picks one rendition from a list sorted best to worst.
pub trait RenditionSelector: Send + Sync {
    fn select(&self, renditions: &[Rendition]) -> Result<Rendition>;
}

impl<F> RenditionSelector for F
where
    F: Fn(&[Rendition]) -> Result<Rendition> + Send + Sync,
{
    fn select(&self, renditions: &[Rendition]) -> Result<Rendition> {
        self(renditions)
    }
}

/// Takes the first (best) rendition.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstAvailable;

impl RenditionSelector for FirstAvailable {
    fn select(&self, renditions: &[Rendition]) -> Result<Rendition> {
        renditions
            .first()
            .cloned()
            .ok_or_else(|| EngineError::NoMatchingRendition("any rendition".into()))
    }
}

/// Quality preference: the best stream, or the best one no taller than a
/// given height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Quality {
    #[default]
    Best,
    MaxHeight(u32),
}

impl Quality {
    pub const PRESETS: [Quality; 7] = [
        Quality::Best,
        Quality::MaxHeight(1080),
        Quality::MaxHeight(720),
        Quality::MaxHeight(540),
        Quality::MaxHeight(360),
        Quality::MaxHeight(288),
        Quality::MaxHeight(216),
    ];
}

impl RenditionSelector for Quality {
    fn select(&self, renditions: &[Rendition]) -> Result<Rendition> {
        let chosen = match self {
            Self::Best => renditions.first(),
            Self::MaxHeight(max) => renditions
                .iter()
                .find(|r| r.height().is_some_and(|height| height <= *max)),
        };
        chosen
            .cloned()
            .ok_or_else(|| EngineError::NoMatchingRendition(self.to_string()))
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Best => f.write_str("best"),
            Self::MaxHeight(height) => write!(f, "{height}p"),
        }
    }
}

impl FromStr for Quality {
    type Err = String;

    /// Accepts `best`, `720p` or `720`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("best") {
            return Ok(Self::Best);
        }
        let digits = s.strip_suffix(['p', 'P']).unwrap_or(s);
        match digits.parse::<u32>() {
            Ok(height) if height > 0 => Ok(Self::MaxHeight(height)),
            _ => Err(format!("invalid quality '{s}', expected 'best' or a height like 720p")),
        }
    }
}

impl TryFrom<String> for Quality {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Quality> for String {
    fn from(value: Quality) -> Self {
        value.to_string()
    }
}
