use std::fmt;
use std::str::FromStr;

use crate::WebVttError;

/// Cue time with millisecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn shifted(self, offset_ms: u64) -> Self {
        Self(self.0.saturating_add(offset_ms))
    }
}

impl FromStr for Timestamp {
    type Err = WebVttError;

    /// Accepts `hh:mm:ss.ttt` (hours may exceed two digits) and `mm:ss.ttt`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WebVttError::InvalidTimestamp(s.to_string());
        let (clock, millis) = s.split_once('.').ok_or_else(invalid)?;
        if millis.len() != 3 {
            return Err(invalid());
        }
        let millis: u64 = millis.parse().map_err(|_| invalid())?;

        let fields = clock
            .split(':')
            .map(|field| field.parse::<u64>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        let (hours, minutes, seconds) = match fields[..] {
            [h, m, s] => (h, m, s),
            [m, s] => (0, m, s),
            _ => return Err(invalid()),
        };
        if minutes > 59 || seconds > 59 {
            return Err(invalid());
        }
        hours
            .checked_mul(60)
            .and_then(|m| m.checked_add(minutes))
            .and_then(|m| m.checked_mul(60))
            .and_then(|s| s.checked_add(seconds))
            .and_then(|s| s.checked_mul(1000))
            .and_then(|ms| ms.checked_add(millis))
            .map(Self)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.0 % 1000;
        let total_seconds = self.0 / 1000;
        write!(
            f,
            "{:02}:{:02}:{:02}.{:03}",
            total_seconds / 3600,
            (total_seconds / 60) % 60,
            total_seconds % 60,
            ms
        )
    }
}
