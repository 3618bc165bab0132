//! Temporary segment directory: file naming, resume point, durable writes.
//!
//! Segments are stored as `Seg0000.ts`, `Seg0001.aac`, ... with one global
//! index across all parts and tracks. A segment is only fetched once the
//! previous file has been synced, so on restart the files form a prefix.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Error, Result};

pub fn segment_file_name(index: usize, extension: &str) -> String {
    format!("Seg{index:04}.{extension}")
}

pub fn segment_path(dir: &Path, index: usize, extension: &str) -> PathBuf {
    dir.join(segment_file_name(index, extension))
}

/// Index to restart downloading at.
///
/// Counts the consecutive segment files present from index 0. The last of
/// them may be a partial write and the one before it is re-fetched as well,
/// so with `0..k` complete and `k` partial, downloading restarts at `k - 1`.
pub async fn resume_index(dir: &Path, extensions: &[&str]) -> Result<usize> {
    let mut present = 0usize;
    for (index, extension) in extensions.iter().enumerate() {
        match fs::try_exists(segment_path(dir, index, extension)).await {
            Ok(true) => present += 1,
            Ok(false) => break,
            Err(e) => return Err(Error::file(dir)(e)),
        }
    }
    let start = present.saturating_sub(2);
    debug!(dir = %dir.display(), present, start, "scanned segment directory");
    Ok(start)
}

/// Writes one segment and syncs it before returning.
pub async fn write_segment(dir: &Path, index: usize, extension: &str, data: &[u8]) -> Result<PathBuf> {
    let path = segment_path(dir, index, extension);
    let mut file = fs::File::create(&path).await.map_err(Error::file(&path))?;
    file.write_all(data).await.map_err(Error::file(&path))?;
    file.sync_all().await.map_err(Error::file(&path))?;
    Ok(path)
}
