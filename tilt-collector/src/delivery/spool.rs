//! On-disk batch staging and spooling.
//!
//! A batch is first written as a `.staging` file so the sender tool can
//! consume it as a unit. If every delivery attempt fails, the file is
//! renamed to `.batch`, which makes it a spool entry; the rename is the
//! commit point, so a crash mid-write never leaves a half-spooled batch.
//! File names sort chronologically, which gives the drain its oldest-first
//! order for free.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;
use tokio::fs;
use tracing::warn;

use crate::error::Result;

const STAGING_EXT: &str = "staging";
const BATCH_EXT: &str = "batch";

pub struct Spool {
    dir: PathBuf,
    /// Tie-breaker for batches staged within the same nanosecond.
    seq: AtomicU64,
}

impl Spool {
    /// Open the spool, creating its directory if needed.
    pub async fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            seq: AtomicU64::new(0),
        })
    }

    /// Write a batch to a uniquely named staging file.
    pub async fn stage(&self, contents: &str) -> Result<PathBuf> {
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.join(format!("{nanos:030}-{seq:06}.{STAGING_EXT}"));
        fs::write(&path, contents).await?;
        Ok(path)
    }

    /// Turn a staging file into a spool entry.
    pub async fn commit(&self, staging: &Path) -> Result<PathBuf> {
        let spooled = staging.with_extension(BATCH_EXT);
        fs::rename(staging, &spooled).await?;
        Ok(spooled)
    }

    /// Remove a file that is no longer needed. Best-effort: the batch has
    /// already been delivered (or spooled elsewhere), so a failure here only
    /// wastes disk.
    pub async fn discard(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "cannot remove spool file");
        }
    }

    /// Spool entries, oldest first.
    pub async fn entries(&self) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == BATCH_EXT) {
                entries.push(path);
            }
        }
        entries.sort();
        Ok(entries)
    }
}
