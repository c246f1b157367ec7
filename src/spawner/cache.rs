// src/spawner/cache.rs

//! Advisory per-key locks for shared cache directories.
//!
//! Cache directories (container images, fetched assets) are shared across
//! tasks; a lock file per cache key prevents duplicate downloads. The lock
//! is advisory: everyone going through [`CacheLock::acquire`] serializes,
//! nothing stops an outside process from touching the cache.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::errors::Result;
use crate::task::fs_safe_identifier;

const POLL: Duration = Duration::from_millis(100);

/// Held advisory lock; released (the lock file removed) on drop.
#[derive(Debug)]
pub struct CacheLock {
    path: PathBuf,
}

impl CacheLock {
    /// Acquire the lock for `key` under `cache_dir`, waiting as needed.
    pub async fn acquire(cache_dir: impl AsRef<Path>, key: &str) -> Result<Self> {
        let cache_dir = cache_dir.as_ref();
        std::fs::create_dir_all(cache_dir)?;
        let path = cache_dir.join(format!("{}.lock", fs_safe_identifier(key)));

        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => {
                    debug!(lock = %path.display(), "cache lock acquired");
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    tokio::time::sleep(POLL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(lock = %self.path.display(), error = %e, "failed to remove cache lock");
        }
    }
}
