use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use wayscan_core::CrawlError;

/// On-disk body cache keyed by URL hash, with an mtime-based TTL. Expired
/// entries are deleted on read so they never influence fetch results.
pub struct ContentCache {
    dir: PathBuf,
    ttl: Duration,
}

impl ContentCache {
    pub fn new(dir: impl Into<PathBuf>, ttl_days: u64) -> Self {
        Self {
            dir: dir.into(),
            ttl: Duration::from_secs(ttl_days * 86_400),
        }
    }

    pub async fn ensure_dir(&self) -> Result<(), CrawlError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    pub fn path_for(&self, url: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        self.dir.join(format!("{:x}.html", hasher.finalize()))
    }

    pub async fn get(&self, url: &str) -> Option<String> {
        let path = self.path_for(url);
        if self.expired(&path).await {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), "stale cache entry removal failed: {}", e);
            } else {
                debug!(url, "expired cache entry removed");
            }
            return None;
        }
        match tokio::fs::read_to_string(&path).await {
            Ok(body) => {
                debug!(url, "cache hit");
                Some(body)
            }
            Err(_) => None,
        }
    }

    pub async fn put(&self, url: &str, body: &str) -> Result<(), CrawlError> {
        crate::write_atomic(&self.path_for(url), body.as_bytes()).await
    }

    /// True when the file exists and its age exceeds the TTL.
    async fn expired(&self, path: &Path) -> bool {
        let Ok(metadata) = tokio::fs::metadata(path).await else {
            return false;
        };
        let Ok(mtime) = metadata.modified() else {
            return false;
        };
        SystemTime::now()
            .duration_since(mtime)
            .map(|age| age > self.ttl)
            .unwrap_or(false)
    }
}
