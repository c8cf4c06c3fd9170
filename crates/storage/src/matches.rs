use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::sync::Mutex;
use tracing::debug;

use wayscan_core::{CrawlError, Match};

/// In-memory matches grouped by URL, persisted as one JSON document. Appends
/// for a given URL arrive in fetch order because exactly one worker owns the
/// URL at a time.
pub struct MatchStore {
    inner: Mutex<BTreeMap<String, Vec<Match>>>,
    path: PathBuf,
}

impl MatchStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
            path,
        }
    }

    pub async fn save(&self, url: &str, matches: Vec<Match>) {
        if matches.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().await;
        inner.entry(url.to_string()).or_default().extend(matches);
    }

    pub async fn url_count(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Write the whole map atomically. The document is serialized while the
    /// store mutex is held, so it is a consistent snapshot.
    pub async fn persist(&self) -> Result<(), CrawlError> {
        let body = {
            let inner = self.inner.lock().await;
            serde_json::to_vec_pretty(&*inner)
                .map_err(|e| CrawlError::Parse(e.to_string()))?
        };
        crate::write_atomic(&self.path, &body).await?;
        debug!(path = %self.path.display(), "matches persisted");
        Ok(())
    }
}
