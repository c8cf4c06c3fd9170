use std::collections::VecDeque;
use std::path::PathBuf;

use growable_bloom_filter::GrowableBloom;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Rewrite the state file after this many fresh inserts. A crash loses at
/// most one batch of admissions, which the visited-set contract tolerates.
const PERSIST_EVERY: usize = 512;

struct VisitedInner {
    bloom: GrowableBloom,
    /// Most recent insertions in order, bounded by the filter capacity;
    /// this list is what survives restarts.
    recent: VecDeque<String>,
    capacity: usize,
    dirty: usize,
}

/// Probabilistic visited set: membership may yield false positives (the URL
/// is then skipped), never false negatives.
pub struct VisitedSet {
    inner: Mutex<VisitedInner>,
    state_path: PathBuf,
}

impl VisitedSet {
    pub fn new(capacity: usize, error_rate: f64, state_path: PathBuf) -> Self {
        Self {
            inner: Mutex::new(VisitedInner {
                bloom: GrowableBloom::new(error_rate, capacity),
                recent: VecDeque::with_capacity(capacity.min(4096)),
                capacity,
                dirty: 0,
            }),
            state_path,
        }
    }

    /// Replay the persisted insertion list into the fresh filter.
    pub async fn load(&self) {
        let raw = match tokio::fs::read_to_string(&self.state_path).await {
            Ok(raw) => raw,
            Err(_) => return,
        };
        let urls: Vec<String> = match serde_json::from_str(&raw) {
            Ok(urls) => urls,
            Err(e) => {
                error!(path = %self.state_path.display(), "unreadable visited state: {}", e);
                return;
            }
        };
        let mut inner = self.inner.lock().await;
        for url in &urls {
            inner.bloom.insert(url);
            inner.recent.push_back(url.clone());
        }
        while inner.recent.len() > inner.capacity {
            inner.recent.pop_front();
        }
        info!(count = urls.len(), "restored visited set");
    }

    /// Atomic test-and-insert. Returns true when the URL was not present;
    /// the caller may then enqueue it knowing no other task saw it fresh.
    pub async fn insert(&self, url: &str) -> bool {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            if inner.bloom.contains(url) {
                return false;
            }
            inner.bloom.insert(url);
            let owned = url.to_string();
            inner.recent.push_back(owned);
            if inner.recent.len() > inner.capacity {
                inner.recent.pop_front();
            }
            inner.dirty += 1;
            if inner.dirty >= PERSIST_EVERY {
                inner.dirty = 0;
                Some(inner.recent.iter().cloned().collect::<Vec<_>>())
            } else {
                None
            }
        };
        if let Some(urls) = snapshot {
            self.write_state(&urls).await;
        }
        true
    }

    pub async fn contains(&self, url: &str) -> bool {
        self.inner.lock().await.bloom.contains(url)
    }

    /// Flush the current insertion list regardless of the batch counter.
    pub async fn persist(&self) {
        let urls = {
            let mut inner = self.inner.lock().await;
            inner.dirty = 0;
            inner.recent.iter().cloned().collect::<Vec<_>>()
        };
        self.write_state(&urls).await;
    }

    async fn write_state(&self, urls: &[String]) {
        let body = match serde_json::to_vec(urls) {
            Ok(body) => body,
            Err(e) => {
                error!("visited state encode failed: {}", e);
                return;
            }
        };
        if let Err(e) = crate::write_atomic(&self.state_path, &body).await {
            error!(path = %self.state_path.display(), "visited state write failed: {}", e);
        } else {
            debug!(count = urls.len(), "visited state persisted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("bloom_state.json")
    }

    #[tokio::test]
    async fn insert_then_contains_never_false_negative() {
        let dir = tempfile::tempdir().unwrap();
        let visited = VisitedSet::new(1000, 0.001, state_path(&dir));
        for i in 0..200 {
            let url = format!("http://example.jp/page/{i}");
            assert!(visited.insert(&url).await);
            assert!(visited.contains(&url).await, "false negative for {url}");
        }
    }

    #[tokio::test]
    async fn insert_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let visited = VisitedSet::new(100, 0.01, state_path(&dir));
        assert!(visited.insert("http://example.jp").await);
        assert!(!visited.insert("http://example.jp").await);
        assert!(!visited.insert("http://example.jp").await);
    }

    #[tokio::test]
    async fn persisted_state_replays_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);

        let visited = VisitedSet::new(100, 0.01, path.clone());
        visited.insert("http://example.jp/a").await;
        visited.insert("http://example.jp/b").await;
        visited.persist().await;

        let restored = VisitedSet::new(100, 0.01, path);
        restored.load().await;
        assert!(restored.contains("http://example.jp/a").await);
        assert!(restored.contains("http://example.jp/b").await);
        assert!(!restored.insert("http://example.jp/a").await);
        assert!(restored.insert("http://example.jp/c").await);
    }

    #[tokio::test]
    async fn state_file_is_a_json_array_of_recent_urls() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);
        let visited = VisitedSet::new(2, 0.01, path.clone());
        visited.insert("http://example.jp/a").await;
        visited.insert("http://example.jp/b").await;
        visited.insert("http://example.jp/c").await;
        visited.persist().await;

        let raw = std::fs::read_to_string(&path).unwrap();
        let urls: Vec<String> = serde_json::from_str(&raw).unwrap();
        // Bounded to the most recent <capacity> insertions, in order.
        assert_eq!(urls, vec!["http://example.jp/b", "http://example.jp/c"]);
    }
}
