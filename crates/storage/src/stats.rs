use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use tokio::sync::Mutex;
use tracing::debug;

use wayscan_core::CrawlError;

#[derive(Default)]
struct StatsInner {
    counters: HashMap<String, u64>,
    total_snapshots: u64,
    new_snapshots: u64,
    total_urls: u64,
    failed_domains: BTreeSet<String>,
}

/// Thread-safe counter bag for the crawl. All operations are serialized
/// under one mutex.
pub struct Stats {
    inner: Mutex<StatsInner>,
    path: PathBuf,
}

impl Stats {
    pub fn new(path: PathBuf) -> Self {
        Self {
            inner: Mutex::new(StatsInner::default()),
            path,
        }
    }

    pub async fn increment(&self, name: &str, amount: u64) {
        let mut inner = self.inner.lock().await;
        *inner.counters.entry(name.to_string()).or_insert(0) += amount;
    }

    pub async fn get(&self, name: &str) -> u64 {
        self.inner.lock().await.counters.get(name).copied().unwrap_or(0)
    }

    pub async fn set_total_urls(&self, total: u64) {
        self.inner.lock().await.total_urls = total;
    }

    pub async fn get_total_urls(&self) -> u64 {
        self.inner.lock().await.total_urls
    }

    /// Processed share of the seed corpus, in percent. Discoveries are not
    /// part of the denominator.
    pub async fn get_progress(&self) -> f64 {
        let inner = self.inner.lock().await;
        let processed = inner.counters.get("processed_urls").copied().unwrap_or(0);
        if inner.total_urls == 0 {
            return 0.0;
        }
        processed as f64 / inner.total_urls as f64 * 100.0
    }

    pub async fn add_snapshots(&self, total: u64, new: u64) {
        let mut inner = self.inner.lock().await;
        inner.total_snapshots += total;
        inner.new_snapshots += new;
    }

    pub async fn total_snapshots(&self) -> (u64, u64) {
        let inner = self.inner.lock().await;
        (inner.total_snapshots, inner.new_snapshots)
    }

    pub async fn add_failed_domain(&self, domain: &str) {
        self.inner.lock().await.failed_domains.insert(domain.to_string());
    }

    pub async fn get_failed_domains(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .failed_domains
            .iter()
            .cloned()
            .collect()
    }

    /// Flat name → integer view of every counter and scalar, the shape of
    /// the statistics file.
    pub async fn snapshot(&self) -> BTreeMap<String, u64> {
        let inner = self.inner.lock().await;
        let mut out: BTreeMap<String, u64> = inner
            .counters
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        out.insert("total_snapshots".to_string(), inner.total_snapshots);
        out.insert("new_snapshots".to_string(), inner.new_snapshots);
        out.insert("total_urls".to_string(), inner.total_urls);
        out
    }

    pub async fn persist(&self) -> Result<(), CrawlError> {
        let snapshot = self.snapshot().await;
        let body =
            serde_json::to_vec_pretty(&snapshot).map_err(|e| CrawlError::Parse(e.to_string()))?;
        crate::write_atomic(&self.path, &body).await?;
        debug!(path = %self.path.display(), "statistics persisted");
        Ok(())
    }
}
