use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, error, info, warn};

use wayscan_core::config::FetchConfig;
use wayscan_core::{CrawlError, Fetched, PageFetcher};
use wayscan_storage::{ContentCache, Stats};

/// Replay fetcher: one shared HTTP client behind a global concurrency gate,
/// rotating User-Agents, per-request pacing, and the content cache in front
/// of the network.
pub struct Fetcher {
    client: OnceCell<reqwest::Client>,
    user_agents: Vec<String>,
    rate_limit: Duration,
    gate: Semaphore,
    max_retries: u32,
    request_timeout: Duration,
    cache: Arc<ContentCache>,
    stats: Arc<Stats>,
    closed: AtomicBool,
}

impl Fetcher {
    pub fn new(
        cfg: &FetchConfig,
        max_concurrent: usize,
        max_retries: u32,
        request_timeout_secs: u64,
        cache: Arc<ContentCache>,
        stats: Arc<Stats>,
    ) -> Self {
        let user_agents = match std::fs::read_to_string(&cfg.user_agents_file) {
            Ok(raw) => raw
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) => {
                warn!(
                    path = %cfg.user_agents_file,
                    "user-agent file unreadable, sending no UA header: {}", e
                );
                Vec::new()
            }
        };
        Self {
            client: OnceCell::new(),
            user_agents,
            rate_limit: Duration::from_secs_f64(cfg.rate_limit),
            gate: Semaphore::new(max_concurrent),
            max_retries,
            request_timeout: Duration::from_secs(request_timeout_secs),
            cache,
            stats,
            closed: AtomicBool::new(false),
        }
    }

    /// The shared client, built on first use.
    async fn client(&self) -> Result<&reqwest::Client, CrawlError> {
        self.client
            .get_or_try_init(|| async {
                reqwest::Client::builder()
                    .timeout(self.request_timeout)
                    .build()
                    .map_err(|e| CrawlError::Network(e.to_string()))
            })
            .await
    }

    fn pick_user_agent(&self) -> Option<&str> {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
    }

    /// One request. `Ok(None)` is a permanent drop (non-200, wrong media
    /// type); `Err` is a transport failure worth retrying.
    async fn try_fetch(&self, url: &str) -> Result<Option<(String, String)>, CrawlError> {
        let client = self.client().await?;
        let mut request = client.get(url);
        if let Some(ua) = self.pick_user_agent() {
            request = request.header(USER_AGENT, ua);
        }
        let response = request.send().await.map_err(|e| self.map_transport(e))?;

        let status = response.status().as_u16();
        if status != 200 {
            warn!(url, status, "replay returned non-200, dropping");
            self.stats.increment("errors", 1).await;
            return Ok(None);
        }
        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| {
                ct.split(';')
                    .next()
                    .unwrap_or("")
                    .trim()
                    .eq_ignore_ascii_case("text/html")
            })
            .unwrap_or(false);
        if !is_html {
            debug!(url, "non-HTML media type, dropping");
            self.stats.increment("errors", 1).await;
            return Ok(None);
        }
        let final_url = response.url().to_string();
        // Decodes with the declared charset, UTF-8 with replacement otherwise.
        let body = response.text().await.map_err(|e| self.map_transport(e))?;
        Ok(Some((body, final_url)))
    }

    async fn fetch_with_retries(&self, url: &str) -> Option<(String, String)> {
        for attempt in 0..=self.max_retries {
            match self.try_fetch(url).await {
                Ok(outcome) => return outcome,
                Err(e) if attempt < self.max_retries => {
                    let delay = Duration::from_secs(1u64 << attempt.min(16));
                    warn!(url, attempt, "fetch failed, retrying in {:?}: {}", delay, e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(url, attempts = attempt + 1, "fetch failed permanently: {}", e);
                    self.stats.increment("errors", 1).await;
                }
            }
        }
        None
    }

    fn map_transport(&self, e: reqwest::Error) -> CrawlError {
        if e.is_timeout() {
            CrawlError::Timeout(self.request_timeout.as_secs())
        } else {
            CrawlError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl PageFetcher for Fetcher {
    async fn fetch(&self, url: &str) -> Fetched {
        if self.closed.load(Ordering::SeqCst) {
            return Fetched::empty(url);
        }
        if let Some(body) = self.cache.get(url).await {
            return Fetched {
                body: Some(body),
                final_url: url.to_string(),
            };
        }
        let Ok(permit) = self.gate.acquire().await else {
            return Fetched::empty(url);
        };
        let outcome = self.fetch_with_retries(url).await;
        // The pacing delay holds the gate slot so the global request rate
        // stays bounded at max_concurrent / rate_limit.
        tokio::time::sleep(self.rate_limit).await;
        drop(permit);

        match outcome {
            Some((body, final_url)) => {
                if !body.is_empty() {
                    if let Err(e) = self.cache.put(url, &body).await {
                        error!(url, "cache write failed: {}", e);
                        self.stats.increment("errors", 1).await;
                    }
                }
                Fetched {
                    body: Some(body),
                    final_url,
                }
            }
            None => Fetched::empty(url),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.gate.close();
        info!("fetcher closed");
    }
}
