use std::collections::HashSet;
use std::time::Duration;

use tracing::{error, info, warn};

use wayscan_core::config::CdxConfig;
use wayscan_core::{urls, CrawlError};
use wayscan_storage::{Stats, VisitedSet};

/// Client for the archive's capture-index search endpoint.
pub struct CdxClient {
    http: reqwest::Client,
    /// Scheme + host, e.g. `http://web.archive.org`.
    base: String,
    max_retries: u32,
    backoff_factor: f64,
    request_timeout: u64,
    max_pages: u32,
    page_size: usize,
}

impl CdxClient {
    pub fn new(cfg: &CdxConfig, max_retries: u32) -> Result<Self, CrawlError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout))
            .build()
            .map_err(|e| CrawlError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base: cfg.archive_host.trim_end_matches('/').to_string(),
            max_retries,
            backoff_factor: cfg.backoff_factor,
            request_timeout: cfg.request_timeout,
            max_pages: cfg.max_pages,
            page_size: cfg.page_size,
        })
    }

    /// All snapshot URLs for one domain in the date window, deduplicated in
    /// first-seen order. Transient failures are retried with
    /// `backoff_factor^attempt` delays; exhaustion surfaces the last error.
    pub async fn fetch_snapshots(
        &self,
        domain: &str,
        from: &str,
        to: &str,
    ) -> Result<Vec<String>, CrawlError> {
        let mut attempt = 0u32;
        loop {
            match self.fetch_all_pages(domain, from, to).await {
                Ok(raw) => {
                    let mut seen = HashSet::new();
                    let mut unique: Vec<String> =
                        raw.into_iter().filter(|u| seen.insert(u.clone())).collect();
                    if self.max_pages > 0 {
                        unique.truncate(self.max_pages as usize * self.page_size);
                    }
                    info!(domain, count = unique.len(), "snapshots fetched");
                    return Ok(unique);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.backoff_factor.powi(attempt as i32);
                    warn!(
                        domain,
                        attempt = attempt + 1,
                        delay_secs = delay,
                        "CDX request failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Follow Resume-Key pagination until the header disappears or the page
    /// cap hits (`max_pages == 0` means uncapped).
    async fn fetch_all_pages(
        &self,
        domain: &str,
        from: &str,
        to: &str,
    ) -> Result<Vec<String>, CrawlError> {
        let mut results = Vec::new();
        let mut resume_key: Option<String> = None;
        let mut page = 0u32;
        loop {
            match self.fetch_page(domain, from, to, resume_key.as_deref()).await {
                Ok((urls, next)) => {
                    results.extend(urls);
                    page += 1;
                    match next {
                        Some(key) if self.max_pages == 0 || page < self.max_pages => {
                            resume_key = Some(key);
                        }
                        _ => break,
                    }
                }
                // Mid-pagination garbage keeps what is already collected; a
                // malformed first page fails the whole attempt.
                Err(CrawlError::MalformedCdx(msg)) if page > 0 => {
                    warn!(domain, page, "pagination stopped on malformed payload: {}", msg);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }

    async fn fetch_page(
        &self,
        domain: &str,
        from: &str,
        to: &str,
        resume_key: Option<&str>,
    ) -> Result<(Vec<String>, Option<String>), CrawlError> {
        let endpoint = format!("{}/cdx/search/cdx", self.base);
        let mut query: Vec<(&str, String)> = vec![
            ("url", format!("{domain}/*")),
            ("matchType", "domain".to_string()),
            ("from", from.to_string()),
            ("to", to.to_string()),
            ("output", "json".to_string()),
            ("fl", "timestamp,original,statuscode,mimetype".to_string()),
            ("filter", "statuscode:200".to_string()),
            ("filter", "mimetype:text/html".to_string()),
            ("collapse", "urlkey".to_string()),
            ("limit", self.page_size.to_string()),
            ("showResumeKey", "true".to_string()),
        ];
        if let Some(key) = resume_key {
            query.push(("resumeKey", key.to_string()));
        }

        let response = self
            .http
            .get(&endpoint)
            .query(&query)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status().as_u16();
        if status == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            warn!(domain, retry_after, "CDX rate limited");
            tokio::time::sleep(Duration::from_secs(retry_after)).await;
            return Err(CrawlError::RateLimited(retry_after));
        }
        if status != 200 {
            return Err(CrawlError::Status(status));
        }

        let next_key = response
            .headers()
            .get("Resume-Key")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        // The body is JSON even when Content-Type claims otherwise.
        let body = response.text().await.map_err(|e| self.map_transport(e))?;
        let rows: Vec<Vec<String>> = serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(120).collect();
            CrawlError::MalformedCdx(format!("{e} (body: {preview:?})"))
        })?;

        let urls = rows
            .iter()
            .skip(1)
            .filter_map(|row| {
                let timestamp = row.first()?;
                let original = row.get(1)?;
                Some(urls::build_snapshot_url(&self.base, timestamp, original))
            })
            .collect();
        Ok((urls, next_key))
    }

    fn map_transport(&self, e: reqwest::Error) -> CrawlError {
        if e.is_timeout() {
            CrawlError::Timeout(self.request_timeout)
        } else {
            CrawlError::Network(e.to_string())
        }
    }
}

/// Per-domain seed bootstrap: index queries, visited filtering, statistics.
pub struct CdxSeeder {
    client: CdxClient,
    domains: Vec<String>,
    from: String,
    to: String,
}

impl CdxSeeder {
    pub fn new(cfg: &CdxConfig, max_retries: u32) -> Result<Self, CrawlError> {
        let domains = load_domains(&cfg.target_domains_file)?;
        Ok(Self {
            client: CdxClient::new(cfg, max_retries)?,
            domains,
            from: cfg.from.clone(),
            to: cfg.to.clone(),
        })
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// Snapshot URLs not yet visited, across every target domain. A failing
    /// domain lands in `failed_domains` and contributes nothing; the rest
    /// of the bootstrap continues.
    pub async fn collect_seeds(&self, visited: &VisitedSet, stats: &Stats) -> Vec<String> {
        let mut all = Vec::new();
        for domain in &self.domains {
            info!(%domain, "querying CDX index");
            match self
                .client
                .fetch_snapshots(domain, &self.from, &self.to)
                .await
            {
                Ok(snapshot_urls) => {
                    let mut fresh = Vec::new();
                    for url in &snapshot_urls {
                        let key = urls::normalize(url).unwrap_or_else(|| url.clone());
                        if !visited.contains(&key).await {
                            fresh.push(url.clone());
                        }
                    }
                    info!(
                        %domain,
                        total = snapshot_urls.len(),
                        new = fresh.len(),
                        "snapshots collected"
                    );
                    stats
                        .add_snapshots(snapshot_urls.len() as u64, fresh.len() as u64)
                        .await;
                    all.extend(fresh);
                }
                Err(e) => {
                    error!(%domain, "CDX seeding failed: {}", e);
                    stats.add_failed_domain(domain).await;
                }
            }
        }
        all
    }
}

/// One host per line; blank lines and `#` comments ignored.
pub fn load_domains(path: &str) -> Result<Vec<String>, CrawlError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| CrawlError::Config(format!("target domains file '{path}': {e}")))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
