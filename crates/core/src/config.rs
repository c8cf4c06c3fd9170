use serde::Deserialize;

use crate::error::CrawlError;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub max_depth: u32,
    pub queue_size: usize,
    /// Period (seconds) for background match/statistics persistence.
    pub auto_save_interval: u64,
    /// Seed bootstrap chunk size.
    pub batch_size: usize,
    pub cache_dir: String,
    pub log: LogConfig,
    pub fetch: FetchConfig,
    pub storage: StorageConfig,
    pub parser: ParserConfig,
    pub scheduler: SchedulerConfig,
    pub cdx: CdxConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub path: String,
    pub max_bytes: u64,
    pub backup_count: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    pub user_agents_file: String,
    /// Delay (seconds) held after every request before the gate slot frees.
    pub rate_limit: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub bloom_capacity: usize,
    pub bloom_error_rate: f64,
    pub cache_ttl_days: u64,
    /// Overrides the top-level `cache_dir` when set.
    #[serde(default)]
    pub cache_dir: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ParserConfig {
    pub patterns_file: String,
    /// Regexes; discovered URLs matching any of them are dropped.
    #[serde(default)]
    pub url_filters: Vec<String>,
    #[serde(default)]
    pub case_sensitive: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub seeds: Vec<String>,
    #[serde(default = "default_poison_pill")]
    pub poison_pill: String,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    #[serde(default)]
    pub max_depth: Option<u32>,
    #[serde(default)]
    pub queue_size: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CdxConfig {
    pub request_timeout: u64,
    /// Resume-key page cap; 0 disables the cap.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    pub backoff_factor: f64,
    pub target_domains_file: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_from")]
    pub from: String,
    #[serde(default = "default_to")]
    pub to: String,
    /// Scheme + host of the archive, e.g. `http://web.archive.org`.
    #[serde(default = "default_archive_host")]
    pub archive_host: String,
}

fn default_poison_pill() -> String {
    "__POISON_PILL__".to_string()
}

fn default_max_pages() -> u32 {
    100
}

fn default_page_size() -> usize {
    5000
}

fn default_from() -> String {
    "20040101000000".to_string()
}

fn default_to() -> String {
    "20041231235959".to_string()
}

fn default_archive_host() -> String {
    "http://web.archive.org".to_string()
}

impl AppConfig {
    pub fn from_yaml(raw: &str) -> Result<Self, CrawlError> {
        let config: AppConfig =
            serde_yaml::from_str(raw).map_err(|e| CrawlError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Worker-pool size; the scheduler section wins over the top level.
    pub fn worker_count(&self) -> usize {
        self.scheduler.max_concurrent.unwrap_or(self.max_concurrent)
    }

    pub fn crawl_depth(&self) -> u32 {
        self.scheduler.max_depth.unwrap_or(self.max_depth)
    }

    pub fn queue_capacity(&self) -> usize {
        self.scheduler.queue_size.unwrap_or(self.queue_size)
    }

    pub fn content_cache_dir(&self) -> &str {
        self.storage.cache_dir.as_deref().unwrap_or(&self.cache_dir)
    }

    pub fn validate(&self) -> Result<(), CrawlError> {
        validate_positive(self.max_concurrent as i64, "max_concurrent")?;
        validate_positive(self.max_retries as i64, "max_retries")?;
        validate_positive(self.max_depth as i64, "max_depth")?;
        validate_positive(self.queue_size as i64, "queue_size")?;
        validate_positive(self.auto_save_interval as i64, "auto_save_interval")?;
        validate_positive(self.batch_size as i64, "batch_size")?;
        validate_positive(self.log.max_bytes as i64, "log.max_bytes")?;
        validate_positive(self.storage.bloom_capacity as i64, "storage.bloom_capacity")?;
        validate_positive(self.storage.cache_ttl_days as i64, "storage.cache_ttl_days")?;
        validate_positive(self.cdx.request_timeout as i64, "cdx.request_timeout")?;
        validate_positive(self.cdx.page_size as i64, "cdx.page_size")?;
        if self.fetch.rate_limit <= 0.0 {
            return Err(CrawlError::Config(
                "'fetch.rate_limit' must be positive".to_string(),
            ));
        }
        if self.cdx.backoff_factor <= 0.0 {
            return Err(CrawlError::Config(
                "'cdx.backoff_factor' must be positive".to_string(),
            ));
        }
        if !(self.storage.bloom_error_rate > 0.0 && self.storage.bloom_error_rate < 1.0) {
            return Err(CrawlError::Config(
                "'storage.bloom_error_rate' must be between 0 and 1".to_string(),
            ));
        }
        if self.scheduler.poison_pill.trim().is_empty() {
            return Err(CrawlError::Config(
                "'scheduler.poison_pill' must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_positive(value: i64, name: &str) -> Result<(), CrawlError> {
    if value <= 0 {
        return Err(CrawlError::Config(format!(
            "'{name}' must be positive, got {value}"
        )));
    }
    Ok(())
}
