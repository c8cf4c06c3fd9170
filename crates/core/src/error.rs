use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("config error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("timeout after {0}s")]
    Timeout(u64),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("malformed CDX payload: {0}")]
    MalformedCdx(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CrawlError {
    /// Whether a retry loop may recover from this error.
    ///
    /// Malformed index payloads are excluded: the same query almost never
    /// yields a different body on the next attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CrawlError::Network(_)
                | CrawlError::Timeout(_)
                | CrawlError::Status(_)
                | CrawlError::RateLimited(_)
        )
    }
}
