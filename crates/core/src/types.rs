use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One admission into the crawl queue. Lower `priority` is served first;
/// ties are broken by admission order inside the frontier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub priority: i64,
    pub depth: u32,
    pub url: String,
}

impl QueueItem {
    pub fn new(priority: i64, depth: u32, url: impl Into<String>) -> Self {
        Self {
            priority,
            depth,
            url: url.into(),
        }
    }
}

/// Which scan surface produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Text,
    Attr,
    Meta,
    Comment,
    Script,
    ImgSrc,
    ImgAlt,
    ImgTitle,
    Link,
}

/// One pattern hit on one scan surface of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// The literal matched substring.
    pub value: String,
    #[serde(rename = "type")]
    pub kind: MatchKind,
    /// Enclosing fragment, truncated to 500 chars with an ellipsis.
    pub context: String,
    pub timestamp: DateTime<Utc>,
}

/// Fetch outcome: `body` is `None` on any drop (error, non-200, wrong
/// content type); `final_url` is the post-redirect URL, or the request URL
/// when nothing was fetched or the body came from the cache.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub body: Option<String>,
    pub final_url: String,
}

impl Fetched {
    pub fn empty(url: impl Into<String>) -> Self {
        Self {
            body: None,
            final_url: url.into(),
        }
    }
}

/// Seam between the scheduler and the HTTP layer.
#[async_trait]
pub trait PageFetcher: Send + Sync + 'static {
    async fn fetch(&self, url: &str) -> Fetched;

    /// Release the underlying client; later fetches return empty.
    async fn close(&self);
}
