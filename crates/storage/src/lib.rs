pub mod cache;
pub mod matches;
pub mod stats;
pub mod visited;

pub use cache::ContentCache;
pub use matches::MatchStore;
pub use stats::Stats;
pub use visited::VisitedSet;

use std::path::Path;

use wayscan_core::CrawlError;

/// Write `contents` to `path` via a sibling temp file and rename, so readers
/// only ever observe complete documents.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CrawlError> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
