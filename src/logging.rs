use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use wayscan_core::config::LogConfig;

/// Stdout plus a plain-text log file. Size rotation happens at startup:
/// an oversized file is shifted into numbered backups before appending.
pub fn init(cfg: &LogConfig) -> Result<()> {
    let path = Path::new(&cfg.path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating log directory {}", parent.display()))?;
        }
    }
    rotate_if_oversized(path, cfg.max_bytes, cfg.backup_count)?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file)),
        )
        .init();
    Ok(())
}

/// Shift `crawler.log` -> `crawler.log.1` -> ... -> `.{backup_count}`,
/// dropping the oldest, when the live file exceeds `max_bytes`.
fn rotate_if_oversized(path: &Path, max_bytes: u64, backup_count: u32) -> Result<()> {
    let Ok(metadata) = std::fs::metadata(path) else {
        return Ok(());
    };
    if metadata.len() < max_bytes {
        return Ok(());
    }
    let name = path.display();
    for i in (1..=backup_count).rev() {
        let from = if i == 1 {
            path.to_path_buf()
        } else {
            Path::new(&format!("{name}.{}", i - 1)).to_path_buf()
        };
        let to = format!("{name}.{i}");
        if from.exists() {
            std::fs::rename(&from, &to)
                .with_context(|| format!("rotating {} -> {}", from.display(), to))?;
        }
    }
    if backup_count == 0 {
        std::fs::remove_file(path)
            .with_context(|| format!("truncating oversized log {}", path.display()))?;
    }
    Ok(())
}
