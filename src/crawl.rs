use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use url::Url;

use wayscan_cdx::CdxSeeder;
use wayscan_core::{AppConfig, PageFetcher};
use wayscan_fetcher::Fetcher;
use wayscan_parser::Parser;
use wayscan_scheduler::{Scheduler, SchedulerOptions};
use wayscan_storage::{ContentCache, MatchStore, Stats, VisitedSet};

pub async fn run_crawl(
    config: AppConfig,
    seeds_arg: Option<String>,
    depth: Option<u32>,
) -> Result<()> {
    let mut config = config;
    if let Some(depth) = depth {
        config.max_depth = depth;
        config.scheduler.max_depth = Some(depth);
    }

    // Result and statistics documents live next to the log file.
    let out_dir: PathBuf = Path::new(&config.log.path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating output directory {}", out_dir.display()))?;

    let cache_dir = PathBuf::from(config.content_cache_dir());
    let stats = Arc::new(Stats::new(out_dir.join("stats.json")));
    let matches = Arc::new(MatchStore::new(out_dir.join("results.json")));
    let visited = Arc::new(VisitedSet::new(
        config.storage.bloom_capacity,
        config.storage.bloom_error_rate,
        cache_dir.join("bloom_state.json"),
    ));

    let cache = Arc::new(ContentCache::new(
        cache_dir.clone(),
        config.storage.cache_ttl_days,
    ));
    cache.ensure_dir().await?;
    visited.load().await;

    let seeder = CdxSeeder::new(&config.cdx, config.max_retries)?;
    let archive_host = Url::parse(&config.cdx.archive_host)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .with_context(|| format!("invalid cdx.archive_host '{}'", config.cdx.archive_host))?;
    let parser = Arc::new(Parser::new(
        &config.parser,
        archive_host,
        seeder.domains().to_vec(),
    )?);

    let fetcher: Arc<dyn PageFetcher> = Arc::new(Fetcher::new(
        &config.fetch,
        config.max_concurrent,
        config.max_retries,
        config.cdx.request_timeout,
        Arc::clone(&cache),
        Arc::clone(&stats),
    ));

    let mut opts = SchedulerOptions::from_config(&config);
    if let Some(seeds_arg) = seeds_arg {
        opts.seeds.extend(parse_seeds_arg(&seeds_arg)?);
    }

    let scheduler = Arc::new(Scheduler::new(
        opts,
        visited,
        matches,
        stats,
        parser,
        fetcher,
        Some(seeder),
    ));

    // First interrupt triggers one orderly shutdown; the handler task never
    // fires twice, so later signals are ignored.
    let signal_task = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupt received, shutting down");
                    scheduler.shutdown().await;
                }
                Err(e) => error!("signal handler failed: {}", e),
            }
        })
    };

    Arc::clone(&scheduler).run().await?;
    signal_task.abort();
    Ok(())
}

/// Seeds argument: a file path (one URL per line) or a comma-separated list.
fn parse_seeds_arg(arg: &str) -> Result<Vec<String>> {
    if Path::new(arg).exists() {
        let content = std::fs::read_to_string(arg)?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect())
    } else {
        Ok(arg
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }
}
