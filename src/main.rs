mod cli;
mod crawl;
mod logging;

use anyhow::Result;
use clap::Parser;
use tracing::warn;

// mimalloc keeps RSS stable under high task churn where glibc malloc
// retains freed pages.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use wayscan_core::AppConfig;

use crate::cli::{Cli, Commands};
use crate::crawl::run_crawl;

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        eprintln!("config file {} not found, using defaults", cli.config);
        include_str!("../config/default.yaml").to_string()
    });
    let mut config: AppConfig = serde_yaml::from_str(&config_str)?;

    logging::init(&config.log)?;
    config.validate()?;

    // Environment overrides for quick tuning without editing the config.
    if let Ok(v) = std::env::var("WAYSCAN_WORKERS") {
        match v.parse::<usize>() {
            Ok(n) if n > 0 && n <= 128 => config.max_concurrent = n,
            _ => warn!(value = %v, "ignoring invalid WAYSCAN_WORKERS"),
        }
    }
    if let Ok(v) = std::env::var("WAYSCAN_MAX_DEPTH") {
        match v.parse::<u32>() {
            Ok(n) if n > 0 => config.max_depth = n,
            _ => warn!(value = %v, "ignoring invalid WAYSCAN_MAX_DEPTH"),
        }
    }

    match cli.command {
        Commands::Crawl { seeds, depth } => run_crawl(config, seeds, depth).await,
    }
}
