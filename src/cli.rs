use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "wayscan", about = "Web-archive keyword crawler")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.yaml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl archived snapshots of the configured target domains
    Crawl {
        /// Extra seed URLs (comma-separated or a file path)
        #[arg(short, long)]
        seeds: Option<String>,

        /// Maximum crawl depth override
        #[arg(short, long)]
        depth: Option<u32>,
    },
}
