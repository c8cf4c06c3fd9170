pub mod config;
pub mod error;
pub mod types;
pub mod urls;

pub use config::AppConfig;
pub use error::CrawlError;
pub use types::*;
