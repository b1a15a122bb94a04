//! Bulk downloader for Moebooru style `post.json` listing APIs (yande.re and friends)
//! Pages are fetched one at a time, images are fetched in parallel through a bounded worker pool

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
mod image_fetcher;
pub mod logger;
mod page_fetcher;
pub mod query;

mod tests;

// Re-export commonly used types for convenience
pub use client::{HttpClientConfig, build_client};

pub use config::{AppConfig, ConfigError, ConfigManager, ConfigResult, init_config};

pub use coordinator::{DEFAULT_BASE_URL, Downloader, DownloaderConfig, RetryPolicy};

pub use error::{DownloaderError, DownloaderResult};

pub use events::{ChannelSink, DownloadEvent, EventSink};

pub use logger::{LoggerError, LoggerResult, init_logger};

pub use query::{
    DEFAULT_PAGE_LIMIT, DownloadTask, ErrorKind, Listing, Outcome, RunSummary, SearchQuery,
};
