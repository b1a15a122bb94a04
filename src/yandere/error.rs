use std::io;

use thiserror::Error;

/// Error types for the downloader core
#[derive(Error, Debug)]
pub enum DownloaderError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Malformed listing data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected HTTP status: {0}")]
    HttpStatus(u16),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("A download is already in progress")]
    AlreadyRunning,

    #[error("Worker pool is closed")]
    PoolClosed,
}

/// Result type for downloader operations
pub type DownloaderResult<T> = Result<T, DownloaderError>;
