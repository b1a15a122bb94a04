use std::time::Duration;

use reqwest::Client;
use tracing::info;

use crate::yandere::error::DownloaderResult;

/// HTTP client configuration shared by the page and image fetchers
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// User agent string
    pub user_agent: String,
    /// Whole-request timeout. Image bodies are streamed, so keep this generous.
    pub request_timeout: Duration,
    /// Connection timeout for new connections
    pub connect_timeout: Duration,
    /// Maximum number of idle connections per host
    pub max_idle_per_host: usize,
    /// How long to keep idle connections alive
    pub idle_timeout: Duration,
    /// TCP keepalive duration
    pub tcp_keepalive: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
            max_idle_per_host: 8,
            idle_timeout: Duration::from_secs(90),
            tcp_keepalive: Duration::from_secs(60),
        }
    }
}

/// Builds the pooled client used for every request of a downloader.
pub fn build_client(config: &HttpClientConfig) -> DownloaderResult<Client> {
    let client = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.request_timeout)
        .connect_timeout(config.connect_timeout)
        .pool_max_idle_per_host(config.max_idle_per_host)
        .pool_idle_timeout(config.idle_timeout)
        .tcp_keepalive(config.tcp_keepalive)
        .tcp_nodelay(true)
        .gzip(true)
        .build()?;

    info!(
        "Initialized HTTP client: {} max idle per host, {:?} keep-alive",
        config.max_idle_per_host, config.idle_timeout
    );

    Ok(client)
}
