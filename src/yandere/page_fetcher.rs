//! Listing page requests against the `post.json` endpoint.

use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use tokio::time::sleep;
use tracing::{debug, instrument};

use crate::yandere::error::{DownloaderError, DownloaderResult};
use crate::yandere::events::EventEmitter;
use crate::yandere::query::{Listing, SearchQuery};

/// Fetches one page of listings at a time, with a bounded number of retries.
#[derive(Debug, Clone)]
pub(crate) struct PageFetcher {
    client: Client,
    endpoint: Url,
    retries: u32,
    retry_delay: Duration,
}

impl PageFetcher {
    /// Creates a fetcher for `{base_url}/post.json`.
    ///
    /// `retries` is the number of extra attempts after the first one fails.
    pub(crate) fn new(
        client: Client,
        base_url: &str,
        retries: u32,
        retry_delay: Duration,
    ) -> DownloaderResult<Self> {
        let raw = format!("{}/post.json", base_url.trim_end_matches('/'));
        let endpoint = Url::parse(&raw).map_err(|e| DownloaderError::InvalidUrl(format!("{}: {}", raw, e)))?;

        Ok(Self {
            client,
            endpoint,
            retries,
            retry_delay,
        })
    }

    pub(crate) fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Fetches page `page` of `query`.
    ///
    /// Any network error, non-200 status or unparsable body counts as a failed
    /// attempt. After the retry budget is spent the last error is returned and
    /// the caller is expected to skip the page.
    #[instrument(skip(self, query, events), fields(tag = %query.tag()))]
    pub(crate) async fn fetch_page(
        &self,
        query: &SearchQuery,
        page: u32,
        events: &EventEmitter,
    ) -> DownloaderResult<Vec<Listing>> {
        let mut attempt = 0;

        loop {
            match self.request_page(query, page, events).await {
                Ok(listings) => {
                    debug!("Page {} returned {} listings", page, listings.len());
                    return Ok(listings);
                }
                Err(e) => {
                    events.warn(format!("Error while getting JSON data: {}", e));

                    if attempt >= self.retries {
                        return Err(e);
                    }

                    attempt += 1;
                    events.info("Retrying...");
                    sleep(self.retry_delay).await;
                }
            }
        }
    }

    async fn request_page(
        &self,
        query: &SearchQuery,
        page: u32,
        events: &EventEmitter,
    ) -> DownloaderResult<Vec<Listing>> {
        let request = self
            .client
            .get(self.endpoint.clone())
            .query(&[
                ("tags", query.tag().to_string()),
                ("limit", query.page_limit().to_string()),
                ("page", page.to_string()),
            ])
            .build()?;

        events.info(format!("Requesting URL: {}", request.url()));

        let response = self.client.execute(request).await?;
        if response.status() != StatusCode::OK {
            return Err(DownloaderError::HttpStatus(response.status().as_u16()));
        }

        let body = response.bytes().await?;
        let listings = serde_json::from_slice(&body)?;
        Ok(listings)
    }
}
