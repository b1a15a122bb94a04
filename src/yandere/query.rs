//! Search queries, listings and the task/outcome types that flow between the
//! page fetcher, the worker pool and the image fetcher.

use std::fmt;
use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::{Deserialize, Deserializer};
use uuid::Uuid;

use crate::yandere::error::{DownloaderError, DownloaderResult};

/// Default number of posts requested per page.
pub const DEFAULT_PAGE_LIMIT: u32 = 40;

/// Parameters of one bulk run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    tag: String,
    start_page: u32,
    end_page: u32,
    page_limit: u32,
    prefer_original: bool,
}

impl SearchQuery {
    /// Creates a new query, rejecting inverted page ranges and a zero page limit.
    ///
    /// An empty tag is accepted and yields the API's unfiltered listing.
    pub fn new(
        tag: impl Into<String>,
        start_page: u32,
        end_page: u32,
        page_limit: u32,
        prefer_original: bool,
    ) -> DownloaderResult<Self> {
        if end_page < start_page {
            return Err(DownloaderError::InvalidQuery(format!(
                "end page {} is before start page {}",
                end_page, start_page
            )));
        }

        if page_limit == 0 {
            return Err(DownloaderError::InvalidQuery(
                "page limit must be positive".to_string(),
            ));
        }

        Ok(Self {
            tag: tag.into(),
            start_page,
            end_page,
            page_limit,
            prefer_original,
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn start_page(&self) -> u32 {
        self.start_page
    }

    pub fn end_page(&self) -> u32 {
        self.end_page
    }

    pub fn page_limit(&self) -> u32 {
        self.page_limit
    }

    pub fn prefer_original(&self) -> bool {
        self.prefer_original
    }

    /// Page numbers of this query, in the order they are processed.
    pub fn pages(&self) -> impl Iterator<Item = u32> {
        self.start_page..=self.end_page
    }
}

/// One post record returned by the listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Listing {
    pub id: u64,
    #[serde(rename = "file_url", default, deserialize_with = "null_as_empty")]
    pub original_url: String,
    #[serde(rename = "jpeg_url", default, deserialize_with = "null_as_empty")]
    pub preview_url: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Listing {
    /// The URL to download, depending on whether originals are preferred.
    pub fn source_url(&self, prefer_original: bool) -> &str {
        if prefer_original {
            &self.original_url
        } else {
            &self.preview_url
        }
    }
}

/// A single image to download, derived 1:1 from a [Listing].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub post_id: u64,
    pub source_url: String,
    pub destination: PathBuf,
    pub attempt: u32,
}

impl DownloadTask {
    /// Derives the task for `listing`, saving into `directory` as `{id}{ext}`.
    pub fn from_listing(listing: &Listing, directory: &Path, prefer_original: bool) -> Self {
        let source_url = listing.source_url(prefer_original).to_string();
        let file_name = format!("{}{}", listing.id, file_extension(&source_url));

        Self {
            post_id: listing.id,
            destination: directory.join(file_name),
            source_url,
            attempt: 0,
        }
    }
}

/// Returns the extension of the last path segment of `url`, including the leading dot.
///
/// Query strings and fragments are ignored. Anything that does not parse as an
/// absolute URL is treated as a bare path.
pub fn file_extension(url: &str) -> String {
    let segment = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .unwrap_or_default(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .unwrap_or_default()
            .to_string(),
    };

    match Path::new(&segment).extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!(".{}", ext),
        None => String::new(),
    }
}

/// Failure classes reported through events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PageFetchFailed,
    DownloadExhausted,
    SubmissionFailed,
    NoTasks,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::PageFetchFailed => write!(f, "page fetch failed"),
            ErrorKind::DownloadExhausted => write!(f, "download retries exhausted"),
            ErrorKind::SubmissionFailed => write!(f, "task submission failed"),
            ErrorKind::NoTasks => write!(f, "no tasks"),
        }
    }
}

/// Result of one image task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub task: DownloadTask,
    pub success: bool,
    /// The file was already on disk and no request was made.
    pub already_present: bool,
    pub error_kind: Option<ErrorKind>,
}

impl Outcome {
    pub fn downloaded(task: DownloadTask) -> Self {
        Self {
            task,
            success: true,
            already_present: false,
            error_kind: None,
        }
    }

    pub fn already_present(task: DownloadTask) -> Self {
        Self {
            task,
            success: true,
            already_present: true,
            error_kind: None,
        }
    }

    pub fn failed(task: DownloadTask, kind: ErrorKind) -> Self {
        Self {
            task,
            success: false,
            already_present: false,
            error_kind: Some(kind),
        }
    }
}

/// Aggregated counters of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub pages_fetched: u32,
    pub pages_skipped: u32,
    pub tasks: usize,
    pub succeeded: usize,
    pub already_present: usize,
    pub failed: usize,
    pub submission_failures: usize,
    /// Highest number of image fetches observed running at the same time.
    pub peak_workers: usize,
    pub cancelled: bool,
}

impl RunSummary {
    pub(crate) fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            ..Self::default()
        }
    }

    pub(crate) fn record(&mut self, outcome: &Outcome) {
        if outcome.success {
            self.succeeded += 1;
            if outcome.already_present {
                self.already_present += 1;
            }
        } else {
            self.failed += 1;
        }
    }
}
