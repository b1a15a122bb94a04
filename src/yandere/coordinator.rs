//! Bulk download coordinator.
//!
//! Walks the page range of a [SearchQuery] one page at a time, fans each page's
//! listings out to a fixed-size worker pool and waits for the whole page before
//! moving on. Individual failures are logged and counted, never propagated: a
//! run always completes and always emits exactly one completion event.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};
use uuid::Uuid;

use crate::yandere::client::{HttpClientConfig, build_client};
use crate::yandere::error::{DownloaderError, DownloaderResult};
use crate::yandere::events::{EventEmitter, EventSink};
use crate::yandere::image_fetcher::ImageFetcher;
use crate::yandere::page_fetcher::PageFetcher;
use crate::yandere::query::{DownloadTask, ErrorKind, Listing, Outcome, RunSummary, SearchQuery};

/// Default listing API host.
pub const DEFAULT_BASE_URL: &str = "https://yande.re";

/// Retry budgets and delays for page and image requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts per image after the first one fails
    pub max_retries: u32,
    /// Pause between image attempts
    pub image_retry_delay: Duration,
    /// Extra attempts per listing page after the first one fails
    pub page_retries: u32,
    /// Pause between page attempts
    pub page_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            image_retry_delay: Duration::from_secs(2),
            page_retries: 1,
            page_retry_delay: Duration::from_secs(5),
        }
    }
}

/// Downloader configuration
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub base_url: String,
    /// Size of the worker pool, i.e. the maximum number of concurrent image fetches
    pub max_workers: usize,
    pub retry: RetryPolicy,
    pub http: HttpClientConfig,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            max_workers: 8,
            retry: RetryPolicy::default(),
            http: HttpClientConfig::default(),
        }
    }
}

/// Tracks how many image fetches are executing and the highest count seen.
#[derive(Debug, Default)]
struct WorkerGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl WorkerGauge {
    fn enter(self: &Arc<Self>) -> ActiveWorker {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ActiveWorker { gauge: self.clone() }
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct ActiveWorker {
    gauge: Arc<WorkerGauge>,
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        self.gauge.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Holds the single-flight flag for the duration of a run and clears it on every exit path.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Bulk image downloader. One instance runs at most one bulk download at a time.
pub struct Downloader {
    page_fetcher: PageFetcher,
    image_fetcher: Arc<ImageFetcher>,
    workers: Arc<Semaphore>,
    max_workers: usize,
    events: EventEmitter,
    running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Downloader {
    /// Create a new downloader reporting to `sink`
    pub fn new(config: DownloaderConfig, sink: Arc<dyn EventSink>) -> DownloaderResult<Self> {
        if config.max_workers == 0 {
            return Err(DownloaderError::InvalidConfig(
                "worker pool size must be positive".to_string(),
            ));
        }

        if config.max_workers > Semaphore::MAX_PERMITS {
            return Err(DownloaderError::InvalidConfig(format!(
                "worker pool size {} exceeds the maximum of {}",
                config.max_workers,
                Semaphore::MAX_PERMITS
            )));
        }

        let client = build_client(&config.http)?;
        let page_fetcher = PageFetcher::new(
            client.clone(),
            &config.base_url,
            config.retry.page_retries,
            config.retry.page_retry_delay,
        )?;
        debug!("Listing endpoint: {}", page_fetcher.endpoint());
        let image_fetcher = ImageFetcher::new(
            client,
            config.retry.max_retries,
            config.retry.image_retry_delay,
        );

        Ok(Self {
            page_fetcher,
            image_fetcher: Arc::new(image_fetcher),
            workers: Arc::new(Semaphore::new(config.max_workers)),
            max_workers: config.max_workers,
            events: EventEmitter::new(sink),
            running: AtomicBool::new(false),
            cancel: Mutex::new(None),
        })
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Whether a run is currently active on this instance.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Asks the active run to stop submitting work. Returns false when idle.
    ///
    /// Image fetches already executing finish normally and the run still completes.
    pub fn cancel(&self) -> bool {
        match self.cancel.lock().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Closes the worker pool. Every later submission fails.
    pub fn close(&self) {
        self.workers.close();
    }

    /// Downloads every image of `query` into `directory`.
    ///
    /// Fails only with [DownloaderError::AlreadyRunning] when another run is
    /// active; in that case no completion event is emitted for this call.
    pub async fn run(&self, query: &SearchQuery, directory: &Path) -> DownloaderResult<RunSummary> {
        let Some(guard) = RunGuard::acquire(&self.running) else {
            self.events.warn("A download task is already in progress...");
            return Err(DownloaderError::AlreadyRunning);
        };

        let run_id = Uuid::new_v4();
        let token = CancellationToken::new();
        *self.cancel.lock() = Some(token.clone());

        let span = info_span!("bulk_run", run_id = %run_id, tag = %query.tag());
        let summary = self
            .run_pages(query, directory, run_id, &token)
            .instrument(span)
            .await;

        *self.cancel.lock() = None;
        drop(guard);

        self.events.completed();
        Ok(summary)
    }

    async fn run_pages(
        &self,
        query: &SearchQuery,
        directory: &Path,
        run_id: Uuid,
        token: &CancellationToken,
    ) -> RunSummary {
        let mut summary = RunSummary::new(run_id);
        let gauge = Arc::new(WorkerGauge::default());

        if let Err(e) = fs::create_dir_all(directory).await {
            self.events.error(format!(
                "Unable to create download directory {}: {}",
                directory.display(),
                e
            ));
        }

        for page in query.pages() {
            if token.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let fetched = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                fetched = self.page_fetcher.fetch_page(query, page, &self.events) => fetched,
            };

            let listings = match fetched {
                Ok(listings) => {
                    summary.pages_fetched += 1;
                    listings
                }
                Err(_) => {
                    summary.pages_skipped += 1;
                    self.events.error(format!(
                        "Error downloading images on page {}. Skipping... ({})",
                        page,
                        ErrorKind::PageFetchFailed
                    ));
                    continue;
                }
            };

            let tasks = self.derive_tasks(&listings, directory, query.prefer_original());
            self.events.info(format!("Downloading images on page {}...", page));
            self.download_page(tasks, &gauge, token, &mut summary).await;
        }

        if summary.cancelled {
            self.events.warn("Download cancelled, remaining pages were not requested.");
        } else if summary.tasks == 0 {
            debug!("Run finished with {}", ErrorKind::NoTasks);
            self.events.warn("No tasks to execute. Please check if the tag you entered exists.");
        }

        summary.peak_workers = gauge.peak();
        summary
    }

    /// One task per listing; duplicate ids and listings without a usable URL are dropped.
    fn derive_tasks(
        &self,
        listings: &[Listing],
        directory: &Path,
        prefer_original: bool,
    ) -> Vec<DownloadTask> {
        let mut seen = HashSet::with_capacity(listings.len());
        let mut tasks = Vec::with_capacity(listings.len());

        for listing in listings {
            if listing.source_url(prefer_original).is_empty() {
                self.events.warn(format!("Post {} has no downloadable URL, skipping.", listing.id));
                continue;
            }

            if !seen.insert(listing.id) {
                debug!("Duplicate post {} in page listing", listing.id);
                continue;
            }

            tasks.push(DownloadTask::from_listing(listing, directory, prefer_original));
        }

        tasks
    }

    /// Submits a page's tasks to the worker pool and waits for all of them.
    async fn download_page(
        &self,
        tasks: Vec<DownloadTask>,
        gauge: &Arc<WorkerGauge>,
        token: &CancellationToken,
        summary: &mut RunSummary,
    ) {
        let mut running = JoinSet::new();

        for task in tasks {
            let acquired = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                acquired = self.workers.clone().acquire_owned() => acquired,
            };

            let permit = match acquired {
                Ok(permit) => permit,
                Err(_) => {
                    summary.submission_failures += 1;
                    self.events.error(format!(
                        "Error submitting download task for {}: {} ({})",
                        task.destination.display(),
                        DownloaderError::PoolClosed,
                        ErrorKind::SubmissionFailed
                    ));
                    continue;
                }
            };

            summary.tasks += 1;
            let fetcher = self.image_fetcher.clone();
            let events = self.events.clone();
            let gauge = gauge.clone();

            running.spawn(
                async move {
                    let active = gauge.enter();
                    let outcome = fetcher.fetch_image(task, &events).await;
                    // Leave the gauge before the permit can be handed to the next task.
                    drop(active);
                    drop(permit);
                    outcome
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(outcome) => self.report(&outcome, summary),
                Err(e) => {
                    summary.failed += 1;
                    self.events.error(format!("Error occurred while downloading images: {}", e));
                }
            }
        }
    }

    fn report(&self, outcome: &Outcome, summary: &mut RunSummary) {
        summary.record(outcome);

        let path = outcome.task.destination.display();
        match (outcome.success, outcome.already_present, outcome.error_kind) {
            (true, false, _) => self.events.info(format!("Downloaded {}", path)),
            (true, true, _) => debug!("Already present: {}", path),
            (false, _, Some(kind)) => self.events.error(format!("Skipped {}: {}", path, kind)),
            (false, _, None) => self.events.error(format!("Skipped {}", path)),
        }
    }
}
