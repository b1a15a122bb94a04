//! Single image downloads with skip-if-present semantics and bounded retries.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::stream::StreamExt;
use reqwest::{Client, Response, StatusCode};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tracing::{debug, instrument};

use crate::yandere::error::{DownloaderError, DownloaderResult};
use crate::yandere::events::EventEmitter;
use crate::yandere::query::{DownloadTask, ErrorKind, Outcome};

/// Suffix of the staging file a body is streamed into before it is renamed into place.
const STAGING_SUFFIX: &str = ".part";

/// Downloads one remote image to one local path.
#[derive(Debug, Clone)]
pub(crate) struct ImageFetcher {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl ImageFetcher {
    /// Creates a fetcher that makes at most `max_retries + 1` attempts per image.
    pub(crate) fn new(client: Client, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            client,
            max_retries,
            retry_delay,
        }
    }

    /// Downloads `task.source_url` to `task.destination`.
    ///
    /// A file already present at the destination is taken as done and no request
    /// is made. Failures never escape; they are logged and folded into the
    /// returned [Outcome].
    #[instrument(skip(self, task, events), fields(post_id = task.post_id))]
    pub(crate) async fn fetch_image(&self, mut task: DownloadTask, events: &EventEmitter) -> Outcome {
        let file = task.destination.display().to_string();

        if fs::try_exists(&task.destination).await.unwrap_or(false) {
            events.info(format!("Skipping download, file already exists:\n{}", file));
            return Outcome::already_present(task);
        }

        loop {
            match self.attempt(&task).await {
                Ok(bytes) => {
                    debug!("Wrote {} bytes to {}", bytes, file);
                    return Outcome::downloaded(task);
                }
                Err(e) => {
                    events.warn(format!("Error while downloading {}: {}", file, e));
                }
            }

            if task.attempt >= self.max_retries {
                break;
            }

            task.attempt += 1;
            events.info(format!(
                "Retrying download of {} (Attempt {}/{})",
                file, task.attempt, self.max_retries
            ));
            sleep(self.retry_delay).await;
        }

        events.error(format!(
            "Failed to download {} after {} attempts.",
            file,
            task.attempt + 1
        ));
        Outcome::failed(task, ErrorKind::DownloadExhausted)
    }

    /// One GET, streamed into the staging file and renamed over the destination.
    async fn attempt(&self, task: &DownloadTask) -> DownloaderResult<u64> {
        let response = self.client.get(&task.source_url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(DownloaderError::HttpStatus(response.status().as_u16()));
        }

        let staging = staging_path(&task.destination);
        let result: DownloaderResult<u64> = async {
            let bytes = stream_to_file(response, &staging).await?;
            fs::rename(&staging, &task.destination).await?;
            Ok(bytes)
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&staging).await;
        }

        result
    }
}

/// Path of the staging file used while `destination` is being downloaded.
pub(crate) fn staging_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

/// Stream a response to a file, chunk by chunk.
async fn stream_to_file(response: Response, file_path: &Path) -> DownloaderResult<u64> {
    let mut file = File::create(file_path).await?;
    let mut stream = response.bytes_stream();
    let mut bytes_written = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }

    file.flush().await?;
    Ok(bytes_written)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::yandere::events::tests::drain;
    use crate::yandere::events::{ChannelSink, DownloadEvent};

    fn task(url: String, destination: PathBuf) -> DownloadTask {
        DownloadTask {
            post_id: 42,
            source_url: url,
            destination,
            attempt: 0,
        }
    }

    fn emitter() -> (EventEmitter, tokio::sync::mpsc::UnboundedReceiver<DownloadEvent>) {
        let (sink, rx) = ChannelSink::channel();
        (EventEmitter::new(Arc::new(sink)), rx)
    }

    #[test]
    fn test_staging_path_appends_suffix() {
        assert_eq!(staging_path(Path::new("/tmp/42.jpg")), PathBuf::from("/tmp/42.jpg.part"));
    }

    #[tokio::test]
    async fn test_fetch_image_writes_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/image/42.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let destination = dir.path().join("42.png");
        let fetcher = ImageFetcher::new(Client::new(), 3, Duration::ZERO);
        let (events, _rx) = emitter();

        let outcome = fetcher
            .fetch_image(task(format!("{}/image/42.png", server.uri()), destination.clone()), &events)
            .await;

        assert!(outcome.success);
        assert!(!outcome.already_present);
        assert_eq!(std::fs::read(&destination).unwrap(), vec![7u8; 4096]);
        assert!(!staging_path(&destination).exists());
    }

    #[tokio::test]
    async fn test_second_fetch_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/image/42.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let destination = dir.path().join("42.png");
        let fetcher = ImageFetcher::new(Client::new(), 3, Duration::ZERO);
        let (events, _rx) = emitter();
        let url = format!("{}/image/42.png", server.uri());

        let first = fetcher.fetch_image(task(url.clone(), destination.clone()), &events).await;
        let second = fetcher.fetch_image(task(url, destination), &events).await;

        assert!(first.success && !first.already_present);
        assert!(second.success && second.already_present);
    }

    #[tokio::test]
    async fn test_existing_file_is_never_overwritten() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new".to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let destination = dir.path().join("42.jpg");
        std::fs::write(&destination, b"old").unwrap();

        let fetcher = ImageFetcher::new(Client::new(), 3, Duration::ZERO);
        let (events, mut rx) = emitter();
        let outcome = fetcher
            .fetch_image(task(format!("{}/jpeg/42.jpg", server.uri()), destination.clone()), &events)
            .await;

        assert!(outcome.already_present);
        assert_eq!(std::fs::read(&destination).unwrap(), b"old");
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [DownloadEvent::Log(line)] if line.starts_with("Skipping download, file already exists")
        ));
    }

    #[tokio::test]
    async fn test_fetch_image_exhausts_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let destination = dir.path().join("42.png");
        let fetcher = ImageFetcher::new(Client::new(), 3, Duration::ZERO);
        let (events, mut rx) = emitter();

        let outcome = fetcher
            .fetch_image(task(format!("{}/image/42.png", server.uri()), destination.clone()), &events)
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::DownloadExhausted));
        assert_eq!(outcome.task.attempt, 3);
        assert!(!destination.exists());

        let events = drain(&mut rx);
        let retries = events
            .iter()
            .filter(|e| matches!(e, DownloadEvent::Log(line) if line.starts_with("Retrying download")))
            .count();
        assert_eq!(retries, 3);
        assert!(matches!(
            events.last(),
            Some(DownloadEvent::Log(line)) if line.contains("after 4 attempts")
        ));
    }

    #[tokio::test]
    async fn test_fetch_image_recovers_after_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let destination = dir.path().join("42.png");
        let fetcher = ImageFetcher::new(Client::new(), 3, Duration::ZERO);
        let (events, _rx) = emitter();

        let outcome = fetcher
            .fetch_image(task(format!("{}/image/42.png", server.uri()), destination.clone()), &events)
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.task.attempt, 1);
        assert_eq!(std::fs::read(&destination).unwrap(), b"ok");
    }

    /// Serves every connection a 200 that promises far more body than it sends, then hangs up.
    async fn truncating_server() -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100000\r\nConnection: close\r\n\r\n")
                    .await;
                let _ = socket.write_all(&[9u8; 1000]).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{}/image/42.png", addr)
    }

    #[tokio::test]
    async fn test_truncated_body_leaves_no_files() {
        let url = truncating_server().await;
        let dir = tempdir().unwrap();
        let destination = dir.path().join("42.png");
        let fetcher = ImageFetcher::new(Client::new(), 1, Duration::ZERO);
        let (events, _rx) = emitter();

        let outcome = fetcher.fetch_image(task(url, destination.clone()), &events).await;

        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::DownloadExhausted));
        assert!(!destination.exists());
        assert!(!staging_path(&destination).exists());
    }

    #[tokio::test]
    async fn test_stale_staging_file_does_not_suppress_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/image/42.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let destination = dir.path().join("42.png");
        std::fs::write(staging_path(&destination), b"half a png").unwrap();

        let fetcher = ImageFetcher::new(Client::new(), 3, Duration::ZERO);
        let (events, _rx) = emitter();
        let outcome = fetcher
            .fetch_image(task(format!("{}/image/42.png", server.uri()), destination.clone()), &events)
            .await;

        assert!(outcome.success);
        assert!(!outcome.already_present);
        assert_eq!(std::fs::read(&destination).unwrap(), b"fresh");
        assert!(!staging_path(&destination).exists());
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let fetcher = ImageFetcher::new(Client::new(), 0, Duration::ZERO);
        let (events, _rx) = emitter();

        let outcome = fetcher
            .fetch_image(task(format!("{}/x.png", server.uri()), dir.path().join("42.png")), &events)
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.task.attempt, 0);
    }
}
