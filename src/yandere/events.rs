//! Progress events emitted by the downloader.
//!
//! The core only knows about [EventSink]: something that accepts human readable
//! progress lines and a single completion signal per run. Front ends decide how
//! to render them.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Receiver of downloader progress.
pub trait EventSink: Send + Sync {
    /// A human readable progress or log line.
    fn log(&self, message: String);

    /// Emitted exactly once when a run reaches its terminal state.
    fn completed(&self);
}

/// Events forwarded through a [ChannelSink].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Log(String),
    Completed,
}

/// Sink that forwards every event into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<DownloadEvent>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DownloadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn log(&self, message: String) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(DownloadEvent::Log(message));
    }

    fn completed(&self) {
        let _ = self.tx.send(DownloadEvent::Completed);
    }
}

/// Severity used when mirroring an event into the tracing log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Level {
    Info,
    Warn,
    Error,
}

/// Cloneable handle the downloader passes to its workers.
///
/// Every line sent to the sink is also written to the tracing log.
#[derive(Clone)]
pub(crate) struct EventEmitter {
    sink: Arc<dyn EventSink>,
}

impl EventEmitter {
    pub(crate) fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub(crate) fn info(&self, message: impl Into<String>) {
        self.emit(Level::Info, message.into());
    }

    pub(crate) fn warn(&self, message: impl Into<String>) {
        self.emit(Level::Warn, message.into());
    }

    pub(crate) fn error(&self, message: impl Into<String>) {
        self.emit(Level::Error, message.into());
    }

    pub(crate) fn completed(&self) {
        info!("Run completed");
        self.sink.completed();
    }

    fn emit(&self, level: Level, message: String) {
        match level {
            Level::Info => info!("{}", message),
            Level::Warn => warn!("{}", message),
            Level::Error => error!("{}", message),
        }
        self.sink.log(message);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Drains everything currently buffered in the channel.
    pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<DownloadEvent>) -> Vec<DownloadEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_channel_sink_forwards_events_in_order() {
        let (sink, mut rx) = ChannelSink::channel();
        let emitter = EventEmitter::new(Arc::new(sink));

        emitter.info("first");
        emitter.warn("second");
        emitter.completed();

        assert_eq!(
            drain(&mut rx),
            vec![
                DownloadEvent::Log("first".to_string()),
                DownloadEvent::Log("second".to_string()),
                DownloadEvent::Completed,
            ]
        );
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        sink.log("nobody listening".to_string());
        sink.completed();
    }
}
