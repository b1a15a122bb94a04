use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use yande_downloader::yandere::EventSink;

/// Template of the spinner shown while a run is active.
const SPINNER_TEMPLATE: &str = "{spinner:.cyan} [{elapsed_precise}] {msg}";

/// Builds the spinner style, falling back to indicatif's default when the template is rejected.
pub(crate) fn spinner_style() -> ProgressStyle {
    match ProgressStyle::default_spinner().template(SPINNER_TEMPLATE) {
        Ok(style) => style,
        Err(err) => {
            warn!("Template error with '{}': {}. Using default spinner.", SPINNER_TEMPLATE, err);
            ProgressStyle::default_spinner()
        }
    }
}

/// Renders downloader events on the terminal: log lines scroll above a spinner.
pub(crate) struct ConsoleSink {
    progress_bar: ProgressBar,
}

impl ConsoleSink {
    pub(crate) fn new() -> Self {
        let progress_bar = ProgressBar::new_spinner();
        progress_bar.set_style(spinner_style());
        progress_bar.enable_steady_tick(Duration::from_millis(120));
        progress_bar.set_message("Starting download...");
        Self { progress_bar }
    }
}

impl EventSink for ConsoleSink {
    fn log(&self, message: String) {
        if message.starts_with("Downloading images on page") {
            self.progress_bar.set_message(message.clone());
        }
        self.progress_bar.println(message);
    }

    fn completed(&self) {
        self.progress_bar
            .finish_with_message(style("Download complete!").green().bold().to_string());
    }
}
