use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Error};
use chrono::{Local, NaiveDate};
use console::{Term, style};
use dialoguer::{Confirm, Input, theme::ColorfulTheme};
use tracing::{info, trace};

use yande_downloader::yandere::{ConfigManager, Downloader, RunSummary, SearchQuery};

use crate::tui::ConsoleSink;

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The authors who created the package.
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// Characters that cannot appear in a directory name on common filesystems.
const INVALID_PATH_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Everything the user chose for one run.
#[derive(Debug)]
struct RunParameters {
    query: SearchQuery,
    directory: PathBuf,
}

/// A program class that handles the flow of the downloader user experience and steps of execution.
pub(crate) struct Program {
    config_manager: ConfigManager,
    theme: ColorfulTheme,
}

impl Program {
    /// Creates a new instance of the program.
    pub(crate) fn new(config_manager: ConfigManager) -> Self {
        Self {
            config_manager,
            theme: ColorfulTheme::default(),
        }
    }

    /// Runs the downloader program.
    pub(crate) async fn run(&self) -> Result<(), Error> {
        Term::stdout().set_title("yande.re downloader");
        trace!("Starting yande.re downloader...");
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        trace!("Program Authors: {}", AUTHORS);

        if !(std::io::stdin().is_terminal() && std::io::stdout().is_terminal()) {
            println!("Warning: Not running in an interactive terminal.");
            println!("Please run this program from a proper terminal/command prompt.");
            return Ok(());
        }

        let Some(parameters) = self.prompt_parameters()? else {
            return Ok(());
        };

        std::fs::create_dir_all(&parameters.directory).with_context(|| {
            format!("Failed to create download directory {}", parameters.directory.display())
        })?;

        let config = self.config_manager.get_app_config()?;
        let downloader = Arc::new(Downloader::new(
            config.downloader_config(),
            Arc::new(ConsoleSink::new()),
        )?);

        // Ctrl-C stops the run after in-flight images finish.
        let interrupt = {
            let downloader = downloader.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, cancelling download");
                    downloader.cancel();
                }
            })
        };

        let summary = downloader.run(&parameters.query, &parameters.directory).await;
        interrupt.abort();

        self.print_summary(&summary?, &parameters.directory);

        println!("\nPress Enter to exit...");
        let _ = Term::stdout().read_line();
        Ok(())
    }

    /// Asks for the run parameters. Returns `None` when the input cannot start a run.
    fn prompt_parameters(&self) -> Result<Option<RunParameters>, Error> {
        let config = self.config_manager.get_app_config()?;

        println!("\n{}", style("yande.re Downloader").cyan().bold());

        let tag: String = Input::with_theme(&self.theme)
            .with_prompt("Search tag")
            .allow_empty(true)
            .interact_text()?;
        let tag = tag.trim().to_string();
        if tag.is_empty() {
            println!("{}", style("Please enter a search tag.").yellow());
            return Ok(None);
        }

        let start_page: u32 = Input::with_theme(&self.theme)
            .with_prompt("Start page")
            .default(1)
            .interact_text()?;

        let end_page: u32 = Input::with_theme(&self.theme)
            .with_prompt("End page")
            .default(start_page)
            .validate_with(|end: &u32| -> Result<(), String> {
                if *end >= start_page {
                    Ok(())
                } else {
                    Err(format!("End page must be at least {}", start_page))
                }
            })
            .interact_text()?;

        let prefer_original = Confirm::with_theme(&self.theme)
            .with_prompt("Download original images?")
            .default(true)
            .interact()?;

        let page_limit: u32 = Input::with_theme(&self.theme)
            .with_prompt("Images per page")
            .default(config.api.posts_per_page)
            .validate_with(|limit: &u32| -> Result<(), &str> {
                if *limit > 0 { Ok(()) } else { Err("Must be at least 1") }
            })
            .interact_text()?;

        let directory: String = Input::with_theme(&self.theme)
            .with_prompt("Download directory (leave empty for default)")
            .allow_empty(true)
            .interact_text()?;

        let directory = if directory.trim().is_empty() {
            default_directory(
                Path::new(&config.paths.download_directory),
                &tag,
                Local::now().date_naive(),
            )
        } else {
            PathBuf::from(directory.trim())
        };

        let query = SearchQuery::new(tag, start_page, end_page, page_limit, prefer_original)?;
        trace!("Run parameters: {:?} into {}", query, directory.display());

        Ok(Some(RunParameters { query, directory }))
    }

    fn print_summary(&self, summary: &RunSummary, directory: &Path) {
        println!();
        println!("{}", style("Summary").cyan().bold());
        println!("  Directory:        {}", directory.display());
        println!("  Pages fetched:    {}", summary.pages_fetched);
        println!("  Pages skipped:    {}", summary.pages_skipped);
        println!("  Images:           {}", summary.tasks);
        println!("  Downloaded:       {}", summary.succeeded - summary.already_present);
        println!("  Already present:  {}", summary.already_present);
        println!("  Failed:           {}", summary.failed + summary.submission_failures);
        if summary.cancelled {
            println!("  {}", style("Cancelled before all pages were processed").yellow());
        }
    }
}

/// Default output directory: `{base}/{YYYYMMDD}_{tag}`, with path-hostile characters replaced.
fn default_directory(base: &Path, tag: &str, date: NaiveDate) -> PathBuf {
    let safe_tag: String = tag
        .chars()
        .map(|c| if INVALID_PATH_CHARS.contains(&c) { '_' } else { c })
        .collect();
    base.join(format!("{}_{}", date.format("%Y%m%d"), safe_tag))
}
