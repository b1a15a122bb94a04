use std::env::consts::{
    ARCH, DLL_EXTENSION, DLL_PREFIX, DLL_SUFFIX, EXE_EXTENSION, EXE_SUFFIX, FAMILY, OS,
};

use anyhow::Error;
use tracing::trace;

use yande_downloader::yandere::{init_config, init_logger};

use crate::program::Program;

mod program;
mod tui;

/// Directory holding `config.toml`, relative to the working directory.
const CONFIG_DIR: &str = "config";

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config_manager = init_config(CONFIG_DIR)?;
    let config = config_manager.get_app_config()?;

    // Dropping the guard flushes the file writer, so it lives until main returns.
    let _log_guard = init_logger(&config)?;
    log_system_information();

    let program = Program::new(config_manager);
    program.run().await
}

/// Logs important information about the system being used.
fn log_system_information() {
    trace!("Printing system information out into log for debug purposes...");
    trace!("ARCH:           \"{}\"", ARCH);
    trace!("DLL_EXTENSION:  \"{}\"", DLL_EXTENSION);
    trace!("DLL_PREFIX:     \"{}\"", DLL_PREFIX);
    trace!("DLL_SUFFIX:     \"{}\"", DLL_SUFFIX);
    trace!("EXE_EXTENSION:  \"{}\"", EXE_EXTENSION);
    trace!("EXE_SUFFIX:     \"{}\"", EXE_SUFFIX);
    trace!("FAMILY:         \"{}\"", FAMILY);
    trace!("OS:             \"{}\"", OS);
}
