use crate::error::{Error, Result};
use simplelog::{
    ColorChoice, CombinedLogger, Config, LevelFilter, TermLogger, TerminalMode, WriteLogger,
};
use std::fs::File;

pub const LOG_FILE: &str = "envbake.log";

/// Info and above on the terminal, everything in the log file.
pub fn create_logger() -> Result<()> {
    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(
            LevelFilter::max(),
            Config::default(),
            File::create(LOG_FILE)?,
        ),
    ])
    .map_err(|error| Error::internal(format!("failed to initialize logging: {}", error)))
}
