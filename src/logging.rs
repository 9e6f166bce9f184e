use log::LevelFilter;
use simplelog::{Config, WriteLogger};
use std::fs::File;

/// File-backed logger so diagnostics never pollute the UCI stdout stream.
/// Failing to create the log file just means no logging.
pub fn init_logging() {
    if let Ok(file) = File::create("aurora.log") {
        let _ = WriteLogger::init(LevelFilter::Info, Config::default(), file);
        log::info!("logger initialized");
    }
}
