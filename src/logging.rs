//! Console logging.
//!
//! The library only emits records through the `log` macros. Binaries that want to see them call
//! `enable_logging` once, which installs a `log4rs` console appender, and may change the level
//! later with `set_log_level`.

use log::LevelFilter;
use log4rs::{
    append::console::ConsoleAppender,
    config::{runtime::ConfigErrors, Appender, Config, Root},
    encode::pattern::PatternEncoder,
    Handle,
};
use std::sync::Mutex;

const PATTERN: &str = "{d(%H:%M:%S%.3f)} {h({l:<5})} {t} - {m}{n}";
const APPENDER: &str = "console";

static HANDLE: Mutex<Option<Handle>> = Mutex::new(None);

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid logging configuration")]
    Config(#[from] ConfigErrors),

    #[error("a logger is already installed")]
    AlreadyInstalled(#[from] log::SetLoggerError),
}

fn config(level: LevelFilter) -> Result<Config, ConfigErrors> {
    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();
    Config::builder()
        .appender(Appender::builder().build(APPENDER, Box::new(console)))
        .build(Root::builder().appender(APPENDER).build(level))
}

/// Installs the console logger at `level`. Calling it again only changes the level.
pub fn enable_logging(level: LevelFilter) -> Result<(), LoggingError> {
    let mut handle = HANDLE.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    match handle.as_ref() {
        Some(existing) => existing.set_config(config(level)?),
        None => *handle = Some(log4rs::init_config(config(level)?)?),
    }
    Ok(())
}

/// Changes the level of the logger installed by `enable_logging`. Does nothing if logging was
/// never enabled.
pub fn set_log_level(level: LevelFilter) -> Result<(), LoggingError> {
    let handle = HANDLE.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(handle) = handle.as_ref() {
        handle.set_config(config(level)?);
    }
    Ok(())
}
