//! Logger initialisation
//!
//! Records are written to stdout with coloured level tags and to the session's log file with plain
//! tags, both stamped with the number of seconds since the session epoch.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use colored::{ColoredString, Colorize};
use fern::{Dispatch, FormatCallback};
use log::{self, info, Record};
use std::fmt::Arguments;
use thiserror::Error;

// Internal imports
use crate::session;

// Re-exports
pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Dependencies which are too chatty below `INFO`.
const QUIET_TARGETS: [&str; 2] = ["rustyline", "tokio"];

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Expected a log level of at least `INFO`, found `{0}`")]
    InvalidMinLogLevel(log::LevelFilter),

    #[error("Error initialising the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("An error occurred while setting up the logger: {0}")]
    FernInitError(log::SetLoggerError)
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
///
/// # Notes
///
/// - `min_level` must be at least `log::Level::Info`, so that transitions of
///   the controller are always recorded.
///
/// # Safety
///
/// - This function must only be called once to prevent corrupting logs.
pub fn logger_init(
    min_level: LevelFilter,
    session: &session::Session
) -> Result<(), LoggerInitError> {

    if min_level < log::Level::Info {
        return Err(LoggerInitError::InvalidMinLogLevel(min_level))
    }

    let log_file = fern::log_file(session.log_file_path.clone())
        .map_err(LoggerInitError::LogFileInitError)?;

    let mut root = Dispatch::new().level(min_level);
    for target in QUIET_TARGETS.iter() {
        root = root.level_for(*target, LevelFilter::Info);
    }

    root
        .chain(Dispatch::new()
            .format(|out, message, record| {
                format_record(out, message, record, colour_tag(record.level()))
            })
            .chain(std::io::stdout()))
        .chain(Dispatch::new()
            .format(|out, message, record| {
                format_record(out, message, record, plain_tag(record.level()))
            })
            .chain(log_file))
        .apply()
        .map_err(LoggerInitError::FernInitError)?;

    info!("Logging initialised");
    info!("    Session epoch: {}", session::get_epoch());
    info!("    Log level: {:?}", min_level);
    info!("    Log file path: {:?}", session.log_file_path);

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Format a single record, including the target at debug and trace levels.
fn format_record<T: std::fmt::Display>(
    out: FormatCallback,
    message: &Arguments,
    record: &Record,
    tag: T
) {
    if record.level() > log::Level::Info {
        out.finish(format_args!(
            "[{:10.6} {}] {}: {}",
            session::get_elapsed_seconds(),
            tag,
            record.target(),
            message
        ))
    }
    else {
        out.finish(format_args!(
            "[{:10.6} {}] {}",
            session::get_elapsed_seconds(),
            tag,
            message
        ))
    }
}

/// Tag for a level, as written to the log file.
fn plain_tag(level: log::Level) -> &'static str {
    match level {
        log::Level::Trace => "TRC",
        log::Level::Debug => "DBG",
        log::Level::Info  => "INF",
        log::Level::Warn  => "WRN",
        log::Level::Error => "ERR"
    }
}

/// Tag for a level, as written to the terminal.
fn colour_tag(level: log::Level) -> ColoredString {
    let tag = plain_tag(level);

    match level {
        log::Level::Trace => tag.dimmed().italic(),
        log::Level::Debug => tag.dimmed(),
        log::Level::Info  => tag.normal(),
        log::Level::Warn  => tag.yellow(),
        log::Level::Error => tag.red().bold()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tags() {
        assert_eq!(plain_tag(log::Level::Warn), "WRN");

        // Colouring never changes the text of the tag
        colored::control::set_override(false);
        assert_eq!(colour_tag(log::Level::Error).to_string(), "ERR");
        colored::control::unset_override();
    }
}
