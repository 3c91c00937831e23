//! Worker logging: colored stdout only.
//!
//! The worker deliberately logs to stdout because the host treats every
//! stdout line as a keepalive pong; a healthy worker producing log lines
//! is a live worker.

use crate::error::WorkerError;

use common::ErrorLocation;

use std::io::stdout;
use std::panic::Location;
use std::sync::Once;
use std::time::SystemTime;

use fern::Dispatch;
use fern::colors::Color::{Blue, Green, Magenta, Red, Yellow};
use fern::colors::ColoredLevelConfig;
use humantime::format_rfc3339;
use log::LevelFilter;

static INIT_LOGGER_ONCE: Once = Once::new();

#[cfg(debug_assertions)]
const LOG_LEVEL: LevelFilter = LevelFilter::Debug;

#[cfg(not(debug_assertions))]
const LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// Initialize the stdout logger. Safe to call more than once; only the
/// first call configures anything.
pub fn initialize() -> Result<(), WorkerError> {
    let mut result = Ok(());

    INIT_LOGGER_ONCE.call_once(|| {
        let color_configuration = ColoredLevelConfig::new()
            .debug(Blue)
            .info(Green)
            .warn(Yellow)
            .error(Red)
            .trace(Magenta);

        result = Dispatch::new()
            .level(LOG_LEVEL)
            .format(move |out, message, record| {
                out.finish(format_args!(
                    "[{date} - {level}] {message}",
                    date = format_rfc3339(SystemTime::now()),
                    level = color_configuration.color(record.level()),
                    message = message,
                ))
            })
            .chain(stdout())
            .apply()
            .map_err(|e| WorkerError::Logger {
                message: format!("Failed to initialize logger: {e}"),
                location: ErrorLocation::from(Location::caller()),
            });
    });

    result
}
