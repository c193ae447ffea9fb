// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use log::LevelFilter;

use crate::config::LogLevel;
use crate::error::{Error, ErrorKind};

const fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Debug => LevelFilter::Debug,
        LogLevel::Info => LevelFilter::Info,
        LogLevel::Warning => LevelFilter::Warn,
        LogLevel::Error => LevelFilter::Error,
    }
}

/// Initialize the process logger with the configured verbosity threshold.
///
/// # Errors
///
/// Returns error if a logger is already installed.
pub fn init_log(level: LogLevel) -> Result<(), Error> {
    env_logger::Builder::new()
        .filter_level(level_filter(level))
        .format_timestamp_millis()
        .try_init()
        .map_err(|err| {
            Error::from_string(
                ErrorKind::LoggerError,
                format!("Failed to init logger, {err}"),
            )
        })
}
