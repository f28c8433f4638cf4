// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use slog::{Drain, Logger};
use std::fs::File;
use std::io::Write;

/// Size of the async drain channel. Frame handling can produce bursts of
/// records while flooding, so keep plenty of headroom.
const ASYNC_CHAN_SIZE: usize = 0x8000;

/// Output format for loggers built by this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Bunyan style JSON records.
    #[default]
    Json,
    /// Human readable terminal output.
    Term,
}

/// Create a bunyan style logger writing to stdout.
pub fn init_logger() -> Logger {
    build_logger(std::io::stdout())
}

/// Create a bunyan style logger writing to the named file.
pub fn init_file_logger(filename: &str) -> Logger {
    build_logger(File::create(filename).expect("build logger"))
}

/// Create a logger in the requested format writing to stdout.
pub fn init_logger_with_format(format: LogFormat) -> Logger {
    match format {
        LogFormat::Json => init_logger(),
        LogFormat::Term => build_term_logger(),
    }
}

pub fn build_logger<W: Write + Send + 'static>(w: W) -> Logger {
    let drain = slog_bunyan::new(w).build().fuse();
    let drain = slog_async::Async::new(drain)
        .chan_size(ASYNC_CHAN_SIZE)
        .build()
        .fuse();
    slog::Logger::root(drain, slog::o!())
}

pub fn build_term_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain)
        .chan_size(ASYNC_CHAN_SIZE)
        .build()
        .fuse();
    slog::Logger::root(drain, slog::o!())
}

/// A logger that throws everything away.
pub fn discard_logger() -> Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}
