//! Thin facade over `slog` so the rest of the workspace has a single
//! logging import. Components receive a parent `Logger` and derive
//! children with `log.new(o!(...))`.

pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Drain, Logger};

use sloggers::file::FileLoggerBuilder;
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;
use std::path::Path;

fn severity(verbose: bool) -> Severity {
    match verbose {
        true => Severity::Debug,
        false => Severity::Info,
    }
}

/// Logger writing to stderr, used when running in the foreground.
pub fn terminal(verbose: bool) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(severity(verbose));
    builder.destination(Destination::Stderr);
    builder.build().expect("Error building terminal logger")
}

/// Logger appending to the supplied file.
pub fn file<P: AsRef<Path>>(path: P, verbose: bool) -> Logger {
    let mut builder = FileLoggerBuilder::new(path);
    builder.level(severity(verbose));
    builder.build().expect("Error building file logger")
}

/// Logger that swallows everything. Used in tests.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}
