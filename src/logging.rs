//! Logging tools and their initialization.
//!
//! A thin wrapper around [`slog`] with a global [`slog_scope`] logger and a
//! [`slog_stdlog`] bridge, so ordinary `log::info!`/`log::error!` call sites
//! work everywhere without threading a logger handle through every
//! function.

pub use slog::{self, Drain};
pub use slog_scope::{self as log, logger};

/// Initializes the global logger with the given verbosity `level` ([`Info`]
/// by default, if [`None`]), returning its guard that must be held for as
/// long as the process runs.
///
/// [`Info`]: slog::Level::Info
pub fn init(level: Option<slog::Level>) -> slog_scope::GlobalLoggerGuard {
    let guard = slog_scope::set_global_logger(main_logger(
        level.unwrap_or(slog::Level::Info),
    ));
    slog_stdlog::init().ok();
    guard
}

/// Creates, configures and returns the main [`Logger`] of the application.
///
/// [`Logger`]: slog::Logger
#[must_use]
pub fn main_logger(level: slog::Level) -> slog::Logger {
    use slog::Drain as _;
    use slog_async::OverflowStrategy::Drop;

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();

    let drain = drain.filter_level(level).fuse();

    let drain = slog_async::Async::new(drain)
        .overflow_strategy(Drop)
        .build()
        .fuse();

    slog::Logger::root(drain, slog::o!())
}
