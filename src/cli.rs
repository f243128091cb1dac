//! CLI (command line interface).

use std::{fmt, str::FromStr as _};

use anyhow::anyhow;
use structopt::StructOpt;

/// CLI (command line interface) of the meeting automation worker.
#[derive(Clone, Debug, StructOpt)]
#[structopt(about = "Per-meeting video conference automation worker")]
pub struct Opts {
    /// Path to the serialized [`crate::config::BotConfig`] blob, or `-` to
    /// read it from stdin.
    #[structopt(
        short,
        long,
        env = "MEETBOT_CONFIG",
        default_value = "config.json",
        help = "Path to the bot config blob, or - for stdin",
        long_help = "Path to the serialized bot config blob, or - to read it \
                     from stdin"
    )]
    pub config: String,

    /// Verbosity level of the worker logs.
    #[structopt(
        short,
        long,
        parse(try_from_str = Self::parse_log_level),
        help = "Logs verbosity level: \
                OFF | CRIT | ERRO | WARN | INFO | DEBG | TRCE"
    )]
    pub verbose: Option<slog::Level>,
}

impl Opts {
    /// Parses CLI [`Opts`] from command line arguments.
    ///
    /// Prints the error message and quits the program in case of failure.
    #[inline]
    #[must_use]
    pub fn from_args() -> Self {
        <Self as StructOpt>::from_args()
    }

    /// Parses [`slog::Level`] from the given string.
    ///
    /// This function is required, because [`slog::Level`]'s [`FromStr`]
    /// implementation returns `()`, which is not [`Display`] as [`StructOpt`]
    /// requires.
    ///
    /// # Errors
    ///
    /// If [`slog::Level`] failed to parse from the string.
    ///
    /// [`Display`]: std::fmt::Display
    /// [`FromStr`]: std::str::FromStr
    pub fn parse_log_level(lvl: &str) -> Result<slog::Level, anyhow::Error> {
        #[allow(clippy::map_err_ignore)]
        slog::Level::from_str(lvl).map_err(|_| {
            anyhow!(
                "'{}' is invalid verbosity level, allowed levels are: \
                 OFF | CRIT | ERRO | WARN | INFO | DEBG | TRCE",
                lvl,
            )
        })
    }
}

/// Error type indicating a non-zero process exit code (§6), without
/// carrying a message of its own: the failure has already been logged and
/// reported via the status callback by the time it reaches `main`.
pub struct Failure {
    pub code: i32,
}

impl Failure {
    #[must_use]
    pub const fn with_code(code: i32) -> Self {
        Self { code }
    }
}

impl fmt::Debug for Failure {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "")
    }
}

impl From<()> for Failure {
    #[inline]
    fn from(_: ()) -> Self {
        Self::with_code(1)
    }
}
