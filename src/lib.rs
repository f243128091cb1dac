#![deny(
    nonstandard_style,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code
)]
#![warn(
    deprecated_in_future,
    missing_docs,
    unused_import_braces,
    unused_labels,
    unused_qualifications,
    unreachable_pub
)]
#![allow(missing_docs)]

//! Per-meeting automation worker: joins one video conference, captures
//! audio and speaker activity, streams both to a transcription gateway, and
//! leaves on a structured exit condition (§1).

pub mod audio;
pub mod cli;
pub mod config;
pub mod control_plane;
pub mod exit_detector;
pub mod flow;
pub mod logging;
pub mod participant;
pub mod platform;
pub mod session;
pub mod speaker_tracker;
pub mod status;
pub mod transcription;

use std::io;

use futures::{select, FutureExt as _};
use tokio::sync::mpsc;

use self::{
    config::{BotConfig, Platform},
    control_plane::{ControlPlane, StopFlag},
    flow::{FlowController, Outcome, PlatformStrategy},
    logging::log,
    platform::{MeetStrategy, TeamsStrategy, ZoomStrategy},
    status::StatusReporter,
};

/// Runs one worker process end to end: loads config, wires up the platform
/// strategy selected by [`Platform`], and races the flow controller against
/// [`shutdown_signal`].
///
/// # Errors
///
/// If configuration fails to load/validate, or the meeting did not end
/// normally (§6's exit-code mapping, carried in [`cli::Failure::code`]).
pub async fn run() -> Result<(), cli::Failure> {
    let opts = cli::Opts::from_args();

    // This guard should be held till the end of the program for the logger
    // to stay present in the global context.
    let _log_guard = logging::init(opts.verbose);

    let config = BotConfig::load(&opts.config).map_err(|e| {
        log::error!("Failed to load configuration: {}", e);
        cli::Failure::with_code(1)
    })?;

    log::info!("Loaded config for meeting {}", config.meeting_id);

    let gateway_url: url::Url = std::env::var("WHISPERLIVE_URL")
        .unwrap_or_else(|_| "ws://127.0.0.1:9090".into())
        .parse()
        .map_err(|e| {
            log::error!("Invalid WHISPERLIVE_URL: {}", e);
            cli::Failure::with_code(1)
        })?;
    let model = std::env::var("WHISPER_MODEL").unwrap_or_else(|_| "small".into());

    let strategy: Box<dyn PlatformStrategy> = match config.platform {
        Platform::Meet => Box::new(MeetStrategy::new(config.clone())),
        Platform::Teams => Box::new(TeamsStrategy::new(config.clone())),
        Platform::Zoom => {
            log::error!("Zoom requires a native SDK bridge injected by the host process");
            return Err(cli::Failure::with_code(1));
        }
    };

    let stop = StopFlag::new();
    let status = StatusReporter::new(config.status_callback_url.clone(), config.meeting_id.clone());
    let (reconfigure_tx, reconfigure_rx) = mpsc::unbounded_channel();

    let control_plane = ControlPlane::new(
        config.broker_url.clone(),
        &config.meeting_id,
        stop.clone(),
        reconfigure_tx,
    );

    let controller = FlowController::new(strategy, config, stop, status, gateway_url, model);

    tokio::spawn(control_plane.run_reconnecting());

    let run = controller.run(reconfigure_rx).fuse();
    tokio::pin!(run);
    let shutdown = shutdown_signal().fuse();
    tokio::pin!(shutdown);

    let outcome = select! {
        outcome = run => outcome,
        res = shutdown => {
            match res {
                Ok(s) => log::info!("Received OS signal {}", s),
                Err(e) => log::error!("Failed to listen for OS signals: {}", e),
            }
            Outcome::Completed("SHUTDOWN_SIGNAL".into())
        }
    };

    exit_code_for(&outcome)
}

/// Maps a controller [`Outcome`] to `Ok`/`Err` per §6's process exit-code
/// contract: `0` normal completion, `1` setup failure, `2` admission
/// rejected/timed out.
fn exit_code_for(outcome: &Outcome) -> Result<(), cli::Failure> {
    match outcome {
        Outcome::Completed(reason) => {
            log::info!("Worker completed: {}", reason);
            Ok(())
        }
        Outcome::SetupFailed(reason) => {
            log::error!("Worker setup failed: {}", reason);
            Err(cli::Failure::with_code(1))
        }
        Outcome::AdmissionFailed(reason) => {
            log::error!("Worker was not admitted: {}", reason);
            Err(cli::Failure::with_code(2))
        }
    }
}

/// Awaits the first OS signal for shutdown and returns its name.
///
/// # Errors
///
/// If listening to OS signals fails.
pub async fn shutdown_signal() -> io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangup = signal(SignalKind::hangup())?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut pipe = signal(SignalKind::pipe())?;
        let mut quit = signal(SignalKind::quit())?;
        let mut terminate = signal(SignalKind::terminate())?;

        Ok(futures::select! {
            _ = hangup.recv().fuse() => "SIGHUP",
            _ = interrupt.recv().fuse() => "SIGINT",
            _ = pipe.recv().fuse() => "SIGPIPE",
            _ = quit.recv().fuse() => "SIGQUIT",
            _ = terminate.recv().fuse() => "SIGTERM",
        })
    }

    #[cfg(not(unix))]
    {
        use tokio::signal;

        signal::ctrl_c().await?;
        Ok("ctrl-c")
    }
}
