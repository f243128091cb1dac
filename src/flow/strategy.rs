//! Platform strategy contract (§4.2): the six operations every platform
//! implementation provides, and the shared result/error vocabulary the
//! flow controller reasons about.

use async_trait::async_trait;
use derive_more::{Display, Error as DeriveError};

use crate::participant::ParticipantId;

/// Why admission did or did not succeed (§4.1 step 3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdmissionOutcome {
    Admitted,
    Rejected,
    Timeout,
}

/// Structured, platform-unprefixed exit reason for strategy-level failures
/// that aren't covered by [`crate::exit_detector::ExitReason`] (§6).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Display)]
pub enum StrategyReason {
    #[display(fmt = "ADMISSION_REJECTED")]
    AdmissionRejected,
    #[display(fmt = "ADMISSION_TIMEOUT")]
    AdmissionTimeout,
    #[display(fmt = "BOT_REMOVED_BY_ADMIN")]
    BotRemovedByAdmin,
    #[display(fmt = "NORMAL_COMPLETION")]
    NormalCompletion,
}

impl StrategyReason {
    #[must_use]
    pub fn with_prefix(self, prefix: &str) -> String {
        format!("{}_{}", prefix, self)
    }
}

/// A signal observed by [`PlatformStrategy::start_removal_monitor`]: the
/// meeting ended from the platform's point of view, independent of the
/// exit detector's own activity-based reasoning.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RemovalSignal {
    MeetingEnded,
    RemovedByAdmin,
    Failed,
}

/// Errors a strategy step can raise. Each is mapped by the controller to a
/// `failed` status callback and a platform-prefixed reason (§4.1 "Error
/// model").
#[derive(Debug, Display, DeriveError)]
pub enum StrategyError {
    #[display(fmt = "Failed to join meeting: {}", _0)]
    Join(String),

    #[display(fmt = "Failed to prepare instrumentation: {}", _0)]
    Prepare(String),

    #[display(fmt = "Failed to leave meeting: {}", _0)]
    Leave(String),
}

/// One participant as currently observed by the strategy: raw signals, not
/// yet run through the speaking/silent state machine (§4.5 does that).
#[derive(Clone, Debug)]
pub struct ParticipantSnapshot {
    pub id: ParticipantId,
    pub display_name: String,
    pub speaking: bool,
}

/// A push of raw observations from the platform surface (§4.2's
/// "Speakers"/"Audio" responsibilities), delivered to the controller's
/// callback as often as the strategy's own polling/observer cadence
/// produces new information — not on a fixed schedule.
#[derive(Clone, Debug, Default)]
pub struct Observation {
    /// The full current roster as observed this call, not a delta.
    pub participants: Vec<ParticipantSnapshot>,
    pub participant_list_ui_present: bool,
    /// Newly captured mono samples at the platform's native rate, if any
    /// were produced since the previous observation.
    pub audio_samples: Option<Vec<f32>>,
}

/// The six-operation contract every platform strategy implements (§4.2).
///
/// Object-safe via `async_trait` so the flow controller can hold a
/// `Box<dyn PlatformStrategy>` chosen at startup from [`crate::config::Platform`]
/// without a generic parameter threading through every layer.
///
/// Methods take `&self`, not `&mut self`: `start_recording` and
/// `start_removal_monitor` run concurrently (§4.1 step 5, "race"), so an
/// implementation holds its mutable session state (CDP page handle, SDK
/// connection, participant cache) behind its own interior mutability —
/// the same cheaply-cloneable-handle shape `chromiumoxide::Page` itself
/// uses — rather than requiring the controller to serialize access.
#[async_trait]
pub trait PlatformStrategy: Send + Sync {
    /// Navigates/authenticates and requests to join (§4.2.1–4.2.3's "Join").
    async fn join(&self) -> Result<(), StrategyError>;

    /// Waits, bounded by `timeout_ms`, for the platform to admit the bot
    /// into the meeting.
    async fn wait_for_admission(&self, timeout_ms: u64) -> Result<AdmissionOutcome, StrategyError>;

    /// Sets up instrumentation (DOM observers, WebRTC interception, SDK
    /// callbacks) concurrently with `wait_for_admission` (§4.1 step 3).
    async fn prepare(&self) -> Result<(), StrategyError>;

    /// Runs until the platform signals the meeting ended/the bot was
    /// removed, or is cancelled by the controller when
    /// `start_removal_monitor` wins the race (§4.1 step 5). Pulls
    /// participant/audio/speaker observations and forwards them to the
    /// caller via `on_observe`.
    async fn start_recording(
        &self,
        on_observe: &mut (dyn FnMut(Observation) + Send),
    ) -> Result<RemovalSignal, StrategyError>;

    /// Runs concurrently with `start_recording`, resolving independently
    /// when the platform itself reports the meeting/participant ended
    /// (§4.2.3 "Removal").
    async fn start_removal_monitor(&self) -> Result<RemovalSignal, StrategyError>;

    /// Best-effort graceful leave; called on every exit path (§4.1 step 1
    /// and step 6).
    async fn leave(&self, reason: &str) -> Result<(), StrategyError>;

    /// The sample rate `Observation::audio_samples` arrives at (§4.3's
    /// resampling stage needs to know the input rate; it is not uniformly
    /// 48 kHz across platforms — Zoom's SDK callback is a fixed 32 kHz, and
    /// its `cpal` fallback runs at whatever the host's default input device
    /// natively supports). Only meaningful once `prepare` has run.
    fn audio_sample_rate(&self) -> u32;
}
