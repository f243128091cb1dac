//! Startup configuration: the serialized [`BotConfig`] blob plus the
//! environment-overridable exit-detector thresholds.
//!
//! Grounded in the teacher's `src/spec.rs`: a `config`-crate layered load
//! (file/stdin blob, then environment overrides) followed by
//! `validator::Validate`, failing fast before any side effect.

use std::{fs, path::Path, time::Duration};

use config::{Config, ConfigError, Environment, File, FileFormat};
use derive_more::{Display, Error as DeriveError, From};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use url::Url;
use validator::{Validate, ValidationError};

/// Video conferencing platform a [`BotConfig`] targets.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Meet,
    Teams,
    Zoom,
}

impl Platform {
    /// Prefix used on structured exit reasons (§6).
    #[must_use]
    pub const fn reason_prefix(self) -> &'static str {
        match self {
            Self::Meet => "GOOGLE_MEET",
            Self::Teams => "TEAMS",
            Self::Zoom => "ZOOM",
        }
    }
}

/// Transcription mode requested for this meeting.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Transcribe,
    Translate,
}

/// Timeouts governing when the worker gives up waiting on admission or on
/// participants, expressed the way the source blob sends them (milliseconds,
/// except the one field that historically arrived in seconds).
#[derive(Clone, Copy, Debug, Deserialize, Serialize, SmartDefault, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AutomaticLeaveConfig {
    #[default = 300_000]
    #[validate(range(min = 1))]
    pub waiting_room_timeout_ms: u64,

    #[default = 1_200_000]
    #[validate(range(min = 1))]
    pub no_one_joined_timeout_ms: u64,

    #[default = 10_000]
    #[validate(range(min = 1))]
    pub everyone_left_timeout_ms: u64,

    #[default = 1200]
    #[validate(range(min = 1))]
    pub startup_alone_timeout_seconds: u64,
}

/// Immutable-after-startup configuration of one worker process, one meeting.
///
/// See spec §3. Validated once at process start; validation failure is
/// fatal and occurs before any side effect (no join attempt, no status
/// callback).
#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    pub platform: Platform,

    pub meeting_url: Option<Url>,

    #[validate(length(min = 1))]
    pub native_meeting_id: String,

    #[validate(length(min = 1))]
    pub bot_name: String,

    #[validate(length(min = 1))]
    pub auth_token: String,

    #[validate(length(min = 1))]
    pub connection_id: String,

    #[validate(length(min = 1))]
    pub meeting_id: String,

    pub broker_url: Url,

    #[validate]
    pub automatic_leave: AutomaticLeaveConfig,

    pub language: Option<String>,

    pub task: Option<Task>,

    pub transcribe_enabled: Option<bool>,

    pub recording_enabled: Option<bool>,

    pub voice_agent_enabled: Option<bool>,

    #[validate(custom = "validate_reconnect_interval")]
    pub reconnect_interval_ms: Option<u64>,

    pub status_callback_url: Option<Url>,
}

fn validate_reconnect_interval(ms: &Option<u64>) -> Result<(), ValidationError> {
    match ms {
        Some(0) => Err(ValidationError::new("reconnect_interval_ms must be > 0")),
        _ => Ok(()),
    }
}

impl BotConfig {
    /// Loads and validates a [`BotConfig`] from the serialized blob at
    /// `path` (or `-` for stdin), layering environment variable overrides
    /// under the `MEETBOT_` prefix on top, matching the teacher's
    /// `Spec::parse` pattern of `config`-crate file-then-env layering.
    ///
    /// # Errors
    ///
    /// If the blob cannot be read/parsed, or fails [`Validate::validate`].
    pub fn load(path: &str) -> Result<Self, LoadError> {
        let raw = if path == "-" {
            use std::io::Read as _;
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(LoadError::Io)?;
            buf
        } else {
            fs::read_to_string(Path::new(path)).map_err(LoadError::Io)?
        };

        let cfg: Self = Config::builder()
            .add_source(File::from_str(&raw, FileFormat::Json))
            .add_source(Environment::with_prefix("MEETBOT").separator("__"))
            .build()?
            .try_deserialize()?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Whether transcription streaming is enabled for this meeting.
    #[must_use]
    pub fn transcribe_enabled(&self) -> bool {
        self.transcribe_enabled.unwrap_or(true)
    }

    /// Resolved effective reconnect base delay, bounded at 1000ms (§4.4).
    #[must_use]
    pub fn reconnect_base_delay(&self) -> Duration {
        let ms = self.reconnect_interval_ms.unwrap_or(1000).min(1000);
        Duration::from_millis(ms)
    }
}

/// Possible errors of [`BotConfig::load`].
#[derive(Debug, Display, DeriveError, From)]
pub enum LoadError {
    #[display(fmt = "Failed to read configuration blob: {}", _0)]
    Io(std::io::Error),

    #[display(fmt = "Failed to parse configuration: {}", _0)]
    Parse(ConfigError),

    #[display(fmt = "Configuration failed validation: {}", _0)]
    Invalid(validator::ValidationErrors),
}

/// Exit-detector thresholds (§4.6), all overridable via environment,
/// defaults as specified.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(rename_all = "camelCase")]
pub struct ExitDetectorConfig {
    #[default = 5]
    pub speech_activation_threshold_seconds: u64,

    #[default = 300]
    pub dead_meeting_timeout_seconds: u64,

    #[default = 600]
    pub absolute_silence_timeout_seconds: u64,

    #[default = 120]
    pub recent_speech_threshold_seconds: u64,

    #[default = 180]
    pub silent_participants_countdown_seconds: u64,

    #[default = 1200]
    pub startup_alone_timeout_seconds: u64,

    #[default = 10]
    pub everyone_left_timeout_seconds: u64,
}

impl ExitDetectorConfig {
    /// Loads overrides from the process environment, falling back to the
    /// defaults in spec §4.6 for anything not set.
    ///
    /// # Errors
    ///
    /// If an environment variable is present but fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(Environment::with_prefix("MEETBOT_EXIT"))
            .build()?
            .try_deserialize()
    }
}

impl Default for ExitDetectorConfig {
    fn default() -> Self {
        Self {
            speech_activation_threshold_seconds: 5,
            dead_meeting_timeout_seconds: 300,
            absolute_silence_timeout_seconds: 600,
            recent_speech_threshold_seconds: 120,
            silent_participants_countdown_seconds: 180,
            startup_alone_timeout_seconds: 1200,
            everyone_left_timeout_seconds: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_meeting_id() {
        let cfg = sample();
        assert!(cfg.validate().is_ok());
        let mut bad = cfg;
        bad.meeting_id = String::new();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn rejects_zero_reconnect_interval() {
        let mut cfg = sample();
        cfg.reconnect_interval_ms = Some(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn exit_detector_defaults_match_spec() {
        let cfg = ExitDetectorConfig::default();
        assert_eq!(cfg.dead_meeting_timeout_seconds, 300);
        assert_eq!(cfg.absolute_silence_timeout_seconds, 600);
        assert_eq!(cfg.silent_participants_countdown_seconds, 180);
    }

    fn sample() -> BotConfig {
        BotConfig {
            platform: Platform::Meet,
            meeting_url: Url::parse("https://meet.google.com/abc-defg-hij").ok(),
            native_meeting_id: "abc-defg-hij".into(),
            bot_name: "Notetaker".into(),
            auth_token: "tok".into(),
            connection_id: "conn-1".into(),
            meeting_id: "meeting-1".into(),
            broker_url: Url::parse("redis://127.0.0.1:6379").unwrap(),
            automatic_leave: AutomaticLeaveConfig::default(),
            language: None,
            task: Some(Task::Transcribe),
            transcribe_enabled: Some(true),
            recording_enabled: Some(false),
            voice_agent_enabled: Some(false),
            reconnect_interval_ms: Some(1000),
            status_callback_url: None,
        }
    }
}
