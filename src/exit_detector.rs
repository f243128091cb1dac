//! Exit detector (§4.6): a multi-case activity state machine evaluated on a
//! fixed 5-second tick, deciding when the worker has outlived its
//! usefulness.
//!
//! Cases are evaluated in priority order every tick; the first whose fire
//! condition holds wins. Case 0's bookkeeping (the alone-seconds counter)
//! updates unconditionally every tick regardless of whether it fires, so a
//! lower-priority case (e.g. dead meeting) can still fire on a tick where
//! the bot happens to be alone but under the alone-timeout.

use std::time::{Duration, Instant};

use derive_more::Display;

use crate::config::ExitDetectorConfig;

/// Fixed evaluation period (§4.6).
pub const TICK: Duration = Duration::from_secs(5);

/// Structured, platform-unprefixed exit reason (§6 names the
/// platform-prefixed form; the prefix is applied by the caller via
/// [`crate::config::Platform::reason_prefix`]).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Display)]
pub enum ExitReason {
    #[display(fmt = "BOT_LEFT_ALONE_TIMEOUT")]
    BotLeftAloneTimeout,
    #[display(fmt = "STARTUP_ALONE_TIMEOUT")]
    StartupAloneTimeout,
    #[display(fmt = "UI_GONE")]
    UiGone,
    #[display(fmt = "DEAD_MEETING")]
    DeadMeeting,
    #[display(fmt = "ABSOLUTE_SILENCE_TIMEOUT")]
    AbsoluteSilenceTimeout,
    #[display(fmt = "SILENT_PARTICIPANTS_TIMEOUT")]
    SilentParticipantsTimeout,
}

impl ExitReason {
    #[must_use]
    pub fn with_prefix(self, prefix: &str) -> String {
        format!("{}_{}", prefix, self)
    }
}

/// Per-tick observations the detector needs; everything else (timers,
/// countdowns) is internal state.
#[derive(Clone, Copy, Debug)]
pub struct TickInputs {
    pub participant_count: usize,
    pub participant_list_ui_present: bool,
    pub meeting_has_had_speech: bool,
    pub speakers_identified: bool,
    /// The set of currently-remaining participants is non-empty and every
    /// member of it has never spoken (case 4's precondition).
    pub all_remaining_never_spoken: bool,
    /// True if a new `SPEAKER_END` or a new participant join happened since
    /// the previous tick — resets (not pauses) the silent-countdown.
    pub countdown_reset: bool,
}

/// The activity state machine itself.
#[derive(Debug)]
pub struct ExitDetector {
    cfg: ExitDetectorConfig,
    joined_at: Instant,
    last_speech: Option<Instant>,
    alone_seconds: u64,
    in_silence_countdown: bool,
    silence_countdown_seconds: u64,
}

impl ExitDetector {
    #[must_use]
    pub fn new(cfg: ExitDetectorConfig, joined_at: Instant) -> Self {
        Self {
            cfg,
            joined_at,
            last_speech: None,
            alone_seconds: 0,
            in_silence_countdown: false,
            silence_countdown_seconds: 0,
        }
    }

    /// Records that a speech interval closed at `now` — updates the
    /// "recent speech" clock used by cases 3 and 3.5.
    pub fn record_speech_end(&mut self, now: Instant) {
        self.last_speech = Some(now);
    }

    /// Evaluates one 5-second tick, returning `Some(reason)` if the worker
    /// should leave.
    pub fn tick(&mut self, now: Instant, inputs: TickInputs) -> Option<ExitReason> {
        // Bookkeeping: always runs, independent of which case ends up firing.
        if inputs.participant_count <= 1 {
            self.alone_seconds += TICK.as_secs();
        } else {
            self.alone_seconds = 0;
        }

        // Case 0: alone.
        if inputs.participant_count <= 1 {
            let timeout = if inputs.speakers_identified {
                self.cfg.everyone_left_timeout_seconds
            } else {
                self.cfg.startup_alone_timeout_seconds
            };
            if self.alone_seconds >= timeout {
                return Some(if inputs.speakers_identified {
                    ExitReason::BotLeftAloneTimeout
                } else {
                    ExitReason::StartupAloneTimeout
                });
            }
        }

        // Case 1: UI gone.
        if inputs.participant_count == 0 && !inputs.participant_list_ui_present {
            return Some(ExitReason::UiGone);
        }

        // Case 2: dead meeting.
        if !inputs.meeting_has_had_speech
            && now.saturating_duration_since(self.joined_at).as_secs()
                > self.cfg.dead_meeting_timeout_seconds
        {
            return Some(ExitReason::DeadMeeting);
        }

        // Case 3: recent speech — stay, and never propose leaving while it
        // holds (invariant (d)/§4.6).
        if let Some(last) = self.last_speech {
            if now.saturating_duration_since(last).as_secs()
                < self.cfg.recent_speech_threshold_seconds
            {
                self.in_silence_countdown = false;
                return None;
            }
        }

        // Case 3.5: absolute silence overrides remaining participant count.
        if inputs.meeting_has_had_speech {
            if let Some(last) = self.last_speech {
                if now.saturating_duration_since(last).as_secs()
                    >= self.cfg.absolute_silence_timeout_seconds
                {
                    return Some(ExitReason::AbsoluteSilenceTimeout);
                }
            }
        }

        // Case 4: all remaining participants are silent.
        if inputs.all_remaining_never_spoken {
            if !self.in_silence_countdown || inputs.countdown_reset {
                self.in_silence_countdown = true;
                self.silence_countdown_seconds =
                    self.cfg.silent_participants_countdown_seconds;
            } else {
                self.silence_countdown_seconds =
                    self.silence_countdown_seconds.saturating_sub(TICK.as_secs());
            }
            if self.silence_countdown_seconds == 0 {
                self.in_silence_countdown = false;
                return Some(ExitReason::SilentParticipantsTimeout);
            }
            return None;
        }
        self.in_silence_countdown = false;

        // Case 5: mixed — stay.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ExitDetectorConfig {
        ExitDetectorConfig::default()
    }

    fn inputs(participant_count: usize) -> TickInputs {
        TickInputs {
            participant_count,
            participant_list_ui_present: true,
            meeting_has_had_speech: false,
            speakers_identified: false,
            all_remaining_never_spoken: false,
            countdown_reset: false,
        }
    }

    #[test]
    fn s1_dead_meeting_fires_at_five_minutes() {
        let joined = Instant::now();
        let mut d = ExitDetector::new(cfg(), joined);
        let mut now = joined;
        let mut fired = None;
        for _ in 0..61 {
            now += TICK;
            fired = d.tick(now, inputs(2));
            if fired.is_some() {
                break;
            }
        }
        assert_eq!(fired, Some(ExitReason::DeadMeeting));
    }

    #[test]
    fn s4_absolute_silence_overrides_participant_count() {
        let joined = Instant::now();
        let mut d = ExitDetector::new(cfg(), joined);
        let speech_at = joined + Duration::from_secs(60);
        d.record_speech_end(speech_at);

        let mut now = joined;
        let mut fired = None;
        for _ in 0..200 {
            now += TICK;
            let mut ti = inputs(3);
            ti.meeting_has_had_speech = true;
            fired = d.tick(now, ti);
            if fired.is_some() {
                break;
            }
        }
        assert_eq!(fired, Some(ExitReason::AbsoluteSilenceTimeout));
        // Fired at 660s wallclock from join.
        assert_eq!(now.saturating_duration_since(joined).as_secs(), 660);
    }

    #[test]
    fn s6_startup_alone_timeout() {
        let joined = Instant::now();
        let mut d = ExitDetector::new(cfg(), joined);
        let mut now = joined;
        let mut fired = None;
        for _ in 0..300 {
            now += TICK;
            fired = d.tick(now, inputs(1));
            if fired.is_some() {
                break;
            }
        }
        assert_eq!(fired, Some(ExitReason::StartupAloneTimeout));
        assert_eq!(now.saturating_duration_since(joined).as_secs(), 1200);
    }

    #[test]
    fn everyone_left_after_identification_uses_shorter_timeout() {
        let joined = Instant::now();
        let mut d = ExitDetector::new(cfg(), joined);
        let mut now = joined;
        let mut fired = None;
        for _ in 0..10 {
            now += TICK;
            let mut ti = inputs(1);
            ti.speakers_identified = true;
            fired = d.tick(now, ti);
            if fired.is_some() {
                break;
            }
        }
        assert_eq!(fired, Some(ExitReason::BotLeftAloneTimeout));
        assert_eq!(now.saturating_duration_since(joined).as_secs(), 10);
    }

    #[test]
    fn ui_gone_fires_immediately() {
        let joined = Instant::now();
        let mut d = ExitDetector::new(cfg(), joined);
        let mut ti = inputs(0);
        ti.participant_list_ui_present = false;
        // alone_seconds bookkeeping runs too, but UI-gone still fires on the
        // very first tick since it doesn't wait on a timeout.
        assert_eq!(d.tick(joined + TICK, ti), Some(ExitReason::UiGone));
    }

    #[test]
    fn recent_speech_blocks_lower_priority_cases() {
        let joined = Instant::now();
        let mut d = ExitDetector::new(cfg(), joined);
        let now = joined + Duration::from_secs(400);
        d.record_speech_end(now - Duration::from_secs(10));
        let mut ti = inputs(2);
        ti.meeting_has_had_speech = true;
        ti.all_remaining_never_spoken = true; // would fire case 4 otherwise
        assert_eq!(d.tick(now, ti), None);
    }

    #[test]
    fn s3_silent_participants_countdown_resets_and_fires() {
        let joined = Instant::now();
        let mut d = ExitDetector::new(cfg(), joined);
        d.record_speech_end(joined + Duration::from_secs(17));

        // t=137.1s: recent-speech window (case 3) just expired, but A and B
        // (who have both spoken) are still present — case 4's precondition
        // doesn't hold yet, so the detector stays via case 5.
        let mut ti = inputs(2);
        ti.meeting_has_had_speech = true;
        ti.all_remaining_never_spoken = false;
        assert_eq!(d.tick(joined + Duration::from_secs(138), ti), None);

        // t=140s: A and B leave, C (never spoken) joins alone — case 4's
        // precondition now holds and the 180s countdown starts.
        let mut ti = inputs(1);
        ti.meeting_has_had_speech = true;
        ti.all_remaining_never_spoken = true;

        let mut now = joined + Duration::from_secs(140);
        let mut fired = d.tick(now, ti);
        assert_eq!(fired, None);

        for _ in 0..35 {
            now += TICK;
            fired = d.tick(now, ti);
            assert_eq!(fired, None);
        }
        now += TICK;
        fired = d.tick(now, ti);
        assert_eq!(fired, Some(ExitReason::SilentParticipantsTimeout));
        assert_eq!(now.saturating_duration_since(joined).as_secs(), 320);
    }
}
