//! Speaker tracker (§4.5): per-participant speaking/silent state machine,
//! SPEAKER_START/END emission, duration ledger, and interval-overlap
//! resolution for "who spoke during [t0, t1]" queries.

use std::collections::HashMap;

use crate::participant::ParticipantId;

/// Logical speaking state of one participant.
#[derive(Clone, Debug, Eq, PartialEq)]
enum LogicalState {
    Speaking { start_relative_ms: i64, name: String },
    Silent,
}

/// Discrete speaker signal (§3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventKind {
    SpeakerStart,
    SpeakerEnd,
}

/// A speaker event ready to be sent to the transcription gateway.
#[derive(Clone, Debug)]
pub struct SpeakerEvent {
    pub kind: EventKind,
    pub participant_id: ParticipantId,
    pub participant_name: String,
    pub relative_ms: i64,
}

/// A completed START…END interval, kept for later overlap queries.
#[derive(Clone, Debug)]
struct Interval {
    participant_id: ParticipantId,
    start_ms: i64,
    end_ms: i64,
}

/// Per-participant state machine plus the duration ledger and
/// `meetingHasHadSpeech` flag (§3 `ExitState`, §4.5).
#[derive(Debug, Default)]
pub struct SpeakerTracker {
    logical: HashMap<ParticipantId, LogicalState>,
    ledger: HashMap<ParticipantId, f64>,
    spoken_speakers: std::collections::HashSet<ParticipantId>,
    meeting_has_had_speech: bool,
    intervals: Vec<Interval>,
    speech_activation_threshold_seconds: f64,
}

impl SpeakerTracker {
    #[must_use]
    pub fn new(speech_activation_threshold_seconds: u64) -> Self {
        Self {
            speech_activation_threshold_seconds: speech_activation_threshold_seconds as f64,
            ..Self::default()
        }
    }

    /// Observed "speaking" signal for `id`. Emits SPEAKER_START iff the
    /// participant was logically silent (dedup: never two consecutive
    /// events of the same kind for the same participant).
    pub fn on_speaking(
        &mut self,
        id: &str,
        name: &str,
        relative_ms: i64,
    ) -> Option<SpeakerEvent> {
        match self.logical.get(id) {
            Some(LogicalState::Speaking { .. }) => None,
            _ => {
                self.logical.insert(
                    id.to_string(),
                    LogicalState::Speaking {
                        start_relative_ms: relative_ms,
                        name: name.to_string(),
                    },
                );
                Some(SpeakerEvent {
                    kind: EventKind::SpeakerStart,
                    participant_id: id.to_string(),
                    participant_name: name.to_string(),
                    relative_ms,
                })
            }
        }
    }

    /// Observed "silent" signal for `id`. Emits SPEAKER_END iff the
    /// participant was logically speaking, updating the duration ledger.
    pub fn on_silent(&mut self, id: &str, relative_ms: i64) -> Option<SpeakerEvent> {
        self.end_if_speaking(id, relative_ms)
    }

    /// Participant removal while speaking synthesizes a SPEAKER_END (§4.5).
    pub fn on_removed(&mut self, id: &str, relative_ms: i64) -> Option<SpeakerEvent> {
        let ev = self.end_if_speaking(id, relative_ms);
        self.logical.remove(id);
        ev
    }

    fn end_if_speaking(&mut self, id: &str, relative_ms: i64) -> Option<SpeakerEvent> {
        let (start_ms, name) = match self.logical.get(id) {
            Some(LogicalState::Speaking { start_relative_ms, name }) => {
                (*start_relative_ms, name.clone())
            }
            _ => return None,
        };
        self.logical
            .insert(id.to_string(), LogicalState::Silent);

        let dur_ms = relative_ms - start_ms;
        if dur_ms > 0 {
            let dur_secs = dur_ms as f64 / 1000.0;
            let total = self.ledger.entry(id.to_string()).or_insert(0.0);
            *total += dur_secs;
            self.spoken_speakers.insert(id.to_string());
            if *total >= self.speech_activation_threshold_seconds {
                self.meeting_has_had_speech = true;
            }
            self.intervals.push(Interval {
                participant_id: id.to_string(),
                start_ms,
                end_ms: relative_ms,
            });
        }

        Some(SpeakerEvent {
            kind: EventKind::SpeakerEnd,
            participant_id: id.to_string(),
            participant_name: name,
            relative_ms,
        })
    }

    #[must_use]
    pub fn meeting_has_had_speech(&self) -> bool {
        self.meeting_has_had_speech
    }

    #[must_use]
    pub fn duration(&self, id: &str) -> f64 {
        self.ledger.get(id).copied().unwrap_or(0.0)
    }

    #[must_use]
    pub fn has_spoken(&self, id: &str) -> bool {
        self.spoken_speakers.contains(id)
    }

    #[must_use]
    pub fn is_speaking(&self, id: &str) -> bool {
        matches!(self.logical.get(id), Some(LogicalState::Speaking { .. }))
    }

    /// Answers "who spoke during `[t0, t1]`?" by intersecting the query
    /// interval with every completed START…END interval, returning the
    /// participant with the largest overlap. Ties are broken by overlap
    /// duration — if still tied, the earliest-seen interval wins, which is
    /// deterministic given the append-only `intervals` buffer.
    #[must_use]
    pub fn who_spoke_during(&self, t0: i64, t1: i64) -> Option<ParticipantId> {
        let mut best: Option<(ParticipantId, i64)> = None;
        for iv in &self.intervals {
            let overlap = overlap_ms(iv.start_ms, iv.end_ms, t0, t1);
            if overlap <= 0 {
                continue;
            }
            match &best {
                Some((_, best_overlap)) if *best_overlap >= overlap => {}
                _ => best = Some((iv.participant_id.clone(), overlap)),
            }
        }
        best.map(|(id, _)| id)
    }
}

fn overlap_ms(a_start: i64, a_end: i64, b_start: i64, b_end: i64) -> i64 {
    (a_end.min(b_end) - a_start.max(b_start)).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_then_end_alternate() {
        let mut t = SpeakerTracker::new(5);
        assert!(t.on_speaking("a", "Ada", 0).is_some());
        assert!(t.on_speaking("a", "Ada", 100).is_none()); // dedup
        assert!(t.on_silent("a", 500).is_some());
        assert!(t.on_silent("a", 600).is_none()); // dedup
    }

    #[test]
    fn speaker_end_carries_the_name_from_the_matching_start() {
        let mut t = SpeakerTracker::new(5);
        t.on_speaking("a", "Ada Lovelace", 0);
        let ev = t.on_silent("a", 500).expect("synthesized end");
        assert_eq!(ev.participant_name, "Ada Lovelace");
    }

    #[test]
    fn duration_ledger_and_activation_threshold_s2() {
        let mut t = SpeakerTracker::new(5);
        t.on_speaking("a", "Ada", 5_000);
        t.on_silent("a", 8_500);
        assert!((t.duration("a") - 3.5).abs() < 1e-9);
        assert!(!t.meeting_has_had_speech());

        t.on_speaking("b", "Bob", 10_000);
        t.on_silent("b", 14_000);
        assert!((t.duration("b") - 4.0).abs() < 1e-9);
        assert!(!t.meeting_has_had_speech());

        t.on_speaking("a", "Ada", 15_000);
        t.on_silent("a", 17_100);
        assert!((t.duration("a") - 5.6).abs() < 1e-6);
        assert!(t.meeting_has_had_speech());
    }

    #[test]
    fn removal_while_speaking_synthesizes_end() {
        let mut t = SpeakerTracker::new(5);
        t.on_speaking("a", "Ada", 0);
        let ev = t.on_removed("a", 2_000).expect("synthesized end");
        assert!(matches!(ev.kind, EventKind::SpeakerEnd));
        assert!(!t.is_speaking("a"));
    }

    #[test]
    fn zero_or_negative_duration_not_counted() {
        let mut t = SpeakerTracker::new(5);
        t.on_speaking("a", "Ada", 1_000);
        // END arrives with a timestamp not after START (clock skew/race):
        // no-op on the ledger, still closes the logical state.
        t.on_silent("a", 1_000);
        assert_eq!(t.duration("a"), 0.0);
        assert!(!t.has_spoken("a"));
    }

    #[test]
    fn who_spoke_during_picks_largest_overlap() {
        let mut t = SpeakerTracker::new(5);
        t.on_speaking("a", "Ada", 0);
        t.on_silent("a", 1_000); // [0, 1000], overlap with [400, 1000] = 600ms
        t.on_speaking("b", "Bob", 500);
        t.on_silent("b", 900); // [500, 900], overlap with [400, 1000] = 400ms

        assert_eq!(t.who_spoke_during(400, 1_000), Some("a".to_string()));
    }

    #[test]
    fn who_spoke_during_none_when_no_overlap() {
        let t = SpeakerTracker::new(5);
        assert_eq!(t.who_spoke_during(0, 100), None);
    }
}
