//! [`Session`] identity (§3): a fresh [`Uuid`] per WebSocket connection and
//! the relative-time origin all speaker timestamps are measured against.

use std::time::Instant;

use uuid::Uuid;

use crate::config::Task;

/// One transcription-gateway connection's worth of identity.
///
/// A new [`Session`] is minted on every (re)connect (§4.4); `audio_start` is
/// set on the first successfully enqueued audio frame of that session and
/// is the origin for every [`crate::transcription::messages::SpeakerEvent`]
/// emitted while the session is current.
#[derive(Clone, Debug)]
pub struct Session {
    uid: Uuid,
    audio_start: Option<Instant>,
    pub language: Option<String>,
    pub task: Task,
}

impl Session {
    #[must_use]
    pub fn new(language: Option<String>, task: Task) -> Self {
        Self {
            uid: Uuid::new_v4(),
            audio_start: None,
            language,
            task,
        }
    }

    #[must_use]
    pub fn uid(&self) -> Uuid {
        self.uid
    }

    /// Records `now` as the audio-start origin, if not already set. Returns
    /// `true` if this call set it (i.e. this was the first frame).
    pub fn mark_audio_start(&mut self, now: Instant) -> bool {
        if self.audio_start.is_some() {
            return false;
        }
        self.audio_start = Some(now);
        true
    }

    #[must_use]
    pub fn audio_start(&self) -> Option<Instant> {
        self.audio_start
    }

    /// `now - audio_start`, in milliseconds, clamped at 0. `None` until the
    /// origin is known (§3: events are only emitted once it is known).
    #[must_use]
    pub fn relative_ms(&self, now: Instant) -> Option<i64> {
        self.audio_start.map(|start| {
            now.saturating_duration_since(start).as_millis() as i64
        })
    }

    /// Replaces this session with a fresh one, minting a new UID and
    /// resetting the audio-start origin (§4.4 reconnect/reconfigure).
    pub fn reset(&mut self) {
        *self = Self::new(self.language.clone(), self.task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_changes_on_reset() {
        let mut s = Session::new(None, Task::Transcribe);
        let first = s.uid();
        s.reset();
        assert_ne!(first, s.uid());
    }

    #[test]
    fn relative_ms_none_until_audio_start() {
        let s = Session::new(None, Task::Transcribe);
        assert_eq!(s.relative_ms(Instant::now()), None);
    }

    #[test]
    fn relative_ms_nonnegative_after_start() {
        let mut s = Session::new(None, Task::Transcribe);
        let t0 = Instant::now();
        assert!(s.mark_audio_start(t0));
        assert!(!s.mark_audio_start(t0));
        let later = t0 + std::time::Duration::from_millis(250);
        assert_eq!(s.relative_ms(later), Some(250));
    }
}
