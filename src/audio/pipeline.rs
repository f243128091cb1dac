//! Audio pipeline (§4.3): acquire mixed remote audio, frame it, resample to
//! 16 kHz mono, gate emission on transcription readiness, and record the
//! per-session audio-start origin.

use std::time::Instant;

use super::{
    framer::{Framer, FRAME_SIZE},
    resample::{resample_linear, TARGET_SAMPLE_RATE},
};
use crate::session::Session;

/// A resampled, framed chunk ready to hand to the transcription client.
#[derive(Clone, Debug)]
pub struct EmittedFrame {
    pub samples: Vec<f32>,
    /// Set only on the first frame of a session — `true` when this frame
    /// caused `audioStartWallclockMs` to be recorded.
    pub started_session: bool,
}

/// Whether the pipeline is currently allowed to emit frames downstream.
///
/// Implemented by the transcription client: frames are dropped silently
/// while transcription is disabled or the client has not reached
/// `SERVER_READY` (§4.3 step 5).
pub trait EmissionGate {
    fn should_emit(&self) -> bool;
}

/// Owns the framing buffer for one acquired input stream and turns pushed
/// raw samples into gated, resampled, session-stamped output frames.
#[derive(Debug)]
pub struct AudioPipeline {
    framer: Framer,
    input_rate: u32,
}

impl AudioPipeline {
    #[must_use]
    pub fn new(input_rate: u32) -> Self {
        Self {
            framer: Framer::new(),
            input_rate,
        }
    }

    /// Pushes newly captured mono samples at the pipeline's input rate,
    /// returning zero or more frames ready for emission. Frames are dropped
    /// (not returned) when `gate` refuses emission, per §4.3 step 5 — they
    /// are still consumed from the framer so the buffer doesn't grow
    /// unbounded while muted.
    pub fn push(
        &mut self,
        samples: &[f32],
        gate: &dyn EmissionGate,
        session: &mut Session,
        now: Instant,
    ) -> Vec<EmittedFrame> {
        let raw_frames = self.framer.push(samples);
        let mut out = Vec::with_capacity(raw_frames.len());

        for raw in raw_frames {
            if !gate.should_emit() {
                continue;
            }
            let resampled = resample_linear(&raw, self.input_rate);
            let started = session.mark_audio_start(now);
            out.push(EmittedFrame {
                samples: resampled,
                started_session: started,
            });
        }
        out
    }
}

impl Default for AudioPipeline {
    fn default() -> Self {
        Self::new(48_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Task;

    struct AlwaysOpen;
    impl EmissionGate for AlwaysOpen {
        fn should_emit(&self) -> bool {
            true
        }
    }
    struct AlwaysClosed;
    impl EmissionGate for AlwaysClosed {
        fn should_emit(&self) -> bool {
            false
        }
    }

    #[test]
    fn gated_frames_are_dropped_silently() {
        let mut pipeline = AudioPipeline::new(TARGET_SAMPLE_RATE);
        let mut session = Session::new(None, Task::Transcribe);
        let frames = pipeline.push(
            &vec![0.0; FRAME_SIZE],
            &AlwaysClosed,
            &mut session,
            Instant::now(),
        );
        assert!(frames.is_empty());
        assert!(session.audio_start().is_none());
    }

    #[test]
    fn first_open_frame_marks_session_start() {
        let mut pipeline = AudioPipeline::new(TARGET_SAMPLE_RATE);
        let mut session = Session::new(None, Task::Transcribe);
        let t0 = Instant::now();
        let frames = pipeline.push(&vec![0.0; FRAME_SIZE], &AlwaysOpen, &mut session, t0);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].started_session);
        assert_eq!(session.audio_start(), Some(t0));

        let frames2 = pipeline.push(&vec![0.0; FRAME_SIZE], &AlwaysOpen, &mut session, t0);
        assert_eq!(frames2.len(), 1);
        assert!(!frames2[0].started_session);
    }
}
