//! Audio pipeline: acquire mixed remote audio, frame it, resample to 16 kHz
//! mono, and gate emission on transcription readiness (§4.3).

pub mod framer;
pub mod pipeline;
pub mod resample;

pub use pipeline::{AudioPipeline, EmissionGate, EmittedFrame};
