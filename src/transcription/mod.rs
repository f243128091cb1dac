//! Transcription gateway integration (§4.4): wire messages and the
//! streaming WebSocket client.

pub mod client;
pub mod messages;

pub use client::{ClientCommand, GatewayEvent, ReadyGate, TranscriptionClient};
