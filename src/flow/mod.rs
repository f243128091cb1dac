//! Flow control (§4.1, §4.2): the platform-agnostic meeting lifecycle and
//! the strategy contract each platform implementation fulfills.

pub mod controller;
pub mod strategy;

pub use controller::{FlowController, Outcome};
pub use strategy::{
    AdmissionOutcome, Observation, ParticipantSnapshot, PlatformStrategy, RemovalSignal,
    StrategyError, StrategyReason,
};
