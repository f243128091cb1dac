//! Platform implementations of [`crate::flow::PlatformStrategy`] (§4.2).
//!
//! Meet and Teams share a Chromium/CDP foundation (`cdp`); Zoom bridges the
//! native meeting SDK instead and is built independently.

mod cdp;
pub mod meet;
pub mod teams;
pub mod zoom;

pub use meet::MeetStrategy;
pub use teams::TeamsStrategy;
pub use zoom::ZoomStrategy;
