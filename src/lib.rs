//! Callout Library
//!
//! Announcement dispatch for queue-management speakers: protocol drivers,
//! auto-detection, connection health and the device -> relay -> local
//! fallback chain.

pub mod announcement;
pub mod announcer;
pub mod audit;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod drivers;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod ipc;
pub mod relay;
pub mod tts;
pub mod utils;
pub mod voice;

pub use announcement::{AnnouncementOutcome, AnnouncementRequest, Tier};
pub use announcer::Announcer;
pub use error::{CalloutError, CalloutResult};
