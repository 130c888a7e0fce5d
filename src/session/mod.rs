//! Session lifecycle
//!
//! `SessionLifecycleController` owns one participant's side of a call:
//! - local media, signaling, the peer connection and telemetry (`SessionResources`)
//! - the join / negotiate / run / leave protocol
//! - transcript collection and finalization at session end
//! - cleanup on every exit path

mod config;
mod controller;
mod resources;
mod stats;
mod store;
mod transcript;

pub use config::{SessionConfig, SessionIdentity};
pub use controller::{
    SessionCommand, SessionDeps, SessionHandle, SessionLifecycleController, SessionOutcome,
    SessionReport, SessionUpdate,
};
pub use resources::SessionResources;
pub use stats::SessionStats;
pub use store::{EndSessionRequest, EndSessionResponse, HttpSessionStore, SessionStore};
pub use transcript::{finalize, FinalizedSegment, TranscriptSegment};
