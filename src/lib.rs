pub mod auth;
pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod relay;
pub mod session;
pub mod signaling;
pub mod telemetry;

pub use auth::BearerToken;
pub use config::Config;
pub use error::SessionError;
pub use media::{Capability, MediaCaptureSession, MediaConstraints, MediaDevices};
pub use peer::{PeerConnectionManager, PeerConnectionState};
pub use session::{
    SessionConfig, SessionDeps, SessionHandle, SessionIdentity, SessionLifecycleController,
    SessionOutcome, SessionReport, SessionStats, SessionUpdate, TranscriptSegment,
};
pub use signaling::{ParticipantRole, PeerId, SignalingChannel, SignalingMessage};
pub use telemetry::{TelemetryScheduler, TelemetryTaskKind};
