pub mod channel;
pub mod local;
pub mod messages;
pub mod ws;

pub use channel::{SignalingChannel, SignalingTransport};
pub use local::{LocalRelay, LocalTransport};
pub use messages::{IceCandidate, ParticipantInfo, ParticipantRole, PeerId, SignalingMessage};
pub use ws::WsTransport;
