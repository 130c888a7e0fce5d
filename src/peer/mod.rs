pub mod manager;
pub mod state;
pub mod transport;
pub mod webrtc_transport;

pub use manager::PeerConnectionManager;
pub use state::PeerConnectionState;
pub use transport::{PeerEvent, PeerTransport, SdpKind, SessionDescription};
pub use webrtc_transport::WebRtcTransport;
