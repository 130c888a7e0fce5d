use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::media::{LocalStream, TrackKind, VideoSink};
use crate::signaling::IceCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// What the connection reports while it runs
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Gathered locally; to be sent to the remote peer
    LocalCandidate(IceCandidate),
    IceConnected,
    IceDisconnected,
    IceFailed,
    RemoteTrack(TrackKind),
}

/// The underlying peer connection.
///
/// Implementations:
/// - `WebRtcTransport`: webrtc-rs
/// - loopback pairs in the integration tests
#[async_trait::async_trait]
pub trait PeerTransport: Send {
    /// Create the connection and attach the local tracks. A transport that
    /// sends the microphone takes its copy with `LocalStream::tee_audio`.
    /// Events arrive on the returned receiver until the transport is closed.
    async fn open(
        &mut self,
        local: &mut LocalStream,
    ) -> Result<mpsc::UnboundedReceiver<PeerEvent>, SessionError>;

    async fn create_offer(&mut self) -> Result<SessionDescription, SessionError>;

    async fn create_answer(&mut self) -> Result<SessionDescription, SessionError>;

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), SessionError>;

    async fn set_remote_description(&mut self, desc: SessionDescription)
        -> Result<(), SessionError>;

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), SessionError>;

    async fn close(&mut self) -> Result<(), SessionError>;

    /// Read-only view of the remote participant's decoded video, if the
    /// transport decodes it
    fn remote_video(&self) -> Option<Arc<dyn VideoSink>>;

    /// Transport name for logging
    fn name(&self) -> &str;
}
