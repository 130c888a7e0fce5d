use serde::Serialize;

/// Lifecycle of the session's single peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerConnectionState {
    Idle,
    Negotiating,
    Connected,
    /// ICE dropped after connecting. Kept alive, never renegotiated.
    Degraded,
    Closed,
    Failed,
}

impl PeerConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PeerConnectionState::Closed | PeerConnectionState::Failed)
    }

    /// Whether `next` is a documented successor of `self`.
    pub fn can_transition_to(self, next: PeerConnectionState) -> bool {
        use PeerConnectionState::*;

        match (self, next) {
            (Closed, _) | (Failed, _) => false,
            (_, Closed) => true,
            (Idle, Negotiating) => true,
            (Negotiating, Connected) => true,
            (Negotiating, Failed) => true,
            (Connected, Degraded) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PeerConnectionState::Idle => "idle",
            PeerConnectionState::Negotiating => "negotiating",
            PeerConnectionState::Connected => "connected",
            PeerConnectionState::Degraded => "degraded",
            PeerConnectionState::Closed => "closed",
            PeerConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}
