use thiserror::Error;

/// Failures surfaced by the session core.
///
/// Fatal variants bubble up to the lifecycle controller, which always runs
/// cleanup before reporting them. The rest are recovered where they occur.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Camera and microphone were both unavailable.
    #[error("media unavailable: {0}")]
    MediaUnavailable(String),

    /// Video could not be acquired; the session continues audio-only.
    #[error("media degraded to audio-only: {0}")]
    MediaDegraded(String),

    #[error("negotiation timed out after {0}s")]
    NegotiationTimeout(u64),

    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("signaling disconnected: {0}")]
    SignalingDisconnected(String),

    /// A telemetry tick failed; the tick is skipped.
    #[error("capture task failed: {0}")]
    CaptureTaskTransientFailure(String),

    /// Speech recognition is not permitted; the session continues without a transcript.
    #[error("speech recognition permission denied")]
    RecognitionPermissionDenied,

    #[error("no speech detected")]
    RecognitionNoSpeech,

    /// Bearer token missing or expired.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The relay refused the supplied token.
    #[error("signaling auth rejected: {0}")]
    AuthRejected(String),

    #[error("analyzer request failed: {0}")]
    Analyzer(String),

    #[error("persistence request failed: {0}")]
    Persistence(String),

    #[error("peer transport error: {0}")]
    Transport(String),
}

impl SessionError {
    /// Whether this error ends the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::MediaUnavailable(_)
                | SessionError::NegotiationTimeout(_)
                | SessionError::NegotiationFailed(_)
                | SessionError::SignalingDisconnected(_)
                | SessionError::Unauthenticated(_)
                | SessionError::AuthRejected(_)
        )
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(e: reqwest::Error) -> Self {
        SessionError::Analyzer(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(SessionError::MediaUnavailable("denied".into()).is_fatal());
        assert!(SessionError::NegotiationTimeout(30).is_fatal());
        assert!(SessionError::SignalingDisconnected("closed".into()).is_fatal());
        assert!(!SessionError::MediaDegraded("no camera".into()).is_fatal());
        assert!(!SessionError::RecognitionPermissionDenied.is_fatal());
        assert!(!SessionError::RecognitionNoSpeech.is_fatal());
        assert!(!SessionError::CaptureTaskTransientFailure("timeout".into()).is_fatal());
    }
}
