use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::Config;
use crate::media::MediaConstraints;
use crate::signaling::ParticipantRole;
use crate::telemetry::TelemetryConfig;

/// Who is joining which session. Fixed for the session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub session_id: String,
    pub role: ParticipantRole,
    pub display_name: String,
}

impl SessionIdentity {
    pub fn new(
        session_id: impl Into<String>,
        role: ParticipantRole,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            role,
            display_name: display_name.into(),
        }
    }
}

/// Per-session tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub identity: SessionIdentity,

    /// Devices requested at join; audio-only is tried if these fail
    pub media_constraints: MediaConstraints,

    /// Bound on each media acquisition attempt
    pub acquire_timeout: Duration,

    /// Bound on offer/answer/ICE before the session is failed
    pub negotiation_timeout: Duration,

    pub telemetry: TelemetryConfig,

    /// Trailing emotion samples kept for trend display
    pub emotion_window: usize,

    /// Transcript language sent with the finalized transcript
    pub language: String,
}

impl SessionConfig {
    pub fn new(identity: SessionIdentity) -> Self {
        Self {
            identity,
            media_constraints: MediaConstraints::audio_video(),
            acquire_timeout: Duration::from_secs(10),
            negotiation_timeout: Duration::from_secs(30),
            telemetry: TelemetryConfig::default(),
            emotion_window: 60,
            language: "en".to_string(),
        }
    }

    pub fn from_config(identity: SessionIdentity, config: &Config) -> Self {
        Self {
            identity,
            media_constraints: MediaConstraints::audio_video(),
            acquire_timeout: Duration::from_millis(config.media.acquire_timeout_ms),
            negotiation_timeout: Duration::from_millis(config.peer.negotiation_timeout_ms),
            telemetry: TelemetryConfig {
                emotion_interval: Duration::from_millis(config.analyzer.emotion_interval_ms),
                question_interval: Duration::from_millis(config.analyzer.question_interval_ms),
                restart_delay: Duration::from_millis(config.transcription.restart_delay_ms),
                jpeg_quality: config.analyzer.jpeg_quality,
            },
            emotion_window: config.analyzer.window_size,
            language: config.transcription.language.clone(),
        }
    }
}
