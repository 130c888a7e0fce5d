use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::telemetry::EmotionSample;

/// Relay-assigned participant handle
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who creates the offer. The initiator is also the observing participant
/// that samples the other's video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    #[serde(alias = "therapist")]
    Initiator,
    #[serde(alias = "client")]
    Responder,
}

impl std::fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParticipantRole::Initiator => f.write_str("initiator"),
            ParticipantRole::Responder => f.write_str("responder"),
        }
    }
}

/// Trickle ICE candidate as exchanged between browsers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub peer_id: PeerId,
    pub role: ParticipantRole,
    pub display_name: String,
}

/// Everything that travels over the relay.
///
/// Wire form is `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SignalingMessage {
    #[serde(rename = "join_session")]
    Join {
        session_id: String,
        role: ParticipantRole,
        display_name: String,
    },

    #[serde(rename = "leave_session")]
    Leave { session_id: String },

    /// Sent to the joiner only: who is already in the room and which id the relay gave us
    #[serde(rename = "session_state")]
    SessionState {
        session_id: String,
        peer_id: PeerId,
        participants: Vec<ParticipantInfo>,
        participant_count: usize,
    },

    #[serde(rename = "user_joined")]
    ParticipantJoined {
        peer_id: PeerId,
        role: ParticipantRole,
        display_name: String,
        participant_count: usize,
    },

    #[serde(rename = "user_left")]
    ParticipantLeft {
        #[serde(default)]
        peer_id: Option<PeerId>,
        participant_count: usize,
    },

    #[serde(rename = "webrtc_offer")]
    Offer {
        #[serde(default)]
        target_peer_id: Option<PeerId>,
        #[serde(default)]
        from_peer_id: Option<PeerId>,
        sdp: String,
    },

    #[serde(rename = "webrtc_answer")]
    Answer {
        #[serde(default)]
        target_peer_id: Option<PeerId>,
        #[serde(default)]
        from_peer_id: Option<PeerId>,
        sdp: String,
    },

    #[serde(rename = "webrtc_ice_candidate")]
    IceCandidate {
        #[serde(default)]
        target_peer_id: Option<PeerId>,
        #[serde(default)]
        from_peer_id: Option<PeerId>,
        candidate: IceCandidate,
    },

    #[serde(rename = "transcription_chunk")]
    TranscriptChunk {
        session_id: String,
        text: String,
        speaker_role: ParticipantRole,
    },

    /// Relay-timestamped transcript line, delivered to every participant
    #[serde(rename = "transcription_update")]
    TranscriptBroadcast {
        timestamp: DateTime<Utc>,
        speaker: ParticipantRole,
        text: String,
    },

    #[serde(rename = "emotion_update")]
    EmotionBroadcast {
        session_id: String,
        #[serde(default)]
        from_peer_id: Option<PeerId>,
        emotion_data: EmotionSample,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

impl SignalingMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            SignalingMessage::Join { .. } => "join_session",
            SignalingMessage::Leave { .. } => "leave_session",
            SignalingMessage::SessionState { .. } => "session_state",
            SignalingMessage::ParticipantJoined { .. } => "user_joined",
            SignalingMessage::ParticipantLeft { .. } => "user_left",
            SignalingMessage::Offer { .. } => "webrtc_offer",
            SignalingMessage::Answer { .. } => "webrtc_answer",
            SignalingMessage::IceCandidate { .. } => "webrtc_ice_candidate",
            SignalingMessage::TranscriptChunk { .. } => "transcription_chunk",
            SignalingMessage::TranscriptBroadcast { .. } => "transcription_update",
            SignalingMessage::EmotionBroadcast { .. } => "emotion_update",
            SignalingMessage::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
