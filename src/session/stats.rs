use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::peer::PeerConnectionState;
use crate::signaling::ParticipantRole;
use crate::telemetry::{TelemetryTask, TelemetryTaskKind};

/// Snapshot of a live session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: String,

    pub role: ParticipantRole,

    pub peer_state: PeerConnectionState,

    /// Participants the relay last reported, this one included
    pub participant_count: usize,

    /// Telemetry tasks currently running
    pub active_tasks: Vec<TelemetryTaskKind>,

    /// Descriptor of every task, including those not enabled for this role
    pub tasks: Vec<TelemetryTask>,

    pub is_transcribing: bool,

    pub transcript_segments_count: usize,

    /// Samples held in the trailing emotion window
    pub emotion_samples_count: usize,

    pub latest_question: Option<String>,

    pub started_at: DateTime<Utc>,

    pub duration_secs: f64,
}
