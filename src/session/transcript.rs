use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signaling::ParticipantRole;

/// One transcript line, in the order it reached this session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub speaker_role: ParticipantRole,
    pub text: String,
    pub captured_at: DateTime<Utc>,
}

/// Transcript line as handed to persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedSegment {
    /// Seconds since the earliest segment
    pub start: f64,
    pub text: String,
    pub speaker: ParticipantRole,
}

/// Order segments by capture time and turn timestamps into offsets from the
/// first one. Segments captured at the same instant keep their arrival order.
pub fn finalize(segments: &[TranscriptSegment]) -> Vec<FinalizedSegment> {
    let mut ordered: Vec<&TranscriptSegment> = segments.iter().collect();
    ordered.sort_by_key(|s| s.captured_at);

    let Some(first) = ordered.first().map(|s| s.captured_at) else {
        return Vec::new();
    };

    ordered
        .into_iter()
        .map(|s| FinalizedSegment {
            start: (s.captured_at - first).num_milliseconds() as f64 / 1000.0,
            text: s.text.clone(),
            speaker: s.speaker_role,
        })
        .collect()
}
