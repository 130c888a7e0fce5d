use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::media::AudioFrame;

/// What one recognition run reports
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// A finalized utterance
    FinalResult {
        text: String,
        captured_at: DateTime<Utc>,
    },
    Interim(String),
    /// Nothing was heard before the recognizer gave up on this run
    NoSpeech,
    PermissionDenied,
    /// The run finished normally
    End,
    Error(String),
}

/// Platform speech-to-text facility.
///
/// Runs are one-shot: after `End`, `NoSpeech` or an error the caller decides
/// whether to `start` again.
///
/// Implementations:
/// - `NatsRecognizer`: streams microphone PCM to the STT service over NATS
#[async_trait::async_trait]
pub trait SpeechRecognizer: Send {
    /// Hand over the local microphone frames. Called once, before the first run.
    fn attach_audio(&mut self, frames: mpsc::Receiver<AudioFrame>);

    /// Begin a recognition run.
    async fn start(&mut self) -> Result<mpsc::Receiver<RecognitionEvent>, SessionError>;

    /// End the current run and release everything.
    async fn stop(&mut self);

    /// Recognizer name for logging
    fn name(&self) -> &str;
}
