use anyhow::{Context, Result};
use async_nats::Client;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::recognizer::{RecognitionEvent, SpeechRecognizer};
use crate::error::SessionError;
use crate::media::AudioFrame;

/// Audio frame published to the STT service
#[derive(Debug, Serialize, Deserialize)]
pub struct AudioFrameMessage {
    pub session_id: String,
    pub sequence: u64,
    /// Base64-encoded little-endian i16 PCM
    pub pcm: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// RFC3339 timestamp
    pub timestamp: String,
    #[serde(rename = "final")]
    pub final_frame: bool,
}

/// Transcript published by the STT service
#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub session_id: String,
    pub text: String,
    #[serde(default)]
    pub partial: bool,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl TranscriptMessage {
    /// Map to a recognition event for `session_id`; `None` for other sessions and empty text.
    pub fn to_event(&self, session_id: &str) -> Option<RecognitionEvent> {
        if self.session_id != session_id {
            return None;
        }
        let text = self.text.trim();
        if text.is_empty() {
            return None;
        }
        if self.partial {
            return Some(RecognitionEvent::Interim(text.to_string()));
        }

        let captured_at = self
            .timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Some(RecognitionEvent::FinalResult {
            text: text.to_string(),
            captured_at,
        })
    }
}

const TRANSCRIPT_SUBJECT: &str = "stt.text.>";

/// Speech recognition through the NATS speech-to-text service.
///
/// Microphone frames are published for the whole session; each run
/// subscribes to transcripts and ends with `NoSpeech` after a silent stretch.
pub struct NatsRecognizer {
    url: String,
    session_id: String,
    no_speech_timeout: Duration,
    client: Option<Client>,
    audio: Option<mpsc::Receiver<AudioFrame>>,
    publisher: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

impl NatsRecognizer {
    pub fn new(url: impl Into<String>, session_id: impl Into<String>, no_speech_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            session_id: session_id.into(),
            no_speech_timeout,
            client: None,
            audio: None,
            publisher: None,
            listener: None,
        }
    }

    async fn client(&mut self) -> Result<Client> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }

        info!("Connecting to NATS at {}", self.url);
        let client = async_nats::connect(self.url.as_str())
            .await
            .context("Failed to connect to NATS")?;
        info!("Connected to NATS successfully");

        self.client = Some(client.clone());
        Ok(client)
    }

    fn spawn_publisher(&self, client: Client, mut frames: mpsc::Receiver<AudioFrame>) -> JoinHandle<()> {
        let session_id = self.session_id.clone();
        let subject = format!("audio.frame.meeting-{}", session_id);

        tokio::spawn(async move {
            let mut sequence = 0u64;
            let mut last: Option<(u32, u16)> = None;

            while let Some(frame) = frames.recv().await {
                last = Some((frame.sample_rate, frame.channels));
                let message = AudioFrameMessage {
                    session_id: session_id.clone(),
                    sequence,
                    pcm: base64::engine::general_purpose::STANDARD.encode(frame.to_pcm_bytes()),
                    sample_rate: frame.sample_rate,
                    channels: frame.channels,
                    timestamp: Utc::now().to_rfc3339(),
                    final_frame: false,
                };
                if let Err(e) = publish(&client, &subject, &message).await {
                    warn!("Dropping audio frame {}: {:#}", sequence, e);
                }
                sequence += 1;
            }

            // Microphone ended; let the STT service flush its last utterance
            if let Some((sample_rate, channels)) = last {
                let message = AudioFrameMessage {
                    session_id: session_id.clone(),
                    sequence,
                    pcm: String::new(),
                    sample_rate,
                    channels,
                    timestamp: Utc::now().to_rfc3339(),
                    final_frame: true,
                };
                if let Err(e) = publish(&client, &subject, &message).await {
                    warn!("Final audio frame not published: {:#}", e);
                }
            }
            debug!("Audio publisher for {} finished after {} frames", session_id, sequence);
        })
    }
}

async fn publish(client: &Client, subject: &str, message: &AudioFrameMessage) -> Result<()> {
    let payload = serde_json::to_vec(message)?;
    client
        .publish(subject.to_string(), payload.into())
        .await
        .context("Failed to publish audio frame")?;
    Ok(())
}

#[async_trait::async_trait]
impl SpeechRecognizer for NatsRecognizer {
    fn attach_audio(&mut self, frames: mpsc::Receiver<AudioFrame>) {
        self.audio = Some(frames);
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<RecognitionEvent>, SessionError> {
        if self.audio.is_none() && self.publisher.is_none() {
            return Err(SessionError::RecognitionPermissionDenied);
        }

        let client = self
            .client()
            .await
            .map_err(|e| SessionError::Transport(format!("{:#}", e)))?;

        if let Some(frames) = self.audio.take() {
            self.publisher = Some(self.spawn_publisher(client.clone(), frames));
        }

        if let Some(previous) = self.listener.take() {
            previous.abort();
        }

        let mut subscriber = client
            .subscribe(TRANSCRIPT_SUBJECT)
            .await
            .map_err(|e| SessionError::Transport(format!("Failed to subscribe to transcripts: {}", e)))?;
        debug!("Subscribed to {}", TRANSCRIPT_SUBJECT);

        let (tx, rx) = mpsc::channel(32);
        let session_id = self.session_id.clone();
        let silence = self.no_speech_timeout;

        self.listener = Some(tokio::spawn(async move {
            let mut deadline = Instant::now() + silence;
            loop {
                let message = match tokio::time::timeout_at(deadline, subscriber.next()).await {
                    Err(_) => {
                        let _ = tx.send(RecognitionEvent::NoSpeech).await;
                        break;
                    }
                    Ok(None) => {
                        let _ = tx.send(RecognitionEvent::End).await;
                        break;
                    }
                    Ok(Some(message)) => message,
                };

                let transcript: TranscriptMessage = match serde_json::from_slice(&message.payload) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("Failed to parse transcript message: {}", e);
                        continue;
                    }
                };

                let Some(event) = transcript.to_event(&session_id) else {
                    continue;
                };
                if matches!(event, RecognitionEvent::FinalResult { .. }) {
                    deadline = Instant::now() + silence;
                }
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        }));

        Ok(rx)
    }

    async fn stop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        if let Some(publisher) = self.publisher.take() {
            publisher.abort();
        }
        self.audio = None;
        if let Some(client) = self.client.take() {
            if let Err(e) = client.flush().await {
                debug!("NATS flush on stop failed: {}", e);
            }
            info!("Closed NATS connection");
        }
    }

    fn name(&self) -> &str {
        "nats"
    }
}
