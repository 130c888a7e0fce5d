use anyhow::Context;
use hound::WavReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::capture::{MediaConstraints, MediaDevices};
use super::track::{AudioFrame, LocalStream, MediaTrack, TrackKind};
use crate::error::SessionError;

/// Decoded WAV file
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds = samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Split into frames of `frame_ms` milliseconds
    pub fn frames(&self, frame_ms: u64) -> Vec<AudioFrame> {
        let per_frame = (self.sample_rate as u64 * self.channels as u64 * frame_ms / 1000).max(1) as usize;
        self.samples
            .chunks(per_frame)
            .enumerate()
            .map(|(i, chunk)| AudioFrame {
                samples: chunk.to_vec(),
                sample_rate: self.sample_rate,
                channels: self.channels,
                timestamp_ms: i as u64 * frame_ms,
            })
            .collect()
    }
}

/// Microphone played back from a WAV file in real time. There is no camera.
pub struct WavFileDevices {
    path: PathBuf,
    frame_ms: u64,
}

impl WavFileDevices {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            frame_ms: 100,
        }
    }
}

#[async_trait::async_trait]
impl MediaDevices for WavFileDevices {
    async fn open(&self, constraints: &MediaConstraints) -> Result<LocalStream, SessionError> {
        if constraints.video {
            return Err(SessionError::MediaUnavailable(
                "no camera available on file device".to_string(),
            ));
        }
        if !constraints.audio {
            return Ok(LocalStream::new(Vec::new()));
        }

        let file = AudioFile::open(&self.path)
            .map_err(|e| SessionError::MediaUnavailable(format!("{:#}", e)))?;

        let track = MediaTrack::new(TrackKind::Audio, file.path.clone());
        let (tx, rx) = mpsc::channel(64);

        let frames = file.frames(self.frame_ms);
        let producer = track.clone();
        let pace = Duration::from_millis(self.frame_ms);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pace);
            for frame in frames {
                ticker.tick().await;
                if producer.is_ended() {
                    break;
                }
                // Muted tracks keep time but emit nothing
                if !producer.is_enabled() {
                    continue;
                }
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
            producer.stop();
            debug!("WAV playback finished for '{}'", producer.label());
        });

        Ok(LocalStream::new(vec![track]).with_audio_frames(rx))
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}
