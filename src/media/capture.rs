use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::track::{LocalStream, TrackKind};
use crate::error::SessionError;

/// Which devices to request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
}

impl MediaConstraints {
    pub fn audio_video() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }

    pub fn audio_only() -> Self {
        Self {
            video: false,
            audio: true,
        }
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self::audio_video()
    }
}

/// Capture device backend
///
/// Implementations:
/// - `WavFileDevices`: microphone read from a WAV file, no camera (headless hosts)
/// - platform camera/microphone backends supplied by the embedding application
#[async_trait::async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open the requested devices.
    async fn open(&self, constraints: &MediaConstraints) -> Result<LocalStream, SessionError>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// What `acquire` ended up with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    AudioVideo,
    AudioOnly,
}

/// Owns the session's local camera/microphone stream.
pub struct MediaCaptureSession {
    devices: Arc<dyn MediaDevices>,
    acquire_timeout: Duration,
    stream: Option<LocalStream>,
    degradation: Option<SessionError>,
}

impl MediaCaptureSession {
    pub fn new(devices: Arc<dyn MediaDevices>, acquire_timeout: Duration) -> Self {
        Self {
            devices,
            acquire_timeout,
            stream: None,
            degradation: None,
        }
    }

    /// Acquire local media.
    ///
    /// Each attempt is bounded by the acquire timeout. When the requested
    /// constraints fail and video was part of them, an audio-only attempt is
    /// made before giving up with `MediaUnavailable`.
    pub async fn acquire(&mut self, constraints: MediaConstraints) -> Result<Capability, SessionError> {
        if self.stream.is_some() {
            warn!("Media already acquired, releasing previous stream first");
            self.release();
        }

        info!(
            "Acquiring media from {} (video={}, audio={})",
            self.devices.name(),
            constraints.video,
            constraints.audio
        );

        let first_error = match self.open_bounded(&constraints).await {
            Ok(stream) => {
                let capability = if stream.has_video() {
                    Capability::AudioVideo
                } else {
                    Capability::AudioOnly
                };
                if constraints.video && capability == Capability::AudioOnly {
                    self.degradation = Some(SessionError::MediaDegraded(
                        "device returned no video track".to_string(),
                    ));
                }
                self.stream = Some(stream);
                return Ok(capability);
            }
            Err(e) => e,
        };

        if !constraints.video {
            error!("Audio capture failed: {}", first_error);
            return Err(SessionError::MediaUnavailable(first_error.to_string()));
        }

        warn!("Camera+microphone failed ({}), retrying audio-only", first_error);

        match self.open_bounded(&MediaConstraints::audio_only()).await {
            Ok(stream) => {
                let degraded = SessionError::MediaDegraded(first_error.to_string());
                warn!("{}", degraded);
                self.degradation = Some(degraded);
                self.stream = Some(stream);
                Ok(Capability::AudioOnly)
            }
            Err(e) => {
                error!("Audio-only capture failed: {}", e);
                Err(SessionError::MediaUnavailable(format!(
                    "{}; audio-only: {}",
                    first_error, e
                )))
            }
        }
    }

    async fn open_bounded(&self, constraints: &MediaConstraints) -> Result<LocalStream, SessionError> {
        match tokio::time::timeout(self.acquire_timeout, self.devices.open(constraints)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::MediaUnavailable(format!(
                "acquisition timed out after {}ms",
                self.acquire_timeout.as_millis()
            ))),
        }
    }

    /// Returns false when there is no video track to toggle.
    pub fn toggle_video(&mut self, enabled: bool) -> bool {
        self.toggle(TrackKind::Video, enabled)
    }

    /// Returns false when there is no audio track to toggle.
    pub fn toggle_audio(&mut self, enabled: bool) -> bool {
        self.toggle(TrackKind::Audio, enabled)
    }

    fn toggle(&mut self, kind: TrackKind, enabled: bool) -> bool {
        match &self.stream {
            Some(stream) => {
                let toggled = stream.set_enabled(kind, enabled);
                debug!("Toggle {:?} -> {} (applied={})", kind, enabled, toggled);
                toggled
            }
            None => false,
        }
    }

    /// Stop every track. Safe to call any number of times.
    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let stopped = stream.stop_all();
            info!("Released local media ({} tracks stopped)", stopped);
        }
    }

    pub fn stream(&self) -> Option<&LocalStream> {
        self.stream.as_ref()
    }

    pub fn stream_mut(&mut self) -> Option<&mut LocalStream> {
        self.stream.as_mut()
    }

    /// Set when the session is running with less than it asked for.
    pub fn degradation(&self) -> Option<&SessionError> {
        self.degradation.as_ref()
    }

    pub fn active_tracks(&self) -> usize {
        self.stream.as_ref().map(|s| s.active_tracks()).unwrap_or(0)
    }
}

impl Drop for MediaCaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}
