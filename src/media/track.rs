use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Buffer of each branch of `tee_audio`
const TEE_CAPACITY: usize = 64;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    pub fn to_pcm_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Default)]
struct TrackState {
    enabled: AtomicBool,
    ended: AtomicBool,
}

/// A local capture track.
///
/// Clones share state, so the device producing samples observes toggles and
/// `stop()` made through the session's copy.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    kind: TrackKind,
    label: String,
    state: Arc<TrackState>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        let state = TrackState::default();
        state.enabled.store(true, Ordering::SeqCst);
        Self {
            kind,
            label: label.into(),
            state: Arc::new(state),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_ended(&self) -> bool {
        self.state.ended.load(Ordering::SeqCst)
    }

    /// Stop the track. Returns false if it had already ended.
    pub fn stop(&self) -> bool {
        let was_live = !self.state.ended.swap(true, Ordering::SeqCst);
        if was_live {
            debug!("Stopped {:?} track '{}'", self.kind, self.label);
        }
        was_live
    }
}

/// Camera/microphone tracks acquired for one session.
///
/// Dropping the stream stops every track.
#[derive(Debug)]
pub struct LocalStream {
    tracks: Vec<MediaTrack>,
    audio_frames: Option<mpsc::Receiver<AudioFrame>>,
}

impl LocalStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            tracks,
            audio_frames: None,
        }
    }

    /// Attach the receiver carrying the microphone's PCM frames.
    pub fn with_audio_frames(mut self, frames: mpsc::Receiver<AudioFrame>) -> Self {
        self.audio_frames = Some(frames);
        self
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    pub fn has_video(&self) -> bool {
        self.track(TrackKind::Video).is_some()
    }

    /// Hand the microphone frames to a consumer. Only the first caller gets them.
    pub fn take_audio_frames(&mut self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.audio_frames.take()
    }

    /// Split the microphone frames so a second consumer gets a copy.
    ///
    /// The stream keeps the primary feed and the copy is returned. Each
    /// branch drops frames while its consumer is behind or not yet attached,
    /// so neither can stall the other. `None` when the frames were taken.
    pub fn tee_audio(&mut self) -> Option<mpsc::Receiver<AudioFrame>> {
        let mut source = self.audio_frames.take()?;
        let (primary_tx, primary_rx) = mpsc::channel(TEE_CAPACITY);
        let (copy_tx, copy_rx) = mpsc::channel(TEE_CAPACITY);

        tokio::spawn(async move {
            while let Some(frame) = source.recv().await {
                if primary_tx.is_closed() && copy_tx.is_closed() {
                    break;
                }
                let _ = copy_tx.try_send(frame.clone());
                let _ = primary_tx.try_send(frame);
            }
            debug!("Microphone tee finished");
        });

        self.audio_frames = Some(primary_rx);
        Some(copy_rx)
    }

    /// Enable or disable every track of `kind`. Returns false when there is none.
    pub fn set_enabled(&self, kind: TrackKind, enabled: bool) -> bool {
        let mut found = false;
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
            found = true;
        }
        found
    }

    /// Tracks that have not been stopped.
    pub fn active_tracks(&self) -> usize {
        self.tracks.iter().filter(|t| !t.is_ended()).count()
    }

    /// Stop every track; returns how many were still live.
    pub fn stop_all(&mut self) -> usize {
        self.audio_frames = None;
        self.tracks.iter().filter(|t| t.stop()).count()
    }
}

impl Drop for LocalStream {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_clones_share_state() {
        let track = MediaTrack::new(TrackKind::Audio, "mic");
        let device_side = track.clone();

        track.set_enabled(false);
        assert!(!device_side.is_enabled());

        assert!(track.stop());
        assert!(device_side.is_ended());
        assert!(!device_side.stop(), "second stop is a no-op");
    }

    #[test]
    fn test_stream_stop_all_is_idempotent() {
        let mut stream = LocalStream::new(vec![
            MediaTrack::new(TrackKind::Audio, "mic"),
            MediaTrack::new(TrackKind::Video, "camera"),
        ]);
        assert_eq!(stream.active_tracks(), 2);
        assert_eq!(stream.stop_all(), 2);
        assert_eq!(stream.stop_all(), 0);
        assert_eq!(stream.active_tracks(), 0);
    }

    #[test]
    fn test_dropping_stream_stops_tracks() {
        let mic = MediaTrack::new(TrackKind::Audio, "mic");
        let observer = mic.clone();
        drop(LocalStream::new(vec![mic]));
        assert!(observer.is_ended());
    }

    #[tokio::test]
    async fn test_tee_feeds_both_consumers() {
        let (tx, rx) = mpsc::channel(8);
        let mut stream =
            LocalStream::new(vec![MediaTrack::new(TrackKind::Audio, "mic")]).with_audio_frames(rx);

        let mut copy = stream.tee_audio().unwrap();
        let mut primary = stream.take_audio_frames().unwrap();
        assert!(stream.tee_audio().is_none());

        for ts in [0, 100] {
            tx.send(AudioFrame {
                samples: vec![0; 160],
                sample_rate: 16000,
                channels: 1,
                timestamp_ms: ts,
            })
            .await
            .unwrap();
        }
        drop(tx);

        assert_eq!(primary.recv().await.unwrap().timestamp_ms, 0);
        assert_eq!(primary.recv().await.unwrap().timestamp_ms, 100);
        assert!(primary.recv().await.is_none());
        assert_eq!(copy.recv().await.unwrap().timestamp_ms, 0);
        assert_eq!(copy.recv().await.unwrap().timestamp_ms, 100);
        assert!(copy.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_tee_keeps_copy_flowing_when_primary_is_idle() {
        let (tx, rx) = mpsc::channel(8);
        let mut stream = LocalStream::new(Vec::new()).with_audio_frames(rx);
        let mut copy = stream.tee_audio().unwrap();

        // Nobody reads the primary feed; the copy still sees every frame
        for ts in 0..(TEE_CAPACITY as u64 * 2) {
            let frame = AudioFrame {
                samples: vec![0; 16],
                sample_rate: 16000,
                channels: 1,
                timestamp_ms: ts,
            };
            tx.send(frame).await.unwrap();
            assert_eq!(copy.recv().await.unwrap().timestamp_ms, ts);
        }
    }

    #[test]
    fn test_pcm_bytes_little_endian() {
        let frame = AudioFrame {
            samples: vec![1, -2],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: 0,
        };
        assert_eq!(frame.to_pcm_bytes(), vec![1, 0, 0xFE, 0xFF]);
    }
}
