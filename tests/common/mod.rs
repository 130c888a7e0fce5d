// Shared fixtures for the integration tests: scripted devices, a loopback
// peer transport, a scripted recognizer, and recording analyzer/store.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use session_rtc::error::SessionError;
use session_rtc::media::{
    AudioFrame, FrameSlot, LocalStream, MediaConstraints, MediaDevices, MediaTrack, TrackKind,
    VideoFrame, VideoSink,
};
use session_rtc::peer::{PeerEvent, PeerTransport, SessionDescription};
use session_rtc::session::{EndSessionRequest, EndSessionResponse, SessionStore};
use session_rtc::signaling::{IceCandidate, SignalingMessage, SignalingTransport};
use session_rtc::telemetry::{
    AnalyzerProvider, CompositeScores, EmotionSample, EmotionSummary, RecognitionEvent,
    SpeechRecognizer, SuggestedQuestion,
};
use session_rtc::BearerToken;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn token() -> BearerToken {
    BearerToken::parse("test-token").unwrap()
}

/// Poll `cond` until it holds or `limit` elapses.
pub async fn wait_for(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

pub fn gray_frame() -> VideoFrame {
    VideoFrame {
        width: 8,
        height: 8,
        rgb: vec![128; 8 * 8 * 3],
        captured_at: Utc::now(),
    }
}

pub fn sample(label: &str, stress: f64, anxiety: f64, engagement: f64) -> EmotionSample {
    EmotionSample {
        dominant_label: label.to_string(),
        confidence: 0.8,
        composite_scores: CompositeScores {
            stress,
            anxiety,
            engagement,
        },
        captured_at: Utc::now(),
    }
}

// ============================================================================
// Media devices
// ============================================================================

/// Camera and microphone that succeed or fail as told. Every track handed
/// out is kept so tests can check it was stopped.
pub struct ScriptedDevices {
    pub camera: bool,
    pub microphone: bool,
    /// Delay every open by this much
    pub delay: Option<Duration>,
    pub opened: Mutex<Vec<MediaTrack>>,
    pub attempts: AtomicUsize,
}

impl ScriptedDevices {
    pub fn new(camera: bool, microphone: bool) -> Self {
        Self {
            camera,
            microphone,
            delay: None,
            opened: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn live_tracks(&self) -> usize {
        self.opened.lock().unwrap().iter().filter(|t| !t.is_ended()).count()
    }
}

#[async_trait::async_trait]
impl MediaDevices for ScriptedDevices {
    async fn open(&self, constraints: &MediaConstraints) -> Result<LocalStream, SessionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if constraints.video && !self.camera {
            return Err(SessionError::MediaUnavailable("camera busy".to_string()));
        }
        if constraints.audio && !self.microphone {
            return Err(SessionError::MediaUnavailable("microphone denied".to_string()));
        }

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, "mic"));
        }
        if constraints.video {
            tracks.push(MediaTrack::new(TrackKind::Video, "cam"));
        }
        self.opened.lock().unwrap().extend(tracks.iter().cloned());

        let (tx, rx) = mpsc::channel(8);
        let _ = tx.try_send(AudioFrame {
            samples: vec![0; 160],
            sample_rate: 16_000,
            channels: 1,
            timestamp_ms: 0,
        });
        Ok(LocalStream::new(tracks).with_audio_frames(rx))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Loopback peer transport
// ============================================================================

/// What a test can observe and inject on a `LoopbackPeer`.
#[derive(Clone, Default)]
pub struct LoopbackProbe {
    events: Arc<Mutex<Option<mpsc::UnboundedSender<PeerEvent>>>>,
    pub added_candidates: Arc<Mutex<Vec<IceCandidate>>>,
    pub remote_descriptions: Arc<Mutex<Vec<SessionDescription>>>,
    pub closes: Arc<AtomicUsize>,
    pub frames: Arc<FrameSlot>,
}

impl LoopbackProbe {
    pub fn emit(&self, event: PeerEvent) -> bool {
        match self.events.lock().unwrap().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn candidates(&self) -> Vec<String> {
        self.added_candidates
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.candidate.clone())
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Peer transport with no network. It reports one local candidate when its
/// local description is set, and ICE connected once both descriptions are
/// set (unless built `silent`).
pub struct LoopbackPeer {
    name: String,
    probe: LoopbackProbe,
    has_local: bool,
    has_remote: bool,
    silent: bool,
    fail_remote_description: bool,
    decodes_video: bool,
}

impl LoopbackPeer {
    pub fn new(name: &str) -> (Self, LoopbackProbe) {
        let probe = LoopbackProbe::default();
        (
            Self {
                name: name.to_string(),
                probe: probe.clone(),
                has_local: false,
                has_remote: false,
                silent: false,
                fail_remote_description: false,
                decodes_video: true,
            },
            probe,
        )
    }

    /// Never reports connectivity.
    pub fn silent(name: &str) -> (Self, LoopbackProbe) {
        let (mut peer, probe) = Self::new(name);
        peer.silent = true;
        (peer, probe)
    }

    /// Rejects every remote description.
    pub fn rejecting(name: &str) -> (Self, LoopbackProbe) {
        let (mut peer, probe) = Self::new(name);
        peer.fail_remote_description = true;
        (peer, probe)
    }

    /// Connects like `new` but offers no decoded remote video.
    pub fn without_video(name: &str) -> (Self, LoopbackProbe) {
        let (mut peer, probe) = Self::new(name);
        peer.decodes_video = false;
        (peer, probe)
    }

    fn maybe_connected(&self) {
        if self.has_local && self.has_remote && !self.silent {
            self.probe.emit(PeerEvent::IceConnected);
        }
    }
}

#[async_trait::async_trait]
impl PeerTransport for LoopbackPeer {
    async fn open(
        &mut self,
        _local: &mut LocalStream,
    ) -> Result<mpsc::UnboundedReceiver<PeerEvent>, SessionError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.probe.events.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn create_offer(&mut self) -> Result<SessionDescription, SessionError> {
        Ok(SessionDescription::offer(format!("v=0 offer from {}", self.name)))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, SessionError> {
        if !self.has_remote {
            return Err(SessionError::NegotiationFailed("no remote offer".to_string()));
        }
        Ok(SessionDescription::answer(format!("v=0 answer from {}", self.name)))
    }

    async fn set_local_description(&mut self, _desc: SessionDescription) -> Result<(), SessionError> {
        self.has_local = true;
        self.probe.emit(PeerEvent::LocalCandidate(IceCandidate {
            candidate: format!("candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host {}", self.name),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }));
        self.maybe_connected();
        Ok(())
    }

    async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<(), SessionError> {
        if self.fail_remote_description {
            return Err(SessionError::NegotiationFailed("malformed sdp".to_string()));
        }
        self.probe.remote_descriptions.lock().unwrap().push(desc);
        self.has_remote = true;
        self.maybe_connected();
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), SessionError> {
        self.probe.added_candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        self.probe.events.lock().unwrap().take();
        Ok(())
    }

    fn remote_video(&self) -> Option<Arc<dyn VideoSink>> {
        if self.decodes_video {
            Some(self.probe.frames.clone())
        } else {
            None
        }
    }

    fn name(&self) -> &str {
        "loopback"
    }
}

// ============================================================================
// Signaling
// ============================================================================

/// Handle on a `ScriptedSignaling` connection: inject inbound messages and
/// inspect what the session sent.
#[derive(Clone, Default)]
pub struct SignalingProbe {
    inbound: Arc<Mutex<Option<mpsc::UnboundedSender<SignalingMessage>>>>,
    pub sent: Arc<Mutex<Vec<SignalingMessage>>>,
    pub closes: Arc<AtomicUsize>,
}

impl SignalingProbe {
    pub fn deliver(&self, message: SignalingMessage) -> bool {
        match self.inbound.lock().unwrap().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Drop the relay side, as if the connection was lost.
    pub fn hang_up(&self) {
        self.inbound.lock().unwrap().take();
    }

    pub fn sent_events(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(|m| m.event_name()).collect()
    }
}

/// Relay connection driven entirely by the test
pub struct ScriptedSignaling {
    probe: SignalingProbe,
    reject_with: Option<SessionError>,
}

impl ScriptedSignaling {
    pub fn new() -> (Self, SignalingProbe) {
        let probe = SignalingProbe::default();
        (
            Self {
                probe: probe.clone(),
                reject_with: None,
            },
            probe,
        )
    }

    pub fn rejecting(error: SessionError) -> (Self, SignalingProbe) {
        let (mut signaling, probe) = Self::new();
        signaling.reject_with = Some(error);
        (signaling, probe)
    }
}

#[async_trait::async_trait]
impl SignalingTransport for ScriptedSignaling {
    async fn connect(
        &mut self,
        _token: &BearerToken,
    ) -> Result<mpsc::UnboundedReceiver<SignalingMessage>, SessionError> {
        if let Some(e) = &self.reject_with {
            return Err(e.clone());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.probe.inbound.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    fn send(&self, message: SignalingMessage) -> Result<(), SessionError> {
        self.probe.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn close(&mut self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        self.probe.inbound.lock().unwrap().take();
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Speech recognizer
// ============================================================================

/// Each `start` plays the next scripted run. A run's channel stays open after
/// its events unless the script ends it; once the script is exhausted runs
/// stay silent.
pub struct ScriptedRecognizer {
    runs: VecDeque<Vec<RecognitionEvent>>,
    start_error: Option<SessionError>,
    held: Vec<mpsc::Sender<RecognitionEvent>>,
    pub starts: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
    pub audio_attached: Arc<AtomicUsize>,
}

impl ScriptedRecognizer {
    pub fn new(runs: Vec<Vec<RecognitionEvent>>) -> Self {
        Self {
            runs: runs.into(),
            start_error: None,
            held: Vec::new(),
            starts: Arc::new(AtomicUsize::new(0)),
            stops: Arc::new(AtomicUsize::new(0)),
            audio_attached: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every `start` fails with `error`.
    pub fn failing(error: SessionError) -> Self {
        let mut recognizer = Self::new(Vec::new());
        recognizer.start_error = Some(error);
        recognizer
    }
}

pub fn final_result(text: &str, captured_at: DateTime<Utc>) -> RecognitionEvent {
    RecognitionEvent::FinalResult {
        text: text.to_string(),
        captured_at,
    }
}

#[async_trait::async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    fn attach_audio(&mut self, _frames: mpsc::Receiver<AudioFrame>) {
        self.audio_attached.fetch_add(1, Ordering::SeqCst);
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<RecognitionEvent>, SessionError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.start_error {
            return Err(e.clone());
        }

        let (tx, rx) = mpsc::channel(16);
        for event in self.runs.pop_front().unwrap_or_default() {
            let _ = tx.try_send(event);
        }
        self.held.push(tx);
        Ok(rx)
    }

    async fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.held.clear();
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Analyzer
// ============================================================================

/// Analyzer returning a fixed sample, with optional latency and a failing
/// question endpoint.
pub struct RecordingAnalyzer {
    pub reading: EmotionSample,
    pub analyze_delay: Option<Duration>,
    pub fail_questions: bool,
    pub analyze_calls: AtomicUsize,
    pub question_calls: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub summaries: AtomicUsize,
}

impl RecordingAnalyzer {
    pub fn new(reading: EmotionSample) -> Self {
        Self {
            reading,
            analyze_delay: None,
            fail_questions: false,
            analyze_calls: AtomicUsize::new(0),
            question_calls: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            summaries: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl AnalyzerProvider for RecordingAnalyzer {
    async fn start_tracking(&self, _session_id: &str) -> Result<(), SessionError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn analyze_frame(
        &self,
        _session_id: &str,
        jpeg_base64: String,
        captured_at: DateTime<Utc>,
    ) -> Result<Option<EmotionSample>, SessionError> {
        assert!(!jpeg_base64.is_empty());
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.analyze_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Some(EmotionSample {
            captured_at,
            ..self.reading.clone()
        }))
    }

    async fn suggested_question(
        &self,
        _session_id: &str,
        _latest: &EmotionSample,
    ) -> Result<Option<SuggestedQuestion>, SessionError> {
        self.question_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_questions {
            return Err(SessionError::Analyzer("HTTP 503".to_string()));
        }
        Ok(Some(SuggestedQuestion {
            question: "What would help right now?".to_string(),
            trigger: "analyzer".to_string(),
            confidence: 0.9,
            method: "analyzer".to_string(),
        }))
    }

    async fn emotion_summary(&self, _session_id: &str) -> Result<Option<EmotionSummary>, SessionError> {
        self.summaries.fetch_add(1, Ordering::SeqCst);
        Ok(Some(EmotionSummary {
            total_frames_analyzed: self.analyze_calls.load(Ordering::SeqCst) as u64,
            predominant_emotion: self.reading.dominant_label.clone(),
            ..Default::default()
        }))
    }

    async fn stop_tracking(&self, _session_id: &str) -> Result<(), SessionError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

// ============================================================================
// Session store
// ============================================================================

#[derive(Default)]
pub struct RecordingStore {
    pub fail: bool,
    pub requests: Mutex<Vec<(String, EndSessionRequest)>>,
}

impl RecordingStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl SessionStore for RecordingStore {
    async fn end_session(
        &self,
        session_id: &str,
        request: &EndSessionRequest,
    ) -> Result<EndSessionResponse, SessionError> {
        self.requests
            .lock()
            .unwrap()
            .push((session_id.to_string(), request.clone()));
        if self.fail {
            return Err(SessionError::Persistence("HTTP 500: database unavailable".to_string()));
        }
        Ok(EndSessionResponse {
            note_auto_generated: !request.transcription_data.is_empty(),
            note_id: Some("note-1".to_string()),
        })
    }
}
