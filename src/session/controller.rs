use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::resources::SessionResources;
use super::stats::SessionStats;
use super::store::{EndSessionRequest, EndSessionResponse, SessionStore};
use super::transcript::{finalize, FinalizedSegment, TranscriptSegment};
use crate::auth::BearerToken;
use crate::error::SessionError;
use crate::media::{Capability, MediaCaptureSession, MediaDevices};
use crate::peer::{PeerConnectionManager, PeerConnectionState, PeerEvent, PeerTransport};
use crate::signaling::{ParticipantRole, PeerId, SignalingChannel, SignalingMessage, SignalingTransport};
use crate::telemetry::{
    AnalyzerProvider, EmotionSample, EmotionSummary, EmotionWindow, SpeechRecognizer,
    SuggestedQuestion, TelemetryContext, TelemetryEvent, TelemetryScheduler,
};

/// Collaborators a session is built from
pub struct SessionDeps {
    pub devices: Arc<dyn MediaDevices>,
    pub signaling: Box<dyn SignalingTransport>,
    pub peer: Box<dyn PeerTransport>,
    pub analyzer: Arc<dyn AnalyzerProvider>,
    /// `None` runs the session without a transcript
    pub recognizer: Option<Box<dyn SpeechRecognizer>>,
    pub store: Arc<dyn SessionStore>,
}

#[derive(Debug)]
pub enum SessionCommand {
    /// Hang up without persisting anything
    Leave,
    /// Persist the transcript, then hang up
    End,
    ToggleVideo(bool),
    ToggleAudio(bool),
    Stats(oneshot::Sender<SessionStats>),
}

/// What a call UI observes
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    PeerState(PeerConnectionState),
    /// Joined with less than was asked for, e.g. audio-only
    MediaDegraded(SessionError),
    ParticipantCount(usize),
    Transcript(TranscriptSegment),
    Emotion(EmotionSample),
    Question(SuggestedQuestion),
    TranscriptionUnavailable(SessionError),
    /// The single notification for a fatal failure
    Terminated(SessionError),
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub transcript: Vec<FinalizedSegment>,
    pub persisted: Option<EndSessionResponse>,
    pub persistence_error: Option<SessionError>,
    pub emotion_summary: Option<EmotionSummary>,
    pub duration_secs: f64,
}

#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Left,
    Ended(SessionReport),
    /// The remote participant hung up
    PeerLeft,
}

/// Cloneable remote control for a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl SessionHandle {
    /// Returns false once the session is gone.
    pub fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn leave(&self) -> bool {
        self.send(SessionCommand::Leave)
    }

    pub fn end(&self) -> bool {
        self.send(SessionCommand::End)
    }

    pub fn toggle_video(&self, enabled: bool) -> bool {
        self.send(SessionCommand::ToggleVideo(enabled))
    }

    pub fn toggle_audio(&self, enabled: bool) -> bool {
        self.send(SessionCommand::ToggleAudio(enabled))
    }

    pub async fn stats(&self) -> Option<SessionStats> {
        let (reply, rx) = oneshot::channel();
        if !self.send(SessionCommand::Stats(reply)) {
            return None;
        }
        rx.await.ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }
}

/// Receivers the dispatch loop selects over, kept apart from the controller
/// so handlers can borrow it mutably.
struct Inbox {
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    signaling: Option<mpsc::UnboundedReceiver<SignalingMessage>>,
    peer: Option<mpsc::UnboundedReceiver<PeerEvent>>,
    telemetry: Option<mpsc::UnboundedReceiver<TelemetryEvent>>,
}

async fn recv_opt<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Runs one participant's side of a two-party call.
///
/// Protocol: acquire media, connect signaling, announce the join, negotiate
/// (initiator offers once the remote is present; responder answers), start
/// telemetry once connected, then run until leave, end, remote hang-up or a
/// fatal error. Every exit path goes through `cleanup`.
pub struct SessionLifecycleController {
    config: SessionConfig,
    token: BearerToken,
    resources: SessionResources,
    analyzer: Arc<dyn AnalyzerProvider>,
    recognizer: Option<Box<dyn SpeechRecognizer>>,
    store: Arc<dyn SessionStore>,

    commands_tx: mpsc::UnboundedSender<SessionCommand>,
    commands_rx: Option<mpsc::UnboundedReceiver<SessionCommand>>,
    inbox: Option<Inbox>,
    telemetry_events: Option<mpsc::UnboundedReceiver<TelemetryEvent>>,
    updates: broadcast::Sender<SessionUpdate>,

    transcript: Vec<TranscriptSegment>,
    emotions: EmotionWindow,
    latest_question: Option<SuggestedQuestion>,
    local_peer: Option<PeerId>,
    participant_count: usize,
    reported_state: PeerConnectionState,
    started_at: DateTime<Utc>,
    joined: bool,
    cleaned_up: bool,
}

impl SessionLifecycleController {
    pub fn new(config: SessionConfig, token: BearerToken, deps: SessionDeps) -> Self {
        let identity = &config.identity;
        let resources = SessionResources::new(
            MediaCaptureSession::new(deps.devices, config.acquire_timeout),
            SignalingChannel::new(deps.signaling, identity.session_id.clone()),
            PeerConnectionManager::new(deps.peer, identity.role, config.negotiation_timeout),
            TelemetryScheduler::new(config.telemetry.clone()),
        );
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(64);

        Self {
            emotions: EmotionWindow::new(config.emotion_window),
            config,
            token,
            resources,
            analyzer: deps.analyzer,
            recognizer: deps.recognizer,
            store: deps.store,
            commands_tx,
            commands_rx: Some(commands_rx),
            inbox: None,
            telemetry_events: None,
            updates,
            transcript: Vec::new(),
            latest_question: None,
            local_peer: None,
            participant_count: 0,
            reported_state: PeerConnectionState::Idle,
            started_at: Utc::now(),
            joined: false,
            cleaned_up: false,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            commands: self.commands_tx.clone(),
            updates: self.updates.clone(),
        }
    }

    fn session_id(&self) -> &str {
        &self.config.identity.session_id
    }

    fn role(&self) -> ParticipantRole {
        self.config.identity.role
    }

    fn notify(&self, update: SessionUpdate) {
        let _ = self.updates.send(update);
    }

    // ========================================================================
    // Join
    // ========================================================================

    /// Acquire media, connect signaling and announce the join. On failure
    /// everything acquired so far is released before the error is returned.
    pub async fn join(&mut self) -> Result<Capability, SessionError> {
        match self.try_join().await {
            Ok(capability) => {
                if let Some(degradation) = self.resources.media.degradation() {
                    warn!("Session {} continues degraded: {}", self.session_id(), degradation);
                    self.notify(SessionUpdate::MediaDegraded(degradation.clone()));
                }
                Ok(capability)
            }
            Err(e) => {
                error!("Failed to join session {}: {}", self.session_id(), e);
                self.cleanup().await;
                self.notify(SessionUpdate::Terminated(e.clone()));
                Err(e)
            }
        }
    }

    async fn try_join(&mut self) -> Result<Capability, SessionError> {
        if self.joined || self.cleaned_up {
            return Err(SessionError::NegotiationFailed(
                "session can only be joined once".to_string(),
            ));
        }
        self.token.check(Utc::now())?;

        let identity = self.config.identity.clone();
        info!(
            "Joining session {} as {} ({})",
            identity.session_id, identity.role, identity.display_name
        );

        let capability = self
            .resources
            .media
            .acquire(self.config.media_constraints)
            .await?;

        let stream = self
            .resources
            .media
            .stream_mut()
            .ok_or_else(|| SessionError::MediaUnavailable("no local stream".to_string()))?;
        let peer_events = self.resources.peer.open(stream).await?;

        let signaling = self.resources.signaling.connect(&self.token).await?;
        self.resources
            .signaling
            .announce_join(identity.role, &identity.display_name)?;

        let commands = self.commands_rx.take().ok_or_else(|| {
            SessionError::NegotiationFailed("session can only be joined once".to_string())
        })?;
        self.inbox = Some(Inbox {
            commands,
            signaling: Some(signaling),
            peer: Some(peer_events),
            telemetry: None,
        });
        self.joined = true;
        self.started_at = Utc::now();

        info!("Joined session {} ({:?})", identity.session_id, capability);
        Ok(capability)
    }

    // ========================================================================
    // Dispatch loop
    // ========================================================================

    /// Drive the session until it ends. Fatal errors are returned after
    /// cleanup has run.
    pub async fn run(&mut self) -> Result<SessionOutcome, SessionError> {
        let Some(mut inbox) = self.inbox.take() else {
            return Err(SessionError::SignalingDisconnected(
                "session is not joined".to_string(),
            ));
        };

        match self.dispatch(&mut inbox).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.cleanup().await;
                error!("Session {} terminated: {}", self.session_id(), e);
                self.notify(SessionUpdate::Terminated(e.clone()));
                Err(e)
            }
        }
    }

    async fn dispatch(&mut self, inbox: &mut Inbox) -> Result<SessionOutcome, SessionError> {
        loop {
            let deadline = self.resources.peer.negotiation_deadline();

            tokio::select! {
                Some(command) = inbox.commands.recv() => {
                    if let Some(outcome) = self.handle_command(command).await? {
                        return Ok(outcome);
                    }
                }
                message = recv_opt(&mut inbox.signaling) => {
                    let Some(message) = message else {
                        return Err(SessionError::SignalingDisconnected(
                            "relay connection closed".to_string(),
                        ));
                    };
                    if let Some(outcome) = self.handle_signaling(message).await? {
                        return Ok(outcome);
                    }
                }
                event = recv_opt(&mut inbox.peer) => match event {
                    Some(event) => self.handle_peer_event(event).await?,
                    None => {
                        debug!("Peer event stream ended");
                        inbox.peer = None;
                    }
                },
                event = recv_opt(&mut inbox.telemetry) => match event {
                    Some(event) => self.handle_telemetry(event),
                    None => inbox.telemetry = None,
                },
                _ = sleep_until_opt(deadline) => {
                    return Err(self.resources.peer.on_negotiation_timeout());
                }
            }

            if let Some(events) = self.telemetry_events.take() {
                inbox.telemetry = Some(events);
            }
            self.publish_peer_state();
        }
    }

    fn publish_peer_state(&mut self) {
        let state = self.resources.peer.state();
        if state != self.reported_state {
            self.reported_state = state;
            self.notify(SessionUpdate::PeerState(state));
        }
    }

    async fn handle_command(
        &mut self,
        command: SessionCommand,
    ) -> Result<Option<SessionOutcome>, SessionError> {
        match command {
            SessionCommand::Leave => {
                info!("Leaving session {}", self.session_id());
                self.cleanup().await;
                Ok(Some(SessionOutcome::Left))
            }
            SessionCommand::End => {
                let report = self.end_session().await?;
                Ok(Some(SessionOutcome::Ended(report)))
            }
            SessionCommand::ToggleVideo(enabled) => {
                self.resources.media.toggle_video(enabled);
                Ok(None)
            }
            SessionCommand::ToggleAudio(enabled) => {
                self.resources.media.toggle_audio(enabled);
                Ok(None)
            }
            SessionCommand::Stats(reply) => {
                let _ = reply.send(self.stats());
                Ok(None)
            }
        }
    }

    fn send_all(&self, messages: Vec<SignalingMessage>) -> Result<(), SessionError> {
        for message in messages {
            self.resources.signaling.send(message)?;
        }
        Ok(())
    }

    fn set_participant_count(&mut self, count: usize) {
        if count != self.participant_count {
            self.participant_count = count;
            self.notify(SessionUpdate::ParticipantCount(count));
        }
    }

    async fn handle_signaling(
        &mut self,
        message: SignalingMessage,
    ) -> Result<Option<SessionOutcome>, SessionError> {
        debug!("<- {}", message.event_name());

        match message {
            SignalingMessage::SessionState {
                peer_id,
                participants,
                participant_count,
                ..
            } => {
                info!(
                    "Relay assigned {} ({} participants present)",
                    peer_id, participant_count
                );
                self.set_participant_count(participant_count);
                for participant in participants.into_iter().filter(|p| p.peer_id != peer_id) {
                    let out = self.resources.peer.on_remote_joined(participant.peer_id).await?;
                    self.send_all(out)?;
                }
                self.local_peer = Some(peer_id);
            }
            SignalingMessage::ParticipantJoined {
                peer_id,
                role,
                display_name,
                participant_count,
            } => {
                info!("{} joined as {} ({})", display_name, role, peer_id);
                self.set_participant_count(participant_count);
                if self.local_peer.as_ref() != Some(&peer_id) {
                    let out = self.resources.peer.on_remote_joined(peer_id).await?;
                    self.send_all(out)?;
                }
            }
            SignalingMessage::ParticipantLeft {
                peer_id,
                participant_count,
            } => {
                self.set_participant_count(participant_count);
                let remote_left = match (peer_id.as_ref(), self.resources.peer.remote_peer()) {
                    (Some(left), Some(remote)) => left == remote,
                    (None, Some(_)) => true,
                    _ => false,
                };
                if remote_left {
                    info!("Remote participant left, ending call");
                    self.cleanup().await;
                    return Ok(Some(SessionOutcome::PeerLeft));
                }
            }
            SignalingMessage::Offer {
                from_peer_id, sdp, ..
            } => {
                let out = self.resources.peer.on_offer(from_peer_id, sdp).await?;
                self.send_all(out)?;
            }
            SignalingMessage::Answer { sdp, .. } => {
                self.resources.peer.on_answer(sdp).await?;
            }
            SignalingMessage::IceCandidate { candidate, .. } => {
                self.resources.peer.on_remote_candidate(candidate).await;
            }
            SignalingMessage::TranscriptBroadcast {
                timestamp,
                speaker,
                text,
            } => {
                let segment = TranscriptSegment {
                    speaker_role: speaker,
                    text,
                    captured_at: timestamp,
                };
                self.transcript.push(segment.clone());
                self.notify(SessionUpdate::Transcript(segment));
            }
            SignalingMessage::EmotionBroadcast { emotion_data, .. } => {
                self.notify(SessionUpdate::Emotion(emotion_data));
            }
            // Before the relay acknowledges the join, an error is its refusal
            SignalingMessage::Error { message } if self.local_peer.is_none() => {
                return Err(SessionError::NegotiationFailed(format!(
                    "relay refused the join: {}",
                    message
                )));
            }
            SignalingMessage::Error { message } => {
                warn!("Relay reported an error: {}", message);
            }
            other => debug!("Ignoring {} from relay", other.event_name()),
        }
        Ok(None)
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) -> Result<(), SessionError> {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                if let Some(message) = self.resources.peer.on_local_candidate(candidate) {
                    self.resources.signaling.send(message)?;
                }
            }
            PeerEvent::IceConnected => {
                if self.resources.peer.on_ice_connected() {
                    info!("Peer connection established");
                    self.start_telemetry();
                }
            }
            PeerEvent::IceDisconnected => self.resources.peer.on_ice_disconnected(),
            PeerEvent::IceFailed => {
                if let Some(e) = self.resources.peer.on_ice_failed() {
                    return Err(e);
                }
            }
            PeerEvent::RemoteTrack(kind) => info!("Remote {:?} track attached", kind),
        }
        Ok(())
    }

    fn start_telemetry(&mut self) {
        let mut recognizer = self.recognizer.take();
        if let Some(recognizer) = recognizer.as_mut() {
            match self
                .resources
                .media
                .stream_mut()
                .and_then(|s| s.take_audio_frames())
            {
                Some(frames) => recognizer.attach_audio(frames),
                None => warn!("No microphone frames for speech recognition"),
            }
        }

        let ctx = TelemetryContext {
            session_id: self.session_id().to_string(),
            role: self.role(),
            analyzer: self.analyzer.clone(),
            remote_video: self.resources.peer.remote_video(),
            peer_state: self.resources.peer.subscribe(),
        };
        self.telemetry_events = self.resources.telemetry.start(ctx, recognizer);
    }

    fn handle_telemetry(&mut self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::EmotionSampled(sample) => {
                self.emotions.push(sample.clone());
                self.notify(SessionUpdate::Emotion(sample.clone()));
                let broadcast = SignalingMessage::EmotionBroadcast {
                    session_id: self.session_id().to_string(),
                    from_peer_id: None,
                    emotion_data: sample,
                };
                if let Err(e) = self.resources.signaling.send(broadcast) {
                    debug!("Emotion broadcast dropped: {}", e);
                }
            }
            TelemetryEvent::TranscriptFinal { text, .. } => {
                let chunk = SignalingMessage::TranscriptChunk {
                    session_id: self.session_id().to_string(),
                    text,
                    speaker_role: self.role(),
                };
                if let Err(e) = self.resources.signaling.send(chunk) {
                    warn!("Transcript chunk dropped: {}", e);
                }
            }
            TelemetryEvent::QuestionSuggested(question) => {
                self.latest_question = Some(question.clone());
                self.notify(SessionUpdate::Question(question));
            }
            TelemetryEvent::TranscriptionStopped(e) => {
                warn!("Continuing without transcript: {}", e);
                self.notify(SessionUpdate::TranscriptionUnavailable(e));
            }
        }
    }

    // ========================================================================
    // End & cleanup
    // ========================================================================

    /// Persist the finalized transcript, then clean up. A persistence
    /// failure is reported in the result; cleanup runs either way.
    pub async fn end_session(&mut self) -> Result<SessionReport, SessionError> {
        if let Err(e) = self.token.check(Utc::now()) {
            self.cleanup().await;
            return Err(e);
        }

        let session_id = self.session_id().to_string();
        let transcript = finalize(&self.transcript);
        info!(
            "Ending session {} ({} transcript segments)",
            session_id,
            transcript.len()
        );

        // Fetched before telemetry stops; stopping discards the analyzer's session
        let emotion_summary = if self.role() == ParticipantRole::Initiator && !self.emotions.is_empty() {
            match self.analyzer.emotion_summary(&session_id).await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!("Emotion summary unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let request = EndSessionRequest {
            transcription_data: transcript.clone(),
            language: self.config.language.clone(),
        };
        let (persisted, persistence_error) = match self.store.end_session(&session_id, &request).await {
            Ok(response) => {
                info!(
                    "Session {} persisted (note auto-generated: {})",
                    session_id, response.note_auto_generated
                );
                (Some(response), None)
            }
            Err(e) => {
                error!("Failed to persist session {}: {}", session_id, e);
                (None, Some(e))
            }
        };

        let duration_secs = self.duration_secs();
        self.cleanup().await;

        Ok(SessionReport {
            session_id,
            transcript,
            persisted,
            persistence_error,
            emotion_summary,
            duration_secs,
        })
    }

    /// Release everything. Safe from any state, any number of times.
    pub async fn cleanup(&mut self) {
        self.inbox = None;
        self.telemetry_events = None;
        self.resources.dispose().await;
        self.publish_peer_state();

        if !self.cleaned_up {
            self.cleaned_up = true;
            info!("Session {} cleaned up", self.session_id());
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn peer_state(&self) -> PeerConnectionState {
        self.resources.peer.state()
    }

    pub fn media(&self) -> &MediaCaptureSession {
        &self.resources.media
    }

    pub fn telemetry(&self) -> &TelemetryScheduler {
        &self.resources.telemetry
    }

    pub fn transcript(&self) -> &[TranscriptSegment] {
        &self.transcript
    }

    pub fn emotions(&self) -> &EmotionWindow {
        &self.emotions
    }

    pub fn latest_question(&self) -> Option<&SuggestedQuestion> {
        self.latest_question.as_ref()
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up
    }

    fn duration_secs(&self) -> f64 {
        (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.session_id().to_string(),
            role: self.role(),
            peer_state: self.peer_state(),
            participant_count: self.participant_count,
            active_tasks: self.resources.telemetry.active_tasks(),
            tasks: self.resources.telemetry.tasks(),
            is_transcribing: self.resources.telemetry.is_transcribing(),
            transcript_segments_count: self.transcript.len(),
            emotion_samples_count: self.emotions.len(),
            latest_question: self.latest_question.as_ref().map(|q| q.question.clone()),
            started_at: self.started_at,
            duration_secs: self.duration_secs(),
        }
    }
}
