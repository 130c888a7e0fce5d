use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::analyzer::AnalyzerProvider;
use super::emotion::EmotionSample;
use super::question::{fallback_question, SuggestedQuestion};
use super::recognizer::{RecognitionEvent, SpeechRecognizer};
use super::task::{TaskStatus, TelemetryTask, TelemetryTaskKind};
use crate::error::SessionError;
use crate::media::VideoSink;
use crate::peer::PeerConnectionState;
use crate::signaling::ParticipantRole;

/// How long `stop` waits for a task to wind down before aborting it
const STOP_GRACE: Duration = Duration::from_secs(3);
const STOP_TRACKING_TIMEOUT: Duration = Duration::from_secs(2);
/// Shortest period the interval tasks run at
pub const MIN_TICK: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub emotion_interval: Duration,
    pub question_interval: Duration,
    /// Pause before restarting recognition after no speech or an error
    pub restart_delay: Duration,
    pub jpeg_quality: u8,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            emotion_interval: Duration::from_secs(2),
            question_interval: Duration::from_secs(10),
            restart_delay: Duration::from_millis(300),
            jpeg_quality: 80,
        }
    }
}

/// Results the tasks hand to the session's dispatch loop
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    EmotionSampled(EmotionSample),
    TranscriptFinal {
        text: String,
        captured_at: DateTime<Utc>,
    },
    QuestionSuggested(SuggestedQuestion),
    /// Transcription ended for good; the session continues without it
    TranscriptionStopped(SessionError),
}

/// What the tasks may read from the session
#[derive(Clone)]
pub struct TelemetryContext {
    pub session_id: String,
    pub role: ParticipantRole,
    pub analyzer: Arc<dyn AnalyzerProvider>,
    /// `None` when the peer transport does not decode remote video
    pub remote_video: Option<Arc<dyn VideoSink>>,
    pub peer_state: watch::Receiver<PeerConnectionState>,
}

impl TelemetryContext {
    fn is_connected(&self) -> bool {
        *self.peer_state.borrow() == PeerConnectionState::Connected
    }
}

struct RunningTask {
    kind: TelemetryTaskKind,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs the session's telemetry tasks.
///
/// Each task has its own cancellation token, derived from one root token so
/// `stop` reaches all of them at once.
pub struct TelemetryScheduler {
    config: TelemetryConfig,
    root: Option<CancellationToken>,
    running: Vec<RunningTask>,
    statuses: Vec<watch::Receiver<TelemetryTask>>,
    transcribing: watch::Receiver<bool>,
    latest: watch::Receiver<Option<EmotionSample>>,
    started: bool,
}

impl TelemetryScheduler {
    pub fn new(config: TelemetryConfig) -> Self {
        let (_, transcribing) = watch::channel(false);
        let (_, latest) = watch::channel(None);
        Self {
            config,
            root: None,
            running: Vec::new(),
            statuses: Vec::new(),
            transcribing,
            latest,
            started: false,
        }
    }

    /// Start the tasks. Emotion sampling and question polling only run for the
    /// initiator, and only when there is decoded remote video to sample.
    /// Returns `None` if the scheduler was already started.
    pub fn start(
        &mut self,
        ctx: TelemetryContext,
        recognizer: Option<Box<dyn SpeechRecognizer>>,
    ) -> Option<mpsc::UnboundedReceiver<TelemetryEvent>> {
        if self.started {
            warn!("Telemetry scheduler already started");
            return None;
        }
        self.started = true;

        let root = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let observer = ctx.role == ParticipantRole::Initiator && ctx.remote_video.is_some();
        if ctx.role == ParticipantRole::Initiator && !observer {
            warn!("No decoded remote video, emotion sampling and question polling disabled");
        }
        for (kind, period) in [
            (TelemetryTaskKind::EmotionSample, self.config.emotion_interval),
            (TelemetryTaskKind::QuestionPoll, self.config.question_interval),
        ] {
            if observer && period < MIN_TICK {
                warn!("{:?} interval {:?} raised to {:?}", kind, period, MIN_TICK);
            }
        }

        let (latest_tx, latest_rx) = watch::channel(None);
        self.latest = latest_rx;

        // Emotion sampling
        let (status, rx) = TaskStatus::new(TelemetryTask::new(
            TelemetryTaskKind::EmotionSample,
            Some(self.config.emotion_interval),
            observer,
        ));
        self.statuses.push(rx);
        if observer {
            let cancel = root.child_token();
            let handle = tokio::spawn(run_emotion_sampling(
                ctx.clone(),
                self.config.emotion_interval,
                self.config.jpeg_quality,
                cancel.clone(),
                status,
                latest_tx,
                events_tx.clone(),
            ));
            self.running.push(RunningTask {
                kind: TelemetryTaskKind::EmotionSample,
                cancel,
                handle,
            });
        }

        // Transcript dispatch
        let (transcribing_tx, transcribing_rx) = watch::channel(false);
        self.transcribing = transcribing_rx;
        let (status, rx) = TaskStatus::new(TelemetryTask::new(
            TelemetryTaskKind::TranscriptDispatch,
            None,
            recognizer.is_some(),
        ));
        self.statuses.push(rx);
        match recognizer {
            Some(recognizer) => {
                let cancel = root.child_token();
                let handle = tokio::spawn(run_transcript_dispatch(
                    recognizer,
                    self.config.restart_delay,
                    cancel.clone(),
                    status,
                    transcribing_tx,
                    events_tx.clone(),
                ));
                self.running.push(RunningTask {
                    kind: TelemetryTaskKind::TranscriptDispatch,
                    cancel,
                    handle,
                });
            }
            None => info!("No speech recognizer, transcription disabled"),
        }

        // Question polling
        let (status, rx) = TaskStatus::new(TelemetryTask::new(
            TelemetryTaskKind::QuestionPoll,
            Some(self.config.question_interval),
            observer,
        ));
        self.statuses.push(rx);
        if observer {
            let cancel = root.child_token();
            let handle = tokio::spawn(run_question_poll(
                ctx,
                self.config.question_interval,
                self.latest.clone(),
                cancel.clone(),
                status,
                events_tx,
            ));
            self.running.push(RunningTask {
                kind: TelemetryTaskKind::QuestionPoll,
                cancel,
                handle,
            });
        }

        info!("Telemetry started with {} tasks", self.running.len());
        self.root = Some(root);
        Some(events_rx)
    }

    /// Cancel a single task; the others keep running.
    pub fn stop_task(&self, kind: TelemetryTaskKind) {
        for task in self.running.iter().filter(|t| t.kind == kind) {
            task.cancel.cancel();
        }
    }

    /// Cancel every task without waiting for them.
    pub fn cancel(&self) {
        if let Some(root) = &self.root {
            root.cancel();
        }
    }

    /// Cancel every task and wait, boundedly, for them to finish.
    pub async fn stop(&mut self) {
        let Some(root) = self.root.take() else {
            return;
        };
        root.cancel();

        for mut task in self.running.drain(..) {
            match tokio::time::timeout(STOP_GRACE, &mut task.handle).await {
                Ok(Ok(())) => debug!("{:?} task stopped", task.kind),
                Ok(Err(e)) => warn!("{:?} task ended abnormally: {}", task.kind, e),
                Err(_) => {
                    warn!("{:?} task did not stop in time, aborting", task.kind);
                    task.handle.abort();
                }
            }
        }
        info!("Telemetry stopped");
    }

    /// Whether any task is still running.
    pub fn is_active(&self) -> bool {
        self.root.is_some() && self.statuses.iter().any(|s| s.borrow().active)
    }

    pub fn active_tasks(&self) -> Vec<TelemetryTaskKind> {
        if self.root.is_none() {
            return Vec::new();
        }
        self.statuses
            .iter()
            .filter(|s| s.borrow().active)
            .map(|s| s.borrow().kind)
            .collect()
    }

    pub fn tasks(&self) -> Vec<TelemetryTask> {
        self.statuses.iter().map(|s| s.borrow().clone()).collect()
    }

    pub fn is_transcribing(&self) -> bool {
        *self.transcribing.borrow()
    }

    pub fn latest_sample(&self) -> Option<EmotionSample> {
        self.latest.borrow().clone()
    }
}

impl Drop for TelemetryScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(period.max(MIN_TICK));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn run_emotion_sampling(
    ctx: TelemetryContext,
    period: Duration,
    jpeg_quality: u8,
    cancel: CancellationToken,
    status: TaskStatus,
    latest: watch::Sender<Option<EmotionSample>>,
    events: mpsc::UnboundedSender<TelemetryEvent>,
) {
    status.set_active(true);
    info!("Emotion sampling every {}ms via {}", period.as_millis(), ctx.analyzer.name());

    tokio::select! {
        _ = cancel.cancelled() => {}
        result = ctx.analyzer.start_tracking(&ctx.session_id) => {
            if let Err(e) = result {
                warn!("Failed to start emotion tracking: {}", e);
            }
        }
    }

    let mut ticker = ticker(period);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !ctx.is_connected() {
            continue;
        }

        status.mark_run();
        match sample_once(&ctx, jpeg_quality, &cancel).await {
            Ok(Some(sample)) => {
                if cancel.is_cancelled() {
                    debug!("Discarding emotion sample that completed after cancellation");
                    break;
                }
                debug!(
                    "Emotion sample: {} ({:.2}), stress {:.2}",
                    sample.dominant_label, sample.confidence, sample.composite_scores.stress
                );
                latest.send_replace(Some(sample.clone()));
                let _ = events.send(TelemetryEvent::EmotionSampled(sample));
            }
            Ok(None) => {}
            Err(e) => debug!("Emotion tick skipped: {}", e),
        }
    }

    status.set_active(false);
    match tokio::time::timeout(STOP_TRACKING_TIMEOUT, ctx.analyzer.stop_tracking(&ctx.session_id)).await {
        Ok(Err(e)) => debug!("Failed to stop emotion tracking: {}", e),
        Err(_) => debug!("Stopping emotion tracking timed out"),
        Ok(Ok(())) => {}
    }
    debug!("Emotion sampling task terminated");
}

/// One capture → analyze round. `Ok(None)` when there was nothing to analyze.
async fn sample_once(
    ctx: &TelemetryContext,
    jpeg_quality: u8,
    cancel: &CancellationToken,
) -> Result<Option<EmotionSample>, SessionError> {
    let Some(video) = &ctx.remote_video else {
        return Ok(None);
    };
    let Some(frame) = video.snapshot().filter(|f| f.is_decodable()) else {
        return Ok(None);
    };
    let jpeg = frame.to_jpeg_base64(jpeg_quality)?;

    tokio::select! {
        _ = cancel.cancelled() => Ok(None),
        result = ctx.analyzer.analyze_frame(&ctx.session_id, jpeg, frame.captured_at) => {
            result.map_err(|e| SessionError::CaptureTaskTransientFailure(e.to_string()))
        }
    }
}

async fn run_question_poll(
    ctx: TelemetryContext,
    period: Duration,
    latest: watch::Receiver<Option<EmotionSample>>,
    cancel: CancellationToken,
    status: TaskStatus,
    events: mpsc::UnboundedSender<TelemetryEvent>,
) {
    status.set_active(true);
    let mut ticker = ticker(period);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !ctx.is_connected() {
            continue;
        }
        let Some(sample) = latest.borrow().clone() else {
            continue;
        };

        status.mark_run();
        let remote = tokio::select! {
            _ = cancel.cancelled() => break,
            result = ctx.analyzer.suggested_question(&ctx.session_id, &sample) => result,
        };
        let question = match remote {
            Ok(Some(question)) => question,
            Ok(None) => fallback_question(&sample),
            Err(e) => {
                debug!("Suggested question unavailable ({}), using rule table", e);
                fallback_question(&sample)
            }
        };

        debug!("Suggested question ({}): {}", question.method, question.question);
        let _ = events.send(TelemetryEvent::QuestionSuggested(question));
    }

    status.set_active(false);
    debug!("Question poll task terminated");
}

enum Restart {
    Cancelled,
    Now,
    /// Recovered failure; start again after the delay
    After(Duration, SessionError),
    Never(SessionError),
}

async fn run_transcript_dispatch(
    mut recognizer: Box<dyn SpeechRecognizer>,
    restart_delay: Duration,
    cancel: CancellationToken,
    status: TaskStatus,
    transcribing: watch::Sender<bool>,
    events: mpsc::UnboundedSender<TelemetryEvent>,
) {
    status.set_active(true);
    info!("Transcription started via {}", recognizer.name());

    loop {
        let started = tokio::select! {
            _ = cancel.cancelled() => break,
            started = recognizer.start() => started,
        };

        let restart = match started {
            Ok(mut run) => {
                transcribing.send_replace(true);
                loop {
                    let event = tokio::select! {
                        _ = cancel.cancelled() => break Restart::Cancelled,
                        event = run.recv() => event,
                    };
                    match event {
                        Some(RecognitionEvent::FinalResult { text, captured_at }) => {
                            status.mark_run();
                            let _ = events.send(TelemetryEvent::TranscriptFinal { text, captured_at });
                        }
                        Some(RecognitionEvent::Interim(text)) => debug!("Interim transcript: {}", text),
                        Some(RecognitionEvent::NoSpeech) => {
                            break Restart::After(restart_delay, SessionError::RecognitionNoSpeech);
                        }
                        Some(RecognitionEvent::PermissionDenied) => {
                            break Restart::Never(SessionError::RecognitionPermissionDenied);
                        }
                        Some(RecognitionEvent::Error(e)) => {
                            break Restart::After(
                                restart_delay,
                                SessionError::CaptureTaskTransientFailure(e),
                            );
                        }
                        Some(RecognitionEvent::End) | None => break Restart::Now,
                    }
                }
            }
            Err(SessionError::RecognitionPermissionDenied) => {
                Restart::Never(SessionError::RecognitionPermissionDenied)
            }
            Err(e) => Restart::After(restart_delay, e),
        };

        match restart {
            Restart::Cancelled => break,
            Restart::Now if cancel.is_cancelled() => break,
            Restart::Now => {}
            Restart::After(delay, reason) => {
                match reason {
                    SessionError::RecognitionNoSpeech => debug!("{}, restarting recognition", reason),
                    other => warn!("Recognition failed ({}), restarting in {:?}", other, delay),
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Restart::Never(e) => {
                warn!("Transcription stopped: {}", e);
                transcribing.send_replace(false);
                let _ = events.send(TelemetryEvent::TranscriptionStopped(e));
                break;
            }
        }
    }

    transcribing.send_replace(false);
    recognizer.stop().await;
    status.set_active(false);
    debug!("Transcript dispatch task terminated");
}
