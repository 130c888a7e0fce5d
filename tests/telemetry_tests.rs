// Integration tests for the telemetry scheduler: cadence, fallbacks,
// recognition restarts and cancellation.

mod common;

use common::{final_result, gray_frame, sample, wait_for, RecordingAnalyzer, ScriptedRecognizer};
use session_rtc::error::SessionError;
use session_rtc::media::{FrameSlot, VideoSink};
use session_rtc::peer::PeerConnectionState;
use session_rtc::signaling::ParticipantRole;
use session_rtc::telemetry::{
    RecognitionEvent, SpeechRecognizer, TelemetryConfig, TelemetryContext, TelemetryEvent,
    TelemetryScheduler, TelemetryTaskKind,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio::time::timeout;

fn config() -> TelemetryConfig {
    TelemetryConfig {
        emotion_interval: Duration::from_millis(100),
        question_interval: Duration::from_millis(250),
        restart_delay: Duration::from_millis(300),
        jpeg_quality: 80,
    }
}

struct Fixture {
    ctx: TelemetryContext,
    peer_state: watch::Sender<PeerConnectionState>,
    frames: Arc<FrameSlot>,
}

fn fixture(role: ParticipantRole, analyzer: Arc<RecordingAnalyzer>) -> Fixture {
    let frames = Arc::new(FrameSlot::new());
    frames.publish(gray_frame());
    let (peer_state, rx) = watch::channel(PeerConnectionState::Connected);
    Fixture {
        ctx: TelemetryContext {
            session_id: "s1".to_string(),
            role,
            analyzer,
            remote_video: Some(frames.clone() as Arc<dyn VideoSink>),
            peer_state: rx,
        },
        peer_state,
        frames,
    }
}

async fn next_matching(
    events: &mut UnboundedReceiver<TelemetryEvent>,
    mut pred: impl FnMut(&TelemetryEvent) -> bool,
) -> TelemetryEvent {
    loop {
        let event = timeout(Duration::from_secs(30), events.recv())
            .await
            .expect("timed out waiting for telemetry")
            .expect("telemetry channel closed");
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_initiator_runs_all_three_tasks() {
    let analyzer = Arc::new(RecordingAnalyzer::new(sample("neutral", 0.2, 0.1, 0.7)));
    let f = fixture(ParticipantRole::Initiator, analyzer.clone());
    let recognizer: Box<dyn SpeechRecognizer> = Box::new(ScriptedRecognizer::new(Vec::new()));

    let mut scheduler = TelemetryScheduler::new(config());
    let _events = scheduler.start(f.ctx, Some(recognizer)).unwrap();

    assert!(wait_for(Duration::from_secs(1), || scheduler.active_tasks().len() == 3).await);
    assert!(scheduler.is_active());
    assert_eq!(analyzer.starts.load(Ordering::SeqCst), 1);

    scheduler.stop().await;
    assert!(!scheduler.is_active());
    assert!(scheduler.active_tasks().is_empty());
    assert_eq!(analyzer.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_responder_only_transcribes() {
    let analyzer = Arc::new(RecordingAnalyzer::new(sample("neutral", 0.2, 0.1, 0.7)));
    let f = fixture(ParticipantRole::Responder, analyzer.clone());
    let recognizer: Box<dyn SpeechRecognizer> = Box::new(ScriptedRecognizer::new(Vec::new()));

    let mut scheduler = TelemetryScheduler::new(config());
    let _events = scheduler.start(f.ctx, Some(recognizer)).unwrap();

    assert!(
        wait_for(Duration::from_secs(1), || scheduler.active_tasks()
            == vec![TelemetryTaskKind::TranscriptDispatch])
        .await
    );
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(analyzer.analyze_calls.load(Ordering::SeqCst), 0);

    let emotion = scheduler
        .tasks()
        .into_iter()
        .find(|t| t.kind == TelemetryTaskKind::EmotionSample)
        .unwrap();
    assert!(!emotion.enabled);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_initiator_without_remote_video_skips_sampling() {
    let analyzer = Arc::new(RecordingAnalyzer::new(sample("neutral", 0.2, 0.1, 0.7)));
    let mut f = fixture(ParticipantRole::Initiator, analyzer.clone());
    f.ctx.remote_video = None;
    let recognizer: Box<dyn SpeechRecognizer> = Box::new(ScriptedRecognizer::new(Vec::new()));

    let mut scheduler = TelemetryScheduler::new(config());
    let _events = scheduler.start(f.ctx, Some(recognizer)).unwrap();

    assert!(
        wait_for(Duration::from_secs(1), || scheduler.active_tasks()
            == vec![TelemetryTaskKind::TranscriptDispatch])
        .await
    );
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(analyzer.analyze_calls.load(Ordering::SeqCst), 0);
    assert_eq!(analyzer.question_calls.load(Ordering::SeqCst), 0);
    assert!(scheduler
        .tasks()
        .iter()
        .filter(|t| t.kind.initiator_only())
        .all(|t| !t.enabled));

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_zero_interval_is_floored() {
    let analyzer = Arc::new(RecordingAnalyzer::new(sample("neutral", 0.2, 0.1, 0.7)));
    let f = fixture(ParticipantRole::Initiator, analyzer);
    let mut cfg = config();
    cfg.emotion_interval = Duration::ZERO;
    cfg.question_interval = Duration::ZERO;

    let mut scheduler = TelemetryScheduler::new(cfg);
    let mut events = scheduler.start(f.ctx, None).unwrap();

    next_matching(&mut events, |e| matches!(e, TelemetryEvent::EmotionSampled(_))).await;
    assert!(scheduler.active_tasks().contains(&TelemetryTaskKind::EmotionSample));
    let sampler = scheduler
        .tasks()
        .into_iter()
        .find(|t| t.kind == TelemetryTaskKind::EmotionSample)
        .unwrap();
    assert!(sampler.last_run_at.is_some());

    scheduler.stop().await;
    assert!(scheduler.active_tasks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_second_start_is_rejected() {
    let analyzer = Arc::new(RecordingAnalyzer::new(sample("neutral", 0.2, 0.1, 0.7)));
    let f = fixture(ParticipantRole::Initiator, analyzer);

    let mut scheduler = TelemetryScheduler::new(config());
    assert!(scheduler.start(f.ctx.clone(), None).is_some());
    assert!(scheduler.start(f.ctx, None).is_none());
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_samples_published_and_question_falls_back_when_analyzer_fails() {
    let mut analyzer = RecordingAnalyzer::new(sample("neutral", 0.8, 0.2, 0.6));
    analyzer.fail_questions = true;
    let analyzer = Arc::new(analyzer);
    let f = fixture(ParticipantRole::Initiator, analyzer.clone());

    let mut scheduler = TelemetryScheduler::new(config());
    let mut events = scheduler.start(f.ctx, None).unwrap();

    let sampled = next_matching(&mut events, |e| matches!(e, TelemetryEvent::EmotionSampled(_))).await;
    match sampled {
        TelemetryEvent::EmotionSampled(s) => assert_eq!(s.composite_scores.stress, 0.8),
        _ => unreachable!(),
    }
    assert_eq!(scheduler.latest_sample().unwrap().dominant_label, "neutral");

    let question = next_matching(&mut events, |e| matches!(e, TelemetryEvent::QuestionSuggested(_))).await;
    match question {
        TelemetryEvent::QuestionSuggested(q) => {
            assert!(q.question.starts_with("I notice you seem quite tense"));
            assert_eq!(q.method, "rule-based");
            assert_eq!(q.trigger, "neutral emotion");
        }
        _ => unreachable!(),
    }
    assert!(analyzer.question_calls.load(Ordering::SeqCst) >= 1);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_analyzer_question_preferred_over_rule_table() {
    let analyzer = Arc::new(RecordingAnalyzer::new(sample("sad", 0.3, 0.2, 0.6)));
    let f = fixture(ParticipantRole::Initiator, analyzer);

    let mut scheduler = TelemetryScheduler::new(config());
    let mut events = scheduler.start(f.ctx, None).unwrap();

    match next_matching(&mut events, |e| matches!(e, TelemetryEvent::QuestionSuggested(_))).await {
        TelemetryEvent::QuestionSuggested(q) => assert_eq!(q.method, "analyzer"),
        _ => unreachable!(),
    }
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_ticks_skipped_until_connected() {
    let analyzer = Arc::new(RecordingAnalyzer::new(sample("neutral", 0.2, 0.1, 0.7)));
    let f = fixture(ParticipantRole::Initiator, analyzer.clone());
    f.peer_state.send_replace(PeerConnectionState::Negotiating);

    let mut scheduler = TelemetryScheduler::new(config());
    let mut events = scheduler.start(f.ctx, None).unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(analyzer.analyze_calls.load(Ordering::SeqCst), 0);

    f.peer_state.send_replace(PeerConnectionState::Connected);
    next_matching(&mut events, |e| matches!(e, TelemetryEvent::EmotionSampled(_))).await;

    // Degraded pauses sampling again
    f.peer_state.send_replace(PeerConnectionState::Degraded);
    tokio::time::sleep(Duration::from_millis(150)).await;
    let calls = analyzer.analyze_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(analyzer.analyze_calls.load(Ordering::SeqCst), calls);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_decodable_frame_skips_tick() {
    let analyzer = Arc::new(RecordingAnalyzer::new(sample("neutral", 0.2, 0.1, 0.7)));
    let f = fixture(ParticipantRole::Initiator, analyzer.clone());
    f.frames.clear();

    let mut scheduler = TelemetryScheduler::new(config());
    let _events = scheduler.start(f.ctx, None).unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(analyzer.analyze_calls.load(Ordering::SeqCst), 0);
    assert!(scheduler.latest_sample().is_none());

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_result_arriving_after_stop_is_discarded() {
    let mut analyzer = RecordingAnalyzer::new(sample("neutral", 0.2, 0.1, 0.7));
    analyzer.analyze_delay = Some(Duration::from_secs(10));
    let analyzer = Arc::new(analyzer);
    let f = fixture(ParticipantRole::Initiator, analyzer.clone());

    let mut scheduler = TelemetryScheduler::new(config());
    let mut events = scheduler.start(f.ctx, None).unwrap();

    assert!(wait_for(Duration::from_secs(1), || analyzer.analyze_calls.load(Ordering::SeqCst) == 1).await);
    scheduler.stop().await;

    tokio::time::sleep(Duration::from_secs(20)).await;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, TelemetryEvent::EmotionSampled(_)));
    }
    assert!(scheduler.latest_sample().is_none());
    assert_eq!(analyzer.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_single_task_leaves_others_running() {
    let analyzer = Arc::new(RecordingAnalyzer::new(sample("neutral", 0.2, 0.1, 0.7)));
    let f = fixture(ParticipantRole::Initiator, analyzer);

    let mut scheduler = TelemetryScheduler::new(config());
    let _events = scheduler.start(f.ctx, None).unwrap();
    assert!(wait_for(Duration::from_secs(1), || scheduler.active_tasks().len() == 2).await);

    scheduler.stop_task(TelemetryTaskKind::QuestionPoll);

    assert!(
        wait_for(Duration::from_secs(1), || scheduler.active_tasks()
            == vec![TelemetryTaskKind::EmotionSample])
        .await
    );
    scheduler.stop().await;
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_speech_restarts_and_keeps_transcribing() {
    let analyzer = Arc::new(RecordingAnalyzer::new(sample("neutral", 0.2, 0.1, 0.7)));
    let f = fixture(ParticipantRole::Responder, analyzer);
    let at = chrono::Utc::now();
    let recognizer = ScriptedRecognizer::new(vec![
        vec![RecognitionEvent::NoSpeech],
        vec![
            RecognitionEvent::Interim("hel".to_string()),
            final_result("hello there", at),
        ],
    ]);
    let starts = recognizer.starts.clone();
    let stops = recognizer.stops.clone();

    let mut scheduler = TelemetryScheduler::new(config());
    let mut events = scheduler.start(f.ctx, Some(Box::new(recognizer))).unwrap();

    match next_matching(&mut events, |e| matches!(e, TelemetryEvent::TranscriptFinal { .. })).await {
        TelemetryEvent::TranscriptFinal { text, captured_at } => {
            assert_eq!(text, "hello there");
            assert_eq!(captured_at, at);
        }
        _ => unreachable!(),
    }
    assert_eq!(starts.load(Ordering::SeqCst), 2);
    assert!(scheduler.is_transcribing());

    scheduler.stop().await;
    assert!(!scheduler.is_transcribing());
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_recognition_error_restarts_after_delay() {
    let analyzer = Arc::new(RecordingAnalyzer::new(sample("neutral", 0.2, 0.1, 0.7)));
    let f = fixture(ParticipantRole::Responder, analyzer);
    let recognizer = ScriptedRecognizer::new(vec![
        vec![RecognitionEvent::Error("network".to_string())],
        vec![RecognitionEvent::End],
        vec![final_result("back again", chrono::Utc::now())],
    ]);
    let starts = recognizer.starts.clone();

    let mut scheduler = TelemetryScheduler::new(config());
    let started = tokio::time::Instant::now();
    let mut events = scheduler.start(f.ctx, Some(Box::new(recognizer))).unwrap();

    next_matching(&mut events, |e| matches!(e, TelemetryEvent::TranscriptFinal { .. })).await;

    assert_eq!(starts.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() >= Duration::from_millis(300));
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_stops_transcription_only() {
    let analyzer = Arc::new(RecordingAnalyzer::new(sample("neutral", 0.2, 0.1, 0.7)));
    let f = fixture(ParticipantRole::Initiator, analyzer);
    let recognizer = ScriptedRecognizer::failing(SessionError::RecognitionPermissionDenied);
    let starts = recognizer.starts.clone();

    let mut scheduler = TelemetryScheduler::new(config());
    let mut events = scheduler.start(f.ctx, Some(Box::new(recognizer))).unwrap();

    match next_matching(&mut events, |e| matches!(e, TelemetryEvent::TranscriptionStopped(_))).await {
        TelemetryEvent::TranscriptionStopped(e) => assert_eq!(e, SessionError::RecognitionPermissionDenied),
        _ => unreachable!(),
    }
    assert!(!scheduler.is_transcribing());
    assert_eq!(starts.load(Ordering::SeqCst), 1);

    // Sampling carries on
    next_matching(&mut events, |e| matches!(e, TelemetryEvent::EmotionSampled(_))).await;
    assert!(
        wait_for(Duration::from_secs(1), || !scheduler
            .active_tasks()
            .contains(&TelemetryTaskKind::TranscriptDispatch))
        .await
    );
    assert!(scheduler.active_tasks().contains(&TelemetryTaskKind::EmotionSample));

    scheduler.stop().await;
}
