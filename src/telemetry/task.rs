use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryTaskKind {
    EmotionSample,
    TranscriptDispatch,
    QuestionPoll,
}

impl TelemetryTaskKind {
    /// Only the observing participant analyzes the other's video.
    pub fn initiator_only(self) -> bool {
        matches!(self, TelemetryTaskKind::EmotionSample | TelemetryTaskKind::QuestionPoll)
    }
}

/// Descriptor of one telemetry task, published by the task itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryTask {
    pub kind: TelemetryTaskKind,
    /// `None` for event-triggered tasks
    #[serde(skip)]
    pub interval: Option<Duration>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    /// Running and not yet cancelled
    pub active: bool,
}

impl TelemetryTask {
    pub fn new(kind: TelemetryTaskKind, interval: Option<Duration>, enabled: bool) -> Self {
        Self {
            kind,
            interval,
            last_run_at: None,
            enabled,
            active: false,
        }
    }
}

/// Write side of a task descriptor. Only the owning task holds one.
pub(crate) struct TaskStatus {
    tx: watch::Sender<TelemetryTask>,
}

impl TaskStatus {
    pub(crate) fn new(task: TelemetryTask) -> (Self, watch::Receiver<TelemetryTask>) {
        let (tx, rx) = watch::channel(task);
        (Self { tx }, rx)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.tx.send_modify(|t| t.active = active);
    }

    pub(crate) fn mark_run(&self) {
        self.tx.send_modify(|t| t.last_run_at = Some(Utc::now()));
    }
}

/// A task that ends any way, unwinding included, is no longer active.
impl Drop for TaskStatus {
    fn drop(&mut self) {
        self.tx.send_if_modified(|t| std::mem::replace(&mut t.active, false));
    }
}
