pub mod analyzer;
pub mod emotion;
pub mod nats;
pub mod question;
pub mod recognizer;
pub mod scheduler;
pub mod task;

pub use analyzer::{analyzer_from_config, AnalyzerProvider, EmotionSummary, HttpAnalyzer, MockAnalyzer};
pub use emotion::{CompositeScores, EmotionSample, EmotionWindow};
pub use nats::NatsRecognizer;
pub use question::{fallback_question, SuggestedQuestion};
pub use recognizer::{RecognitionEvent, SpeechRecognizer};
pub use scheduler::{TelemetryConfig, TelemetryContext, TelemetryEvent, TelemetryScheduler};
pub use task::{TelemetryTask, TelemetryTaskKind};
