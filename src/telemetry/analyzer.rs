use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::emotion::{CompositeScores, EmotionSample};
use super::question::SuggestedQuestion;
use crate::auth::BearerToken;
use crate::config::{AnalyzerConfig, AnalyzerProviderKind};
use crate::error::SessionError;

/// Aggregate the analyzer keeps for a whole session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionSummary {
    pub total_frames_analyzed: u64,
    pub predominant_emotion: String,
    pub avg_stress_score: f64,
    pub avg_anxiety_score: f64,
    pub avg_engagement_score: f64,
    pub emotion_distribution: BTreeMap<String, f64>,
}

/// Remote emotion analysis service.
///
/// Implementations:
/// - `HttpAnalyzer`: REST endpoints of the analysis service
/// - `MockAnalyzer`: canned results, no network
#[async_trait::async_trait]
pub trait AnalyzerProvider: Send + Sync {
    async fn start_tracking(&self, session_id: &str) -> Result<(), SessionError>;

    /// `None` when the analyzer found no face in the frame.
    async fn analyze_frame(
        &self,
        session_id: &str,
        jpeg_base64: String,
        captured_at: DateTime<Utc>,
    ) -> Result<Option<EmotionSample>, SessionError>;

    async fn suggested_question(
        &self,
        session_id: &str,
        latest: &EmotionSample,
    ) -> Result<Option<SuggestedQuestion>, SessionError>;

    async fn emotion_summary(&self, session_id: &str) -> Result<Option<EmotionSummary>, SessionError>;

    async fn stop_tracking(&self, session_id: &str) -> Result<(), SessionError>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Resolve the configured provider.
pub fn analyzer_from_config(
    config: &AnalyzerConfig,
    token: &BearerToken,
) -> Result<Arc<dyn AnalyzerProvider>, SessionError> {
    match config.provider {
        AnalyzerProviderKind::Http => Ok(Arc::new(HttpAnalyzer::new(
            &config.base_url,
            token.clone(),
            Duration::from_millis(config.request_timeout_ms),
        )?)),
        AnalyzerProviderKind::Mock => Ok(Arc::new(MockAnalyzer::new())),
    }
}

// ============================================================================
// HTTP provider
// ============================================================================

#[derive(Debug, Serialize)]
struct AnalyzeFrameRequest {
    frame: String,
    timestamp: f64,
}

#[derive(Debug, Deserialize)]
struct AnalyzeFrameResponse {
    #[serde(default)]
    success: bool,
    result: Option<FrameResult>,
}

#[derive(Debug, Deserialize)]
struct FrameResult {
    #[serde(default)]
    face_detected: bool,
    emotion_analysis: Option<EmotionAnalysis>,
    composite_scores: Option<WireScores>,
}

#[derive(Debug, Deserialize)]
struct EmotionAnalysis {
    dominant_emotion: String,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct WireScores {
    #[serde(default)]
    stress_score: f64,
    #[serde(default)]
    anxiety_score: f64,
    #[serde(default = "default_engagement")]
    engagement_score: f64,
}

fn default_engagement() -> f64 {
    0.5
}

#[derive(Debug, Deserialize)]
struct QuestionResponse {
    #[serde(default)]
    success: bool,
    question: Option<String>,
    #[serde(default)]
    trigger: String,
    #[serde(default)]
    confidence: f64,
    method: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    summary: Option<EmotionSummary>,
}

pub struct HttpAnalyzer {
    client: reqwest::Client,
    base_url: String,
    token: BearerToken,
}

impl HttpAnalyzer {
    pub fn new(
        base_url: impl Into<String>,
        token: BearerToken,
        timeout: Duration,
    ) -> Result<Self, SessionError> {
        let base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(SessionError::Analyzer(format!(
                "analyzer base_url must start with http:// or https://, got: {}",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Analyzer(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, session_id: &str, route: &str) -> String {
        format!("{}/session/{}/{}", self.base_url, session_id, route)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SessionError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SessionError::Analyzer(format!(
            "HTTP {} {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown"),
            body
        )))
    }
}

#[async_trait::async_trait]
impl AnalyzerProvider for HttpAnalyzer {
    async fn start_tracking(&self, session_id: &str) -> Result<(), SessionError> {
        let response = self
            .client
            .post(self.url(session_id, "start-emotion-tracking"))
            .header("authorization", self.token.header_value())
            .send()
            .await?;
        Self::check(response).await?;
        info!("Emotion tracking started for session {}", session_id);
        Ok(())
    }

    async fn analyze_frame(
        &self,
        session_id: &str,
        jpeg_base64: String,
        captured_at: DateTime<Utc>,
    ) -> Result<Option<EmotionSample>, SessionError> {
        let request = AnalyzeFrameRequest {
            frame: jpeg_base64,
            timestamp: captured_at.timestamp_millis() as f64 / 1000.0,
        };
        let response = self
            .client
            .post(self.url(session_id, "analyze-frame"))
            .header("authorization", self.token.header_value())
            .json(&request)
            .send()
            .await?;
        let body: AnalyzeFrameResponse = Self::check(response).await?.json().await?;

        let Some(result) = body.result.filter(|r| body.success && r.face_detected) else {
            debug!("No face in analyzed frame");
            return Ok(None);
        };
        let Some(analysis) = result.emotion_analysis else {
            return Ok(None);
        };
        let scores = result
            .composite_scores
            .map(|s| CompositeScores {
                stress: s.stress_score,
                anxiety: s.anxiety_score,
                engagement: s.engagement_score,
            })
            .unwrap_or_default();

        Ok(Some(EmotionSample {
            dominant_label: analysis.dominant_emotion,
            confidence: analysis.confidence,
            composite_scores: scores,
            captured_at,
        }))
    }

    async fn suggested_question(
        &self,
        session_id: &str,
        latest: &EmotionSample,
    ) -> Result<Option<SuggestedQuestion>, SessionError> {
        let scores = latest.composite_scores;
        let response = self
            .client
            .get(self.url(session_id, "suggested-question"))
            .header("authorization", self.token.header_value())
            .query(&[
                ("emotion", latest.dominant_label.clone()),
                ("stress_score", scores.stress.to_string()),
                ("anxiety_score", scores.anxiety.to_string()),
                ("engagement_score", scores.engagement.to_string()),
            ])
            .send()
            .await?;
        let body: QuestionResponse = Self::check(response).await?.json().await?;

        Ok(body
            .question
            .filter(|q| body.success && !q.trim().is_empty())
            .map(|question| SuggestedQuestion {
                question,
                trigger: body.trigger,
                confidence: body.confidence,
                method: body.method.unwrap_or_else(|| "analyzer".to_string()),
            }))
    }

    async fn emotion_summary(&self, session_id: &str) -> Result<Option<EmotionSummary>, SessionError> {
        let response = self
            .client
            .get(self.url(session_id, "emotion-summary"))
            .header("authorization", self.token.header_value())
            .send()
            .await?;
        let body: SummaryResponse = Self::check(response).await?.json().await?;
        Ok(body.summary)
    }

    async fn stop_tracking(&self, session_id: &str) -> Result<(), SessionError> {
        let response = self
            .client
            .post(self.url(session_id, "stop-emotion-tracking"))
            .header("authorization", self.token.header_value())
            .send()
            .await?;
        Self::check(response).await?;
        info!("Emotion tracking stopped for session {}", session_id);
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ============================================================================
// Mock provider
// ============================================================================

const MOCK_READINGS: &[(&str, f64, f64, f64)] = &[
    ("neutral", 0.30, 0.25, 0.60),
    ("happy", 0.15, 0.10, 0.80),
    ("sad", 0.55, 0.40, 0.35),
    ("neutral", 0.75, 0.50, 0.45),
    ("fear", 0.60, 0.70, 0.40),
];

/// Cycles through a fixed set of readings. Has no questions of its own, so the
/// scheduler's rule table supplies them.
#[derive(Debug, Default)]
pub struct MockAnalyzer {
    frames: AtomicUsize,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_analyzed(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AnalyzerProvider for MockAnalyzer {
    async fn start_tracking(&self, _session_id: &str) -> Result<(), SessionError> {
        Ok(())
    }

    async fn analyze_frame(
        &self,
        _session_id: &str,
        _jpeg_base64: String,
        captured_at: DateTime<Utc>,
    ) -> Result<Option<EmotionSample>, SessionError> {
        let n = self.frames.fetch_add(1, Ordering::SeqCst);
        let (label, stress, anxiety, engagement) = MOCK_READINGS[n % MOCK_READINGS.len()];
        Ok(Some(EmotionSample {
            dominant_label: label.to_string(),
            confidence: 0.8,
            composite_scores: CompositeScores {
                stress,
                anxiety,
                engagement,
            },
            captured_at,
        }))
    }

    async fn suggested_question(
        &self,
        _session_id: &str,
        _latest: &EmotionSample,
    ) -> Result<Option<SuggestedQuestion>, SessionError> {
        Ok(None)
    }

    async fn emotion_summary(&self, _session_id: &str) -> Result<Option<EmotionSummary>, SessionError> {
        let total = self.frames_analyzed();
        if total == 0 {
            return Ok(None);
        }

        let mut summary = EmotionSummary {
            total_frames_analyzed: total as u64,
            ..Default::default()
        };
        for i in 0..total {
            let (label, stress, anxiety, engagement) = MOCK_READINGS[i % MOCK_READINGS.len()];
            *summary
                .emotion_distribution
                .entry(label.to_string())
                .or_insert(0.0) += 1.0;
            summary.avg_stress_score += stress / total as f64;
            summary.avg_anxiety_score += anxiety / total as f64;
            summary.avg_engagement_score += engagement / total as f64;
        }
        summary.predominant_emotion = summary
            .emotion_distribution
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(label, _)| label.clone())
            .unwrap_or_default();
        Ok(Some(summary))
    }

    async fn stop_tracking(&self, _session_id: &str) -> Result<(), SessionError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
