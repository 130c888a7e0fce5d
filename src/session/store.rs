use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use super::transcript::FinalizedSegment;
use crate::auth::BearerToken;
use crate::error::SessionError;

/// Body of the end-of-session call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndSessionRequest {
    pub transcription_data: Vec<FinalizedSegment>,
    pub language: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndSessionResponse {
    #[serde(default)]
    pub note_auto_generated: bool,
    #[serde(default)]
    pub note_id: Option<String>,
}

/// Persistence collaborator that receives the finalized transcript.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn end_session(
        &self,
        session_id: &str,
        request: &EndSessionRequest,
    ) -> Result<EndSessionResponse, SessionError>;
}

/// `POST {base_url}/sessions/{id}/end` on the persistence service
pub struct HttpSessionStore {
    client: reqwest::Client,
    base_url: String,
    token: BearerToken,
}

impl HttpSessionStore {
    pub fn new(
        base_url: impl Into<String>,
        token: BearerToken,
        timeout: Duration,
    ) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Persistence(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait::async_trait]
impl SessionStore for HttpSessionStore {
    async fn end_session(
        &self,
        session_id: &str,
        request: &EndSessionRequest,
    ) -> Result<EndSessionResponse, SessionError> {
        let url = format!("{}/sessions/{}/end", self.base_url, session_id);
        info!(
            "Finalizing session {} with {} transcript segments",
            session_id,
            request.transcription_data.len()
        );

        let response = self
            .client
            .post(&url)
            .header("authorization", self.token.header_value())
            .json(request)
            .send()
            .await
            .map_err(|e| SessionError::Persistence(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Persistence(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        response
            .json::<EndSessionResponse>()
            .await
            .map_err(|e| SessionError::Persistence(format!("invalid response: {}", e)))
    }
}
