use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::SessionError;

/// Bearer token supplied by the external auth collaborator.
///
/// Only presence and (for JWTs) the `exp` claim are checked here; signature
/// validation belongs to the services that receive the token.
#[derive(Clone)]
pub struct BearerToken(String);

#[derive(Deserialize)]
struct Claims {
    exp: Option<i64>,
}

impl BearerToken {
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let token = raw.trim().trim_start_matches("Bearer ").trim();
        if token.is_empty() {
            return Err(SessionError::Unauthenticated("missing bearer token".to_string()));
        }

        let token = Self(token.to_string());
        token.check(Utc::now())?;
        Ok(token)
    }

    /// Fails if the token carries an `exp` claim earlier than `now`.
    pub fn check(&self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if let Some(exp) = self.expires_at() {
            if exp <= now {
                return Err(SessionError::Unauthenticated(format!(
                    "bearer token expired at {}",
                    exp.to_rfc3339()
                )));
            }
        }
        Ok(())
    }

    /// Expiry of a JWT-shaped token; `None` for opaque tokens.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let payload = self.0.split('.').nth(1)?;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        let claims: Claims = serde_json::from_slice(&bytes).ok()?;
        DateTime::from_timestamp(claims.exp?, 0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(***)")
    }
}
