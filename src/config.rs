use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub relay: RelayConfig,
    pub signaling: SignalingConfig,
    pub api: ApiConfig,
    pub analyzer: AnalyzerConfig,
    pub media: MediaConfig,
    pub peer: PeerConfig,
    pub transcription: TranscriptionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

/// Where the relay server listens
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind: String,
    pub port: u16,
}

/// Where session participants reach the relay
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub url: String,
}

/// Persistence service (sessions/notes CRUD)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerProviderKind {
    Http,
    Mock,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// `http` talks to the emotion service, `mock` returns canned results
    pub provider: AnalyzerProviderKind,
    pub base_url: String,
    pub emotion_interval_ms: u64,
    pub question_interval_ms: u64,
    /// Trailing window length for emotion trend display
    pub window_size: usize,
    pub request_timeout_ms: u64,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub acquire_timeout_ms: u64,
    /// WAV file standing in for the microphone on headless hosts
    pub wav_source: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub ice_servers: Vec<String>,
    pub negotiation_timeout_ms: u64,
    /// Gather loopback ICE candidates, for single-host setups
    pub include_loopback: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub nats_url: String,
    pub restart_delay_ms: u64,
    pub no_speech_timeout_ms: u64,
    pub language: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "session-rtc".to_string(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 5001,
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:5001/ws".to_string(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            provider: AnalyzerProviderKind::Http,
            base_url: "http://localhost:5000/api/emotion".to_string(),
            emotion_interval_ms: 2_000,
            question_interval_ms: 10_000,
            window_size: 60,
            request_timeout_ms: 5_000,
            jpeg_quality: 80,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 10_000,
            wav_source: None,
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            negotiation_timeout_ms: 30_000,
            include_loopback: false,
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            restart_delay_ms: 300,
            no_speech_timeout_ms: 8_000,
            language: "en".to_string(),
        }
    }
}

impl Config {
    /// Load `path` (any format the `config` crate understands, optional) and
    /// overlay `SESSION_RTC__SECTION__KEY` environment variables.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("SESSION_RTC").separator("__"))
            .build()
            .context("Failed to read configuration")?;

        let cfg: Self = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("analyzer.emotion_interval_ms", self.analyzer.emotion_interval_ms),
            ("analyzer.question_interval_ms", self.analyzer.question_interval_ms),
            ("media.acquire_timeout_ms", self.media.acquire_timeout_ms),
            ("peer.negotiation_timeout_ms", self.peer.negotiation_timeout_ms),
        ];
        for (key, value) in nonzero {
            if value == 0 {
                bail!("{} must be greater than zero", key);
            }
        }
        if self.analyzer.window_size == 0 {
            bail!("analyzer.window_size must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_session_cadence() {
        let cfg = Config::default();
        assert_eq!(cfg.analyzer.emotion_interval_ms, 2_000);
        assert_eq!(cfg.analyzer.question_interval_ms, 10_000);
        assert_eq!(cfg.analyzer.window_size, 60);
        assert_eq!(cfg.analyzer.provider, AnalyzerProviderKind::Http);
        assert_eq!(cfg.transcription.language, "en");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let cfg = Config::load("does/not/exist/session-rtc").unwrap();
        assert_eq!(cfg.relay.port, 5001);
        assert_eq!(cfg.signaling.url, "ws://localhost:5001/ws");
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        std::fs::write(
            &path,
            "[analyzer]\nprovider = \"mock\"\nwindow_size = 30\n\n[peer]\nnegotiation_timeout_ms = 5000\n",
        )
        .unwrap();

        let cfg = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.analyzer.provider, AnalyzerProviderKind::Mock);
        assert_eq!(cfg.analyzer.window_size, 30);
        assert_eq!(cfg.analyzer.emotion_interval_ms, 2_000);
        assert_eq!(cfg.peer.negotiation_timeout_ms, 5_000);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        std::fs::write(&path, "[analyzer]\nemotion_interval_ms = 0\n").unwrap();

        let err = Config::load(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("analyzer.emotion_interval_ms"));
    }

    #[test]
    fn test_defaults_validate() {
        assert!(Config::default().validate().is_ok());

        let mut cfg = Config::default();
        cfg.analyzer.window_size = 0;
        assert!(cfg.validate().is_err());
    }
}
