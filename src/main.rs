use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use session_rtc::media::WavFileDevices;
use session_rtc::peer::WebRtcTransport;
use session_rtc::session::HttpSessionStore;
use session_rtc::signaling::WsTransport;
use session_rtc::telemetry::{analyzer_from_config, NatsRecognizer, SpeechRecognizer};
use session_rtc::{
    relay, BearerToken, Config, ParticipantRole, SessionConfig, SessionDeps, SessionIdentity,
    SessionLifecycleController, SessionOutcome, SessionUpdate,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "session-rtc")]
#[command(about = "Two-party call sessions: signaling relay and headless participant")]
struct Args {
    /// Configuration file (without extension)
    #[arg(short, long, default_value = "config/session-rtc")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the signaling relay
    Relay,

    /// Join a session as a headless participant (WAV microphone, no camera)
    Join {
        /// Session to join
        #[arg(short, long)]
        session: String,

        #[arg(short, long, value_enum, default_value = "responder")]
        role: RoleArg,

        /// Name shown to the other participant
        #[arg(short, long, default_value = "headless")]
        name: String,

        /// Bearer token (falls back to SESSION_RTC_TOKEN)
        #[arg(short, long, env = "SESSION_RTC_TOKEN")]
        token: String,

        /// WAV file played as the microphone
        #[arg(short, long)]
        wav: Option<String>,

        /// Skip speech recognition
        #[arg(long)]
        no_transcript: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Initiator,
    Responder,
}

impl From<RoleArg> for ParticipantRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Initiator => ParticipantRole::Initiator,
            RoleArg::Responder => ParticipantRole::Responder,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;
    info!("{} starting", cfg.service.name);

    match args.command {
        Command::Relay => relay::serve(&cfg.relay).await,
        Command::Join {
            session,
            role,
            name,
            token,
            wav,
            no_transcript,
        } => {
            let identity = SessionIdentity::new(session, role.into(), name);
            join(&cfg, identity, &token, wav, no_transcript).await
        }
    }
}

async fn join(
    cfg: &Config,
    identity: SessionIdentity,
    token: &str,
    wav: Option<String>,
    no_transcript: bool,
) -> Result<()> {
    let token = BearerToken::parse(token)?;
    let wav = wav
        .or_else(|| cfg.media.wav_source.clone())
        .context("No microphone source: pass --wav or set media.wav_source")?;

    let recognizer: Option<Box<dyn SpeechRecognizer>> = if no_transcript {
        None
    } else {
        Some(Box::new(NatsRecognizer::new(
            cfg.transcription.nats_url.clone(),
            identity.session_id.clone(),
            Duration::from_millis(cfg.transcription.no_speech_timeout_ms),
        )))
    };

    let deps = SessionDeps {
        devices: Arc::new(WavFileDevices::new(wav)),
        signaling: Box::new(WsTransport::new(cfg.signaling.url.clone())),
        peer: Box::new(
            WebRtcTransport::new(cfg.peer.ice_servers.clone()).with_loopback(cfg.peer.include_loopback),
        ),
        analyzer: analyzer_from_config(&cfg.analyzer, &token)?,
        recognizer,
        store: Arc::new(HttpSessionStore::new(
            cfg.api.base_url.clone(),
            token.clone(),
            Duration::from_millis(cfg.api.request_timeout_ms),
        )?),
    };

    let config = SessionConfig::from_config(identity, cfg);
    let mut controller = SessionLifecycleController::new(config, token, deps);
    let handle = controller.handle();

    let mut updates = handle.subscribe();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(SessionUpdate::Transcript(segment)) => {
                    info!("[{}] {}", segment.speaker_role, segment.text)
                }
                Ok(SessionUpdate::Question(q)) => info!("Suggested question: {}", q.question),
                Ok(SessionUpdate::Terminated(e)) => error!("Session terminated: {}", e),
                Ok(update) => info!("{:?}", update),
                Err(RecvError::Lagged(n)) => warn!("Skipped {} session updates", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let capability = controller.join().await?;
    info!("Media: {:?}", capability);

    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, ending session");
            ctrl_c.end();
        }
    });

    match controller.run().await? {
        SessionOutcome::Ended(report) => {
            if let Some(e) = &report.persistence_error {
                warn!("Transcript was not persisted: {}", e);
            }
            println!("{}", serde_json::to_string_pretty(&report.transcript)?);
        }
        SessionOutcome::PeerLeft => info!("The other participant left"),
        SessionOutcome::Left => info!("Left the session"),
    }

    Ok(())
}
