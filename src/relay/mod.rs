//! Signaling relay service
//!
//! Routes session-scoped control messages between the two participants of
//! a call:
//! - GET /ws?token=... - WebSocket signaling endpoint
//! - GET /sessions/:id/status - Participants and transcript line count
//! - GET /health - Health check

mod handlers;
mod room;
mod routes;
mod state;

pub use room::{Outbound, RoomStatus, Rooms, MAX_PARTICIPANTS};
pub use routes::create_router;
pub use state::AppState;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::RelayConfig;

/// Serve the relay until Ctrl-C.
pub async fn serve(config: &RelayConfig) -> Result<()> {
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind relay on {}", addr))?;

    info!("Relay listening on {}", addr);

    axum::serve(listener, create_router(AppState::new()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Relay shutting down");
        })
        .await
        .context("Relay server failed")?;

    Ok(())
}
