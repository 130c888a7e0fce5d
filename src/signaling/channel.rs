use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::messages::{ParticipantRole, SignalingMessage};
use crate::auth::BearerToken;
use crate::error::SessionError;

/// Connection to a relay.
///
/// Implementations:
/// - `WsTransport`: WebSocket to the relay server
/// - `LocalTransport`: in-process relay (same-process participants, tests)
#[async_trait::async_trait]
pub trait SignalingTransport: Send {
    /// Open the connection. Inbound messages arrive on the returned receiver,
    /// in order per sender; the receiver closing means the relay is gone.
    async fn connect(
        &mut self,
        token: &BearerToken,
    ) -> Result<mpsc::UnboundedReceiver<SignalingMessage>, SessionError>;

    fn send(&self, message: SignalingMessage) -> Result<(), SessionError>;

    /// Tear down without waiting for anything.
    fn close(&mut self);

    /// Transport name for logging
    fn name(&self) -> &str;
}

/// Session-scoped signaling.
pub struct SignalingChannel {
    transport: Box<dyn SignalingTransport>,
    session_id: String,
    connected: bool,
}

impl SignalingChannel {
    pub fn new(transport: Box<dyn SignalingTransport>, session_id: impl Into<String>) -> Self {
        Self {
            transport,
            session_id: session_id.into(),
            connected: false,
        }
    }

    pub async fn connect(
        &mut self,
        token: &BearerToken,
    ) -> Result<mpsc::UnboundedReceiver<SignalingMessage>, SessionError> {
        info!("Connecting signaling via {}", self.transport.name());
        let inbound = self.transport.connect(token).await?;
        self.connected = true;
        info!("Signaling connected for session {}", self.session_id);
        Ok(inbound)
    }

    pub fn announce_join(&self, role: ParticipantRole, display_name: &str) -> Result<(), SessionError> {
        self.send(SignalingMessage::Join {
            session_id: self.session_id.clone(),
            role,
            display_name: display_name.to_string(),
        })
    }

    pub fn send(&self, message: SignalingMessage) -> Result<(), SessionError> {
        if !self.connected {
            return Err(SessionError::SignalingDisconnected(format!(
                "cannot send {} before connect",
                message.event_name()
            )));
        }
        debug!("-> {}", message.event_name());
        self.transport.send(message)
    }

    /// Emit `leave_session` and close. Fire-and-forget and idempotent.
    pub fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;

        if let Err(e) = self.transport.send(SignalingMessage::Leave {
            session_id: self.session_id.clone(),
        }) {
            warn!("Leave notification not sent: {}", e);
        }
        self.transport.close();
        info!("Signaling disconnected for session {}", self.session_id);
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}
