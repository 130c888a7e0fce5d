use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::channel::SignalingTransport;
use super::messages::{PeerId, SignalingMessage};
use crate::auth::BearerToken;
use crate::error::SessionError;
use crate::relay::{RoomStatus, Rooms};

enum HubCommand {
    Register {
        peer: PeerId,
        inbound: mpsc::UnboundedSender<SignalingMessage>,
    },
    Deliver {
        from: PeerId,
        message: SignalingMessage,
    },
    Disconnect {
        peer: PeerId,
    },
    Status {
        session_id: String,
        reply: oneshot::Sender<Option<RoomStatus>>,
    },
}

/// Relay running inside this process.
///
/// Uses the same routing as the relay server; one hub task owns the rooms.
#[derive(Clone)]
pub struct LocalRelay {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl LocalRelay {
    /// Must be called inside a tokio runtime.
    pub fn new() -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_hub(rx));
        Self { commands }
    }

    pub fn transport(&self) -> LocalTransport {
        LocalTransport {
            relay: self.clone(),
            peer: PeerId::generate(),
            connected: false,
        }
    }

    pub async fn status(&self, session_id: &str) -> Option<RoomStatus> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(HubCommand::Status {
                session_id: session_id.to_string(),
                reply,
            })
            .ok()?;
        rx.await.ok().flatten()
    }
}

impl Default for LocalRelay {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_hub(mut commands: mpsc::UnboundedReceiver<HubCommand>) {
    let mut rooms = Rooms::new();
    let mut peers: HashMap<PeerId, mpsc::UnboundedSender<SignalingMessage>> = HashMap::new();

    while let Some(command) = commands.recv().await {
        let outbound = match command {
            HubCommand::Register { peer, inbound } => {
                peers.insert(peer, inbound);
                continue;
            }
            HubCommand::Deliver { from, message } => rooms.handle(&from, message, Utc::now()),
            HubCommand::Disconnect { peer } => {
                peers.remove(&peer);
                rooms.disconnect(&peer)
            }
            HubCommand::Status { session_id, reply } => {
                let _ = reply.send(rooms.status(&session_id));
                continue;
            }
        };

        for out in outbound {
            if let Some(tx) = peers.get(&out.to) {
                let _ = tx.send(out.message);
            }
        }
    }
    debug!("Local relay hub stopped");
}

/// One participant's connection to a `LocalRelay`
pub struct LocalTransport {
    relay: LocalRelay,
    peer: PeerId,
    connected: bool,
}

impl LocalTransport {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer
    }
}

#[async_trait::async_trait]
impl SignalingTransport for LocalTransport {
    async fn connect(
        &mut self,
        _token: &BearerToken,
    ) -> Result<mpsc::UnboundedReceiver<SignalingMessage>, SessionError> {
        let (inbound, rx) = mpsc::unbounded_channel();
        self.relay
            .commands
            .send(HubCommand::Register {
                peer: self.peer.clone(),
                inbound,
            })
            .map_err(|_| SessionError::SignalingDisconnected("local relay stopped".to_string()))?;
        self.connected = true;
        Ok(rx)
    }

    fn send(&self, message: SignalingMessage) -> Result<(), SessionError> {
        if !self.connected {
            return Err(SessionError::SignalingDisconnected("not connected".to_string()));
        }
        self.relay
            .commands
            .send(HubCommand::Deliver {
                from: self.peer.clone(),
                message,
            })
            .map_err(|_| SessionError::SignalingDisconnected("local relay stopped".to_string()))
    }

    fn close(&mut self) {
        if std::mem::replace(&mut self.connected, false) {
            let _ = self.relay.commands.send(HubCommand::Disconnect {
                peer: self.peer.clone(),
            });
        }
    }

    fn name(&self) -> &str {
        "local"
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.close();
    }
}
