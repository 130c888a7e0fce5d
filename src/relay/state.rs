use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use super::room::{Outbound, Rooms};
use crate::signaling::{PeerId, SignalingMessage};

/// Shared application state for relay handlers
#[derive(Clone)]
pub struct AppState {
    /// Session membership and routing
    pub rooms: Arc<RwLock<Rooms>>,

    /// Outbound queue of every connected socket (peer_id → writer)
    pub peers: Arc<RwLock<HashMap<PeerId, mpsc::UnboundedSender<SignalingMessage>>>>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(Rooms::new())),
            peers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn deliver(&self, outbound: Vec<Outbound>) {
        if outbound.is_empty() {
            return;
        }
        let peers = self.peers.read().await;
        for Outbound { to, message } in outbound {
            match peers.get(&to) {
                Some(tx) => {
                    if tx.send(message).is_err() {
                        debug!("Peer {} writer already closed", to);
                    }
                }
                None => debug!("Dropping {} for disconnected peer {}", message.event_name(), to),
            }
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
