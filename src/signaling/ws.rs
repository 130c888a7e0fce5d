use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::channel::SignalingTransport;
use super::messages::SignalingMessage;
use crate::auth::BearerToken;
use crate::error::SessionError;

/// Close handshake budget once the outbound queue is closed
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// WebSocket connection to the relay server
pub struct WsTransport {
    url: String,
    outbound: Option<mpsc::UnboundedSender<SignalingMessage>>,
    reader: Option<JoinHandle<()>>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            outbound: None,
            reader: None,
        }
    }

    fn endpoint(&self, token: &BearerToken) -> Result<reqwest::Url, SessionError> {
        let mut url = reqwest::Url::parse(&self.url).map_err(|e| {
            SessionError::SignalingDisconnected(format!("invalid relay url {}: {}", self.url, e))
        })?;
        url.query_pairs_mut().append_pair("token", token.as_str());
        Ok(url)
    }
}

#[async_trait::async_trait]
impl SignalingTransport for WsTransport {
    async fn connect(
        &mut self,
        token: &BearerToken,
    ) -> Result<mpsc::UnboundedReceiver<SignalingMessage>, SessionError> {
        let endpoint = self.endpoint(token)?;
        info!("Connecting to relay at {}", self.url);

        let (ws_stream, _) = connect_async(endpoint.as_str()).await.map_err(|e| match e {
            tungstenite::Error::Http(response)
                if response.status() == tungstenite::http::StatusCode::UNAUTHORIZED
                    || response.status() == tungstenite::http::StatusCode::FORBIDDEN =>
            {
                SessionError::AuthRejected(format!("relay answered {}", response.status()))
            }
            other => SessionError::SignalingDisconnected(format!("failed to connect: {}", other)),
        })?;

        info!("Connected to relay");

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<SignalingMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        // Sender: queue → socket, then close politely within a bounded time
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode {}: {}", message.event_name(), e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!("Failed to send signaling message: {}", e);
                    break;
                }
            }
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, write.close()).await;
            debug!("Signaling sender task terminated");
        });

        // Receiver: socket → inbound queue; dropping in_tx tells the session the relay is gone
        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match SignalingMessage::from_json(&text) {
                        Ok(message) => {
                            if in_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Ignoring unparseable relay frame: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        info!("Relay closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Relay socket error: {}", e);
                        break;
                    }
                }
            }
            debug!("Signaling receiver task terminated");
        });

        self.outbound = Some(out_tx);
        self.reader = Some(reader);
        Ok(in_rx)
    }

    fn send(&self, message: SignalingMessage) -> Result<(), SessionError> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| SessionError::SignalingDisconnected("not connected".to_string()))?;
        outbound
            .send(message)
            .map_err(|_| SessionError::SignalingDisconnected("relay socket closed".to_string()))
    }

    fn close(&mut self) {
        // Dropping the queue lets the sender flush what is pending (the leave notice) and close
        self.outbound = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn name(&self) -> &str {
        "websocket"
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}
