use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::state::PeerConnectionState;
use super::transport::{PeerEvent, PeerTransport, SessionDescription};
use crate::error::SessionError;
use crate::media::{LocalStream, VideoSink};
use crate::signaling::{IceCandidate, ParticipantRole, PeerId, SignalingMessage};

/// Owns the peer connection and its negotiation state machine.
///
/// Every method is called from the session's dispatch loop, so transitions
/// are applied one at a time. Methods that negotiate return the signaling
/// messages to send instead of sending them.
pub struct PeerConnectionManager {
    transport: Box<dyn PeerTransport>,
    role: ParticipantRole,
    state: watch::Sender<PeerConnectionState>,
    remote_peer: Option<PeerId>,
    has_local_description: bool,
    has_remote_description: bool,
    pending_candidates: Vec<IceCandidate>,
    seen_candidates: HashSet<(String, Option<String>)>,
    applied_candidates: usize,
    negotiation_timeout: Duration,
    deadline: Option<Instant>,
    opened: bool,
    closed: bool,
}

impl PeerConnectionManager {
    pub fn new(
        transport: Box<dyn PeerTransport>,
        role: ParticipantRole,
        negotiation_timeout: Duration,
    ) -> Self {
        let (state, _rx) = watch::channel(PeerConnectionState::Idle);
        Self {
            transport,
            role,
            state,
            remote_peer: None,
            has_local_description: false,
            has_remote_description: false,
            pending_candidates: Vec::new(),
            seen_candidates: HashSet::new(),
            applied_candidates: 0,
            negotiation_timeout,
            deadline: None,
            opened: false,
            closed: false,
        }
    }

    /// Create the connection with the local tracks attached.
    pub async fn open(
        &mut self,
        local: &mut LocalStream,
    ) -> Result<mpsc::UnboundedReceiver<PeerEvent>, SessionError> {
        info!(
            "Opening {} peer connection as {} ({} local tracks)",
            self.transport.name(),
            self.role,
            local.tracks().len()
        );
        let events = self.transport.open(local).await?;
        self.opened = true;
        Ok(events)
    }

    /// A remote participant is present.
    ///
    /// The initiator starts the single offer/answer cycle from `Idle`; repeated
    /// join notifications are ignored.
    pub async fn on_remote_joined(
        &mut self,
        peer: PeerId,
    ) -> Result<Vec<SignalingMessage>, SessionError> {
        if self.role == ParticipantRole::Responder {
            debug!("Remote {} joined, waiting for its offer", peer);
            self.remote_peer.get_or_insert(peer);
            return Ok(Vec::new());
        }

        if self.state() != PeerConnectionState::Idle {
            debug!("Ignoring join of {} while {}", peer, self.state());
            return Ok(Vec::new());
        }
        if !self.opened {
            return Err(SessionError::NegotiationFailed(
                "local media not attached".to_string(),
            ));
        }

        info!("Remote {} joined, creating offer", peer);
        self.remote_peer = Some(peer.clone());
        self.transition(PeerConnectionState::Negotiating);
        self.deadline = Some(Instant::now() + self.negotiation_timeout);

        let result = async {
            let offer = self.transport.create_offer().await?;
            self.transport.set_local_description(offer.clone()).await?;
            Ok::<_, SessionError>(offer)
        }
        .await;
        let offer = self.check_negotiation(result)?;
        self.has_local_description = true;

        Ok(vec![SignalingMessage::Offer {
            target_peer_id: Some(peer),
            from_peer_id: None,
            sdp: offer.sdp,
        }])
    }

    /// Answer a remote offer. Only the first offer of the session is accepted.
    pub async fn on_offer(
        &mut self,
        from: Option<PeerId>,
        sdp: String,
    ) -> Result<Vec<SignalingMessage>, SessionError> {
        if self.state() != PeerConnectionState::Idle {
            warn!("Ignoring offer while {} (no renegotiation)", self.state());
            return Ok(Vec::new());
        }
        if !self.opened {
            return Err(SessionError::NegotiationFailed(
                "local media not attached".to_string(),
            ));
        }

        if let Some(peer) = &from {
            self.remote_peer = Some(peer.clone());
        }
        info!("Received offer from {:?}, answering", self.remote_peer);
        self.transition(PeerConnectionState::Negotiating);
        self.deadline = Some(Instant::now() + self.negotiation_timeout);

        let result = self
            .transport
            .set_remote_description(SessionDescription::offer(sdp))
            .await;
        self.check_negotiation(result)?;
        self.has_remote_description = true;
        self.flush_pending_candidates().await;

        let result = async {
            let answer = self.transport.create_answer().await?;
            self.transport.set_local_description(answer.clone()).await?;
            Ok::<_, SessionError>(answer)
        }
        .await;
        let answer = self.check_negotiation(result)?;
        self.has_local_description = true;

        Ok(vec![SignalingMessage::Answer {
            target_peer_id: self.remote_peer.clone().or(from),
            from_peer_id: None,
            sdp: answer.sdp,
        }])
    }

    pub async fn on_answer(&mut self, sdp: String) -> Result<(), SessionError> {
        if self.state() != PeerConnectionState::Negotiating
            || !self.has_local_description
            || self.has_remote_description
        {
            warn!("Ignoring unexpected answer while {}", self.state());
            return Ok(());
        }

        info!("Received answer");
        let result = self
            .transport
            .set_remote_description(SessionDescription::answer(sdp))
            .await;
        self.check_negotiation(result)?;
        self.has_remote_description = true;
        self.flush_pending_candidates().await;
        Ok(())
    }

    /// Apply a remote candidate, or hold it until the remote description is set.
    pub async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        if self.state().is_terminal() {
            debug!("Dropping candidate after connection ended");
            return;
        }

        let key = (candidate.candidate.clone(), candidate.sdp_mid.clone());
        if !self.seen_candidates.insert(key) {
            debug!("Dropping duplicate candidate");
            return;
        }

        if self.has_remote_description {
            self.apply_candidate(candidate).await;
        } else {
            debug!(
                "Buffering candidate until remote description ({} pending)",
                self.pending_candidates.len() + 1
            );
            self.pending_candidates.push(candidate);
        }
    }

    async fn flush_pending_candidates(&mut self) {
        let pending = std::mem::take(&mut self.pending_candidates);
        if !pending.is_empty() {
            info!("Applying {} buffered candidates", pending.len());
        }
        for candidate in pending {
            self.apply_candidate(candidate).await;
        }
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate) {
        match self.transport.add_ice_candidate(candidate).await {
            Ok(()) => self.applied_candidates += 1,
            Err(e) => warn!("Failed to add remote candidate: {}", e),
        }
    }

    /// Message carrying a locally gathered candidate to the remote peer.
    pub fn on_local_candidate(&self, candidate: IceCandidate) -> Option<SignalingMessage> {
        if self.state().is_terminal() {
            return None;
        }
        Some(SignalingMessage::IceCandidate {
            target_peer_id: self.remote_peer.clone(),
            from_peer_id: None,
            candidate,
        })
    }

    /// Returns true when this report moved the connection to `Connected`.
    pub fn on_ice_connected(&mut self) -> bool {
        match self.state() {
            PeerConnectionState::Negotiating
                if self.has_local_description && self.has_remote_description =>
            {
                self.deadline = None;
                self.transition(PeerConnectionState::Connected)
            }
            PeerConnectionState::Degraded => {
                info!("ICE recovered, connection stays degraded");
                false
            }
            state => {
                debug!("Ignoring ICE connected report while {}", state);
                false
            }
        }
    }

    pub fn on_ice_disconnected(&mut self) {
        if self.state() == PeerConnectionState::Connected {
            warn!("ICE disconnected, continuing degraded without renegotiation");
            self.transition(PeerConnectionState::Degraded);
        }
    }

    /// Returns the fatal error when the failure happened during negotiation.
    pub fn on_ice_failed(&mut self) -> Option<SessionError> {
        match self.state() {
            PeerConnectionState::Negotiating => {
                error!("ICE failed during negotiation");
                self.fail();
                Some(SessionError::NegotiationFailed("ICE connectivity failed".to_string()))
            }
            PeerConnectionState::Connected => {
                warn!("ICE failed after connecting, continuing degraded");
                self.transition(PeerConnectionState::Degraded);
                None
            }
            _ => None,
        }
    }

    /// When negotiation must have completed, if it is in progress.
    pub fn negotiation_deadline(&self) -> Option<Instant> {
        match self.state() {
            PeerConnectionState::Negotiating => self.deadline,
            _ => None,
        }
    }

    pub fn on_negotiation_timeout(&mut self) -> SessionError {
        error!(
            "Negotiation did not complete within {}s",
            self.negotiation_timeout.as_secs()
        );
        self.fail();
        SessionError::NegotiationTimeout(self.negotiation_timeout.as_secs())
    }

    fn fail(&mut self) {
        self.deadline = None;
        self.transition(PeerConnectionState::Failed);
    }

    fn check_negotiation<T>(&mut self, result: Result<T, SessionError>) -> Result<T, SessionError> {
        result.map_err(|e| {
            error!("Negotiation step failed: {}", e);
            self.fail();
            match e {
                SessionError::NegotiationFailed(_) => e,
                other => SessionError::NegotiationFailed(other.to_string()),
            }
        })
    }

    /// Close the connection. The transport is closed exactly once; a failed
    /// connection stays `Failed`.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.deadline = None;
        self.pending_candidates.clear();

        if !self.state().is_terminal() {
            self.transition(PeerConnectionState::Closed);
        }
        if self.opened {
            if let Err(e) = self.transport.close().await {
                warn!("Error closing peer connection: {}", e);
            }
            info!("Peer connection closed ({})", self.state());
        }
    }

    fn transition(&mut self, next: PeerConnectionState) -> bool {
        let current = self.state();
        if !current.can_transition_to(next) {
            warn!("Rejected peer state transition {} -> {}", current, next);
            return false;
        }
        debug!("Peer state {} -> {}", current, next);
        self.state.send_replace(next);
        true
    }

    pub fn state(&self) -> PeerConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PeerConnectionState> {
        self.state.subscribe()
    }

    pub fn remote_video(&self) -> Option<Arc<dyn VideoSink>> {
        self.transport.remote_video()
    }

    pub fn remote_peer(&self) -> Option<&PeerId> {
        self.remote_peer.as_ref()
    }

    pub fn role(&self) -> ParticipantRole {
        self.role
    }

    pub fn applied_candidates(&self) -> usize {
        self.applied_candidates
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
