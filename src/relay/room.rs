use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::signaling::{ParticipantInfo, PeerId, SignalingMessage};

/// Calls are point-to-point.
pub const MAX_PARTICIPANTS: usize = 2;

/// A message the relay must deliver to one connected peer
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: PeerId,
    pub message: SignalingMessage,
}

impl Outbound {
    fn new(to: &PeerId, message: SignalingMessage) -> Self {
        Self {
            to: to.clone(),
            message,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomStatus {
    pub session_id: String,
    pub participants: Vec<ParticipantInfo>,
    pub participant_count: usize,
    pub transcript_lines: usize,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Room {
    participants: Vec<ParticipantInfo>,
    transcript_lines: usize,
    started_at: DateTime<Utc>,
}

impl Room {
    fn others<'a>(&'a self, peer: &'a PeerId) -> impl Iterator<Item = &'a PeerId> + 'a {
        self.participants
            .iter()
            .map(|p| &p.peer_id)
            .filter(move |id| *id != peer)
    }

    fn contains(&self, peer: &PeerId) -> bool {
        self.participants.iter().any(|p| &p.peer_id == peer)
    }
}

/// Membership and routing for every session on a relay.
///
/// Pure state: callers feed inbound messages and deliver the returned
/// `Outbound`s however their transport works.
#[derive(Debug, Default)]
pub struct Rooms {
    rooms: HashMap<String, Room>,
    membership: HashMap<PeerId, String>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, from: &PeerId, message: SignalingMessage, now: DateTime<Utc>) -> Vec<Outbound> {
        match message {
            SignalingMessage::Join {
                session_id,
                role,
                display_name,
            } => self.join(from, session_id, role, display_name, now),

            SignalingMessage::Leave { session_id } => {
                if self.membership.get(from) != Some(&session_id) {
                    debug!("Peer {} left {} without being a member", from, session_id);
                    return Vec::new();
                }
                self.disconnect(from)
            }

            SignalingMessage::Offer {
                target_peer_id, sdp, ..
            } => self.forward(from, target_peer_id.as_ref(), |target| SignalingMessage::Offer {
                target_peer_id: Some(target.clone()),
                from_peer_id: Some(from.clone()),
                sdp: sdp.clone(),
            }),

            SignalingMessage::Answer {
                target_peer_id, sdp, ..
            } => self.forward(from, target_peer_id.as_ref(), |target| SignalingMessage::Answer {
                target_peer_id: Some(target.clone()),
                from_peer_id: Some(from.clone()),
                sdp: sdp.clone(),
            }),

            SignalingMessage::IceCandidate {
                target_peer_id,
                candidate,
                ..
            } => self.forward(from, target_peer_id.as_ref(), |target| {
                SignalingMessage::IceCandidate {
                    target_peer_id: Some(target.clone()),
                    from_peer_id: Some(from.clone()),
                    candidate: candidate.clone(),
                }
            }),

            SignalingMessage::TranscriptChunk {
                text, speaker_role, ..
            } => {
                let Some(room) = self.room_of_mut(from) else {
                    return vec![not_joined(from)];
                };
                room.transcript_lines += 1;
                room.participants
                    .iter()
                    .map(|p| {
                        Outbound::new(
                            &p.peer_id,
                            SignalingMessage::TranscriptBroadcast {
                                timestamp: now,
                                speaker: speaker_role,
                                text: text.clone(),
                            },
                        )
                    })
                    .collect()
            }

            SignalingMessage::EmotionBroadcast {
                session_id,
                emotion_data,
                ..
            } => self.forward(from, None, |_| SignalingMessage::EmotionBroadcast {
                session_id: session_id.clone(),
                from_peer_id: Some(from.clone()),
                emotion_data: emotion_data.clone(),
            }),

            other => {
                warn!("Peer {} sent relay-only event {}", from, other.event_name());
                vec![Outbound::new(
                    from,
                    SignalingMessage::Error {
                        message: format!("{} cannot be sent by clients", other.event_name()),
                    },
                )]
            }
        }
    }

    fn join(
        &mut self,
        from: &PeerId,
        session_id: String,
        role: crate::signaling::ParticipantRole,
        display_name: String,
        now: DateTime<Utc>,
    ) -> Vec<Outbound> {
        let mut out = Vec::new();

        if let Some(current) = self.membership.get(from) {
            if *current == session_id {
                debug!("Peer {} re-joined {}", from, session_id);
                return self.session_state_for(from, &session_id).into_iter().collect();
            }
            out.extend(self.disconnect(from));
        }

        let room = self.rooms.entry(session_id.clone()).or_insert_with(|| Room {
            participants: Vec::new(),
            transcript_lines: 0,
            started_at: now,
        });

        if room.participants.len() >= MAX_PARTICIPANTS {
            warn!("Session {} is full, rejecting {}", session_id, from);
            out.push(Outbound::new(
                from,
                SignalingMessage::Error {
                    message: format!("session {} is full", session_id),
                },
            ));
            return out;
        }

        room.participants.push(ParticipantInfo {
            peer_id: from.clone(),
            role,
            display_name: display_name.clone(),
        });
        let participant_count = room.participants.len();
        self.membership.insert(from.clone(), session_id.clone());

        info!(
            "{} ({}) joined session {} [{} participants]",
            display_name, role, session_id, participant_count
        );

        for other in room.others(from) {
            out.push(Outbound::new(
                other,
                SignalingMessage::ParticipantJoined {
                    peer_id: from.clone(),
                    role,
                    display_name: display_name.clone(),
                    participant_count,
                },
            ));
        }
        out.extend(self.session_state_for(from, &session_id));
        out
    }

    fn session_state_for(&self, peer: &PeerId, session_id: &str) -> Option<Outbound> {
        let room = self.rooms.get(session_id)?;
        Some(Outbound::new(
            peer,
            SignalingMessage::SessionState {
                session_id: session_id.to_string(),
                peer_id: peer.clone(),
                participants: room
                    .participants
                    .iter()
                    .filter(|p| &p.peer_id != peer)
                    .cloned()
                    .collect(),
                participant_count: room.participants.len(),
            },
        ))
    }

    /// Route to `target`, or to every other member when no target is named.
    fn forward<F>(&self, from: &PeerId, target: Option<&PeerId>, build: F) -> Vec<Outbound>
    where
        F: Fn(&PeerId) -> SignalingMessage,
    {
        let Some(room) = self.room_of(from) else {
            return vec![not_joined(from)];
        };

        match target {
            Some(target) if room.contains(target) && target != from => {
                vec![Outbound::new(target, build(target))]
            }
            Some(target) => {
                warn!("Peer {} addressed {} outside its session", from, target);
                vec![Outbound::new(
                    from,
                    SignalingMessage::Error {
                        message: format!("peer {} is not in this session", target),
                    },
                )]
            }
            None => room
                .others(from)
                .map(|other| Outbound::new(other, build(other)))
                .collect(),
        }
    }

    /// Remove `peer` from its session (socket closed or leave_session).
    pub fn disconnect(&mut self, peer: &PeerId) -> Vec<Outbound> {
        let Some(session_id) = self.membership.remove(peer) else {
            return Vec::new();
        };
        let Some(room) = self.rooms.get_mut(&session_id) else {
            return Vec::new();
        };

        room.participants.retain(|p| &p.peer_id != peer);
        let participant_count = room.participants.len();
        info!(
            "Peer {} left session {} [{} participants]",
            peer, session_id, participant_count
        );

        let out = room
            .participants
            .iter()
            .map(|p| {
                Outbound::new(
                    &p.peer_id,
                    SignalingMessage::ParticipantLeft {
                        peer_id: Some(peer.clone()),
                        participant_count,
                    },
                )
            })
            .collect();

        if participant_count == 0 {
            self.rooms.remove(&session_id);
            info!("Session {} is empty, removed", session_id);
        }
        out
    }

    pub fn status(&self, session_id: &str) -> Option<RoomStatus> {
        self.rooms.get(session_id).map(|room| RoomStatus {
            session_id: session_id.to_string(),
            participants: room.participants.clone(),
            participant_count: room.participants.len(),
            transcript_lines: room.transcript_lines,
            started_at: room.started_at,
        })
    }

    pub fn session_count(&self) -> usize {
        self.rooms.len()
    }

    fn room_of(&self, peer: &PeerId) -> Option<&Room> {
        self.membership.get(peer).and_then(|s| self.rooms.get(s))
    }

    fn room_of_mut(&mut self, peer: &PeerId) -> Option<&mut Room> {
        let session_id = self.membership.get(peer)?;
        self.rooms.get_mut(session_id)
    }
}

fn not_joined(peer: &PeerId) -> Outbound {
    Outbound::new(
        peer,
        SignalingMessage::Error {
            message: "join a session first".to_string(),
        },
    )
}
