use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_PCMU};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::transport::{PeerEvent, PeerTransport, SdpKind, SessionDescription};
use crate::error::SessionError;
use crate::media::g711::{encode_pcmu, frame_duration, PCMU_CLOCK_RATE};
use crate::media::{AudioFrame, LocalStream, TrackKind, VideoSink};
use crate::signaling::IceCandidate;

fn transport_error(e: webrtc::Error) -> SessionError {
    SessionError::Transport(e.to_string())
}

/// Peer connection backed by webrtc-rs.
///
/// The microphone is sent as PCMU. Remote media is received and drained but
/// not decoded, so this transport offers no remote video stills.
pub struct WebRtcTransport {
    ice_servers: Vec<String>,
    include_loopback: bool,
    pc: Option<Arc<RTCPeerConnection>>,
}

impl WebRtcTransport {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self {
            ice_servers,
            include_loopback: false,
            pc: None,
        }
    }

    /// Gather loopback host candidates too, for peers on the same host.
    pub fn with_loopback(mut self, include: bool) -> Self {
        self.include_loopback = include;
        self
    }

    fn connection(&self) -> Result<&Arc<RTCPeerConnection>, SessionError> {
        self.pc
            .as_ref()
            .ok_or_else(|| SessionError::Transport("peer connection not open".to_string()))
    }

    fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, SessionError> {
        match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        }
        .map_err(transport_error)
    }
}

#[async_trait::async_trait]
impl PeerTransport for WebRtcTransport {
    async fn open(
        &mut self,
        local: &mut LocalStream,
    ) -> Result<mpsc::UnboundedReceiver<PeerEvent>, SessionError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(transport_error)?;

        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media_engine).map_err(transport_error)?;

        let mut settings = SettingEngine::default();
        settings.set_include_loopback_candidate(self.include_loopback);

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(settings)
            .build();

        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(transport_error)?,
        );

        // The microphone goes out as a sample track fed from a copy of its
        // frames; other local tracks get a plain transceiver
        let microphone = if local.track(TrackKind::Audio).is_some() {
            local.tee_audio()
        } else {
            None
        };
        let has_microphone = microphone.is_some();
        if let Some(frames) = microphone {
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_PCMU.to_owned(),
                    clock_rate: PCMU_CLOCK_RATE,
                    channels: 1,
                    ..Default::default()
                },
                "microphone".to_owned(),
                "session-rtc".to_owned(),
            ));
            pc.add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(transport_error)?;
            tokio::spawn(send_microphone(track, frames));
        }
        for track in local.tracks() {
            let kind = match track.kind() {
                TrackKind::Audio if has_microphone => continue,
                TrackKind::Audio => RTPCodecType::Audio,
                TrackKind::Video => RTPCodecType::Video,
            };
            pc.add_transceiver_from_kind(kind, None)
                .await
                .map_err(transport_error)?;
        }
        if !local.has_video() {
            let init = RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            };
            pc.add_transceiver_from_kind(RTPCodecType::Video, Some(init))
                .await
                .map_err(transport_error)?;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let tx = events_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("ICE gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(PeerEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {}", e),
                }
            })
        }));

        let tx = events_tx.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let tx = tx.clone();
            Box::pin(async move {
                info!("ICE connection state: {}", state);
                let event = match state {
                    RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                        PeerEvent::IceConnected
                    }
                    RTCIceConnectionState::Disconnected => PeerEvent::IceDisconnected,
                    RTCIceConnectionState::Failed => PeerEvent::IceFailed,
                    _ => return,
                };
                let _ = tx.send(event);
            })
        }));

        let tx = events_tx;
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let tx = tx.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Audio,
                };
                info!(
                    "Remote {:?} track attached (codec={})",
                    kind,
                    track.codec().capability.mime_type
                );
                let _ = tx.send(PeerEvent::RemoteTrack(kind));

                // Drain RTP so the receiver's buffers never fill up
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 1500];
                    let mut packets = 0u64;
                    while track.read(&mut buf).await.is_ok() {
                        packets += 1;
                    }
                    debug!("Remote {:?} track ended after {} packets", kind, packets);
                });
            })
        }));

        self.pc = Some(pc);
        Ok(events_rx)
    }

    async fn create_offer(&mut self) -> Result<SessionDescription, SessionError> {
        let offer = self
            .connection()?
            .create_offer(None)
            .await
            .map_err(transport_error)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, SessionError> {
        let answer = self
            .connection()?
            .create_answer(None)
            .await
            .map_err(transport_error)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), SessionError> {
        let desc = Self::to_rtc(desc)?;
        self.connection()?
            .set_local_description(desc)
            .await
            .map_err(transport_error)
    }

    async fn set_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), SessionError> {
        let desc = Self::to_rtc(desc)?;
        self.connection()?
            .set_remote_description(desc)
            .await
            .map_err(transport_error)
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), SessionError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.connection()?
            .add_ice_candidate(init)
            .await
            .map_err(transport_error)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        match self.pc.take() {
            Some(pc) => pc.close().await.map_err(transport_error),
            None => Ok(()),
        }
    }

    fn remote_video(&self) -> Option<Arc<dyn VideoSink>> {
        None
    }

    fn name(&self) -> &str {
        "webrtc"
    }
}

/// Write microphone frames to the outgoing track until the frames end.
/// Samples written before the track is bound to a connection are discarded.
async fn send_microphone(track: Arc<TrackLocalStaticSample>, mut frames: mpsc::Receiver<AudioFrame>) {
    let mut sent = 0u64;
    while let Some(frame) = frames.recv().await {
        let payload = encode_pcmu(&frame);
        if payload.is_empty() {
            continue;
        }
        let sample = Sample {
            data: payload.into(),
            duration: frame_duration(&frame),
            ..Default::default()
        };
        match track.write_sample(&sample).await {
            Ok(()) => sent += 1,
            Err(e) => debug!("Dropped microphone sample: {}", e),
        }
    }
    debug!("Microphone track ended after {} samples", sent);
}

impl Drop for WebRtcTransport {
    fn drop(&mut self) {
        if let Some(pc) = self.pc.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = pc.close().await {
                        warn!("Error closing dropped peer connection: {}", e);
                    }
                });
            }
        }
    }
}
