use crate::config::Config;
use crate::error::{Error, Result};
use crate::media::LocalTrack;
use crate::peer::ice::{from_init, to_init};
use crate::peer::state::{GatheringState, PeerEvent, PeerEventSink, PeerState};
use crate::peer::types::{IceCandidate, SdpType, ServerConfig, SessionDescription};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;

/// Handle of an outbound track added with [`PeerConnection::add_track`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderId(pub u64);

/// Peer connection primitive the controller drives
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;
    async fn local_description(&self) -> Option<SessionDescription>;
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn add_track(&self, track: LocalTrack) -> Result<SenderId>;
    async fn remove_track(&self, sender: SenderId) -> Result<()>;
    /// Detaches all event handlers and closes the connection
    async fn close(&self) -> Result<()>;
}

/// Creates one peer connection per generation. Events of the new connection
/// must go to `events` only.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, events: PeerEventSink) -> Result<Arc<dyn PeerConnection>>;
}

/// [`PeerConnectionFactory`] backed by the `webrtc` crate
#[derive(Debug, Clone, Default)]
pub struct WebRtcPeerFactory {
    ice_servers: Vec<ServerConfig>,
}

impl WebRtcPeerFactory {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Self {
        Self { ice_servers }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.ice_servers.clone())
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerFactory {
    async fn create(&self, events: PeerEventSink) -> Result<Arc<dyn PeerConnection>> {
        let peer = new_peer(&self.ice_servers, events).await?;
        Ok(Arc::new(peer))
    }
}

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<SenderId, Arc<RTCRtpSender>>>,
    next_sender: AtomicU64,
}

/// Builds a peer connection with Opus registered and wires its events into `events`
pub async fn new_peer(servers: &[ServerConfig], events: PeerEventSink) -> Result<WebRtcPeer> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry = register_default_interceptors(Default::default(), &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(api.new_peer_connection(rtc_config(servers)).await?);
    let generation = events.generation();

    let sink = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let sink = sink.clone();
        Box::pin(async move {
            match cand {
                Some(c) => match c.to_json() {
                    Ok(init) => sink.emit(PeerEvent::LocalCandidate(from_init(init))),
                    Err(e) => warn!("Cannot serialize local candidate: {}", e),
                },
                // end of gathering
                None => debug!("ICE candidate gathering completed for {}", generation),
            }
        })
    }));

    let sink = events.clone();
    pc.on_negotiation_needed(Box::new(move || {
        sink.emit(PeerEvent::NegotiationNeeded);
        Box::pin(async {})
    }));

    let sink = events.clone();
    pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
        debug!("ICE gathering state changed to: {:?}", state);
        if let Some(state) = gathering_state(state) {
            sink.emit(PeerEvent::GatheringStateChanged(state));
        }
        Box::pin(async {})
    }));

    let sink = events;
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!("Peer connection {} state changed to: {:?}", generation, st);
        if let Some(state) = peer_state(st) {
            sink.emit(PeerEvent::StateChanged(state));
        }
        Box::pin(async {})
    }));

    Ok(WebRtcPeer {
        pc,
        senders: Mutex::new(HashMap::new()),
        next_sender: AtomicU64::new(0),
    })
}

impl WebRtcPeer {
    fn detach_handlers(&self) {
        self.pc
            .on_ice_candidate(Box::new(|_: Option<RTCIceCandidate>| Box::pin(async {})));
        self.pc.on_negotiation_needed(Box::new(|| Box::pin(async {})));
        self.pc
            .on_ice_gathering_state_change(Box::new(|_: RTCIceGathererState| Box::pin(async {})));
        self.pc
            .on_peer_connection_state_change(Box::new(|_: RTCPeerConnectionState| {
                Box::pin(async {})
            }));
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        from_rtc(offer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.pc.set_local_description(to_rtc(description)?).await?;
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.pc.local_description().await?;
        from_rtc(desc).ok()
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(to_rtc(description)?).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc.add_ice_candidate(to_init(candidate)).await?;
        Ok(())
    }

    async fn add_track(&self, track: LocalTrack) -> Result<SenderId> {
        let sender = self.pc.add_track(track).await?;
        let id = SenderId(self.next_sender.fetch_add(1, Ordering::Relaxed));
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, sender);
        Ok(id)
    }

    async fn remove_track(&self, sender: SenderId) -> Result<()> {
        let rtp_sender = self
            .senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&sender)
            .ok_or_else(|| Error::Negotiation(format!("unknown sender {:?}", sender)))?;
        self.pc.remove_track(&rtp_sender).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.detach_handlers();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.pc.close().await?;
        Ok(())
    }
}

/// Peer connection configuration; no servers means host candidates only
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription> {
    // same JSON shape on both sides
    Ok(serde_json::from_value(serde_json::to_value(description)?)?)
}

fn from_rtc(description: RTCSessionDescription) -> Result<SessionDescription> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(Error::Negotiation("unspecified sdp type".into()));
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: description.sdp,
    })
}

fn gathering_state(state: RTCIceGathererState) -> Option<GatheringState> {
    match state {
        RTCIceGathererState::New => Some(GatheringState::New),
        RTCIceGathererState::Gathering => Some(GatheringState::Gathering),
        RTCIceGathererState::Complete => Some(GatheringState::Complete),
        _ => None,
    }
}

fn peer_state(state: RTCPeerConnectionState) -> Option<PeerState> {
    match state {
        RTCPeerConnectionState::New => Some(PeerState::New),
        RTCPeerConnectionState::Connecting => Some(PeerState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerState::Closed),
        _ => None,
    }
}
