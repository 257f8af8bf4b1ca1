//! Mock collaborators shared by the unit tests

use crate::error::{Error, Result};
use crate::media::{
    opus_track, AudioConstraints, DeviceInfo, LocalTrack, MediaDevices, MediaStream,
};
use crate::peer::connection::{PeerConnection, PeerConnectionFactory, SenderId};
use crate::peer::state::{PeerEvent, PeerEventSink};
use crate::peer::types::{Generation, IceCandidate, SessionDescription};
use crate::signaling::{RelayEventSink, RelaySession, SignalHandler, SignalSink, WireMessage};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn candidate(i: u16) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{i} 1 udp 2122260223 192.168.1.{i} 5000{i} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

/// Polls `check` until it holds or a second has passed
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// ---- capture ----

#[derive(Default)]
struct DevicesState {
    devices: Vec<DeviceInfo>,
    acquisitions: usize,
    releases: usize,
    last_constraints: Option<AudioConstraints>,
    fail_next: bool,
}

#[derive(Default)]
pub struct MockDevices {
    state: Mutex<DevicesState>,
}

impl MockDevices {
    pub fn new(devices: Vec<DeviceInfo>) -> Arc<Self> {
        let mock = Self::default();
        mock.state.lock().unwrap().devices = devices;
        Arc::new(mock)
    }

    pub fn set_devices(&self, devices: Vec<DeviceInfo>) {
        self.state.lock().unwrap().devices = devices;
    }

    pub fn acquisitions(&self) -> usize {
        self.state.lock().unwrap().acquisitions
    }

    pub fn releases(&self) -> usize {
        self.state.lock().unwrap().releases
    }

    pub fn last_constraints(&self) -> Option<AudioConstraints> {
        self.state.lock().unwrap().last_constraints.clone()
    }

    pub fn fail_next_acquisition(&self) {
        self.state.lock().unwrap().fail_next = true;
    }
}

#[async_trait]
impl MediaDevices for MockDevices {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.state.lock().unwrap().devices.clone())
    }

    async fn get_user_media(&self, constraints: &AudioConstraints) -> Result<MediaStream> {
        let mut state = self.state.lock().unwrap();
        state.acquisitions += 1;
        state.last_constraints = Some(constraints.clone());
        if std::mem::take(&mut state.fail_next) {
            return Err(Error::Capture("permission denied".into()));
        }
        let stream_id = format!("stream-{}", state.acquisitions);
        let track = opus_track(format!("{stream_id}-audio"), stream_id.clone());
        Ok(MediaStream::new(stream_id, vec![track]))
    }

    fn release(&self, _stream: &MediaStream) {
        self.state.lock().unwrap().releases += 1;
    }
}

// ---- relay ----

#[derive(Debug, Clone, PartialEq)]
pub enum RelayCall {
    Listen(String),
    Send { namespace: String, raw: String },
}

#[derive(Default)]
struct RelayState {
    calls: Vec<RelayCall>,
    listeners: Vec<(String, RelayEventSink)>,
    fail_sends: bool,
    send_attempts: usize,
}

pub struct MockRelaySession {
    id: String,
    state: Mutex<RelayState>,
}

impl MockRelaySession {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_owned(),
            state: Mutex::new(RelayState::default()),
        })
    }

    pub fn calls(&self) -> Vec<RelayCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn raw_sent(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RelayCall::Send { raw, .. } => Some(raw),
                RelayCall::Listen(_) => None,
            })
            .collect()
    }

    pub fn sent(&self) -> Vec<WireMessage> {
        self.raw_sent()
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect()
    }

    pub fn sent_on(&self, ns: &str) -> Vec<WireMessage> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RelayCall::Send { namespace, raw } if namespace == ns => {
                    Some(serde_json::from_str(&raw).unwrap())
                }
                _ => None,
            })
            .collect()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    pub fn send_attempts(&self) -> usize {
        self.state.lock().unwrap().send_attempts
    }

    /// Simulates a message from the receiver on every registered listener
    pub fn deliver(&self, raw: &str) {
        let listeners = self.state.lock().unwrap().listeners.clone();
        for (namespace, sink) in listeners {
            sink.deliver(namespace, raw);
        }
    }
}

#[async_trait]
impl RelaySession for MockRelaySession {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn add_message_listener(&self, namespace: &str, sink: RelayEventSink) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RelayCall::Listen(namespace.to_owned()));
        state.listeners.push((namespace.to_owned(), sink));
    }

    async fn send_message(&self, namespace: &str, message: String) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.send_attempts += 1;
        if state.fail_sends {
            return Err(Error::Relay("session gone".into()));
        }
        state.calls.push(RelayCall::Send {
            namespace: namespace.to_owned(),
            raw: message,
        });
        Ok(())
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct RecordingHandler {
    pub resets: usize,
    pub descriptions: Vec<SessionDescription>,
    pub candidates: Vec<IceCandidate>,
}

#[async_trait]
impl SignalHandler for RecordingHandler {
    async fn on_reset(&mut self) {
        self.resets += 1;
    }

    async fn on_remote_session_description(&mut self, description: SessionDescription) {
        self.descriptions.push(description);
    }

    async fn on_remote_ice_candidate(&mut self, candidate: IceCandidate) {
        self.candidates.push(candidate);
    }
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    pub descriptions: Vec<SessionDescription>,
    pub candidates: Vec<IceCandidate>,
}

#[async_trait]
impl SignalSink for RecordingSink {
    async fn send_local_session_description(&mut self, description: &SessionDescription) {
        self.descriptions.push(description.clone());
    }

    async fn send_local_ice_candidate(&mut self, candidate: &IceCandidate) {
        self.candidates.push(candidate.clone());
    }
}

// ---- peer connections ----

#[derive(Default)]
struct MockPeerState {
    closed: bool,
    fail_offers: bool,
    reject_remote: bool,
    offers: usize,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_candidates: Vec<IceCandidate>,
    tracks: Vec<(SenderId, String)>,
    next_sender: u64,
    added: usize,
    removed: usize,
    mutations_after_close: usize,
    gathered_on_set_local: Option<IceCandidate>,
}

pub struct MockPeer {
    generation: Generation,
    events: PeerEventSink,
    state: Mutex<MockPeerState>,
}

impl MockPeer {
    /// Raises `event` as the WebRTC stack would, even after close
    pub fn fire(&self, event: PeerEvent) {
        self.events.emit(event);
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn fail_offers(&self, fail: bool) {
        self.state.lock().unwrap().fail_offers = fail;
    }

    pub fn reject_remote_descriptions(&self, reject: bool) {
        self.state.lock().unwrap().reject_remote = reject;
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().unwrap().remote.clone()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().unwrap().remote_candidates.clone()
    }

    pub fn track_ids(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.tracks.iter().map(|(_, id)| id.clone()).collect()
    }

    pub fn added_tracks(&self) -> usize {
        self.state.lock().unwrap().added
    }

    pub fn removed_tracks(&self) -> usize {
        self.state.lock().unwrap().removed
    }

    /// Makes the next `set_local_description` raise `candidate`, as ICE
    /// gathering would
    pub fn gather_on_set_local(&self, candidate: IceCandidate) {
        self.state.lock().unwrap().gathered_on_set_local = Some(candidate);
    }

    pub fn mutations_after_close(&self) -> usize {
        self.state.lock().unwrap().mutations_after_close
    }

    fn check_open(state: &mut MockPeerState) -> Result<()> {
        if state.closed {
            state.mutations_after_close += 1;
            return Err(Error::Negotiation("connection closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnection for MockPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut state = self.state.lock().unwrap();
        Self::check_open(&mut state)?;
        if state.fail_offers {
            return Err(Error::Negotiation("offer failed".into()));
        }
        state.offers += 1;
        Ok(SessionDescription::offer(format!(
            "offer-{}-{}",
            self.generation, state.offers
        )))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_open(&mut state)?;
        state.local = Some(description);
        if let Some(candidate) = state.gathered_on_set_local.take() {
            self.events.emit(PeerEvent::LocalCandidate(candidate));
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().unwrap().local.clone()
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_open(&mut state)?;
        if state.reject_remote {
            return Err(Error::Negotiation("bad sdp".into()));
        }
        state.remote = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_open(&mut state)?;
        state.remote_candidates.push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: LocalTrack) -> Result<SenderId> {
        let mut state = self.state.lock().unwrap();
        Self::check_open(&mut state)?;
        let sender = SenderId(state.next_sender);
        state.next_sender += 1;
        state.added += 1;
        state.tracks.push((sender, track.id().to_owned()));
        Ok(sender)
    }

    async fn remove_track(&self, sender: SenderId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_open(&mut state)?;
        state.removed += 1;
        state.tracks.retain(|(id, _)| *id != sender);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

#[derive(Default)]
struct FactoryState {
    peers: Vec<Arc<MockPeer>>,
    fail_next: bool,
}

#[derive(Default)]
pub struct MockPeerFactory {
    state: Mutex<FactoryState>,
}

impl MockPeerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.state.lock().unwrap().peers.len()
    }

    pub fn open_peers(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.peers.iter().filter(|p| !p.is_closed()).count()
    }

    pub fn peer(&self, generation: Generation) -> Arc<MockPeer> {
        let state = self.state.lock().unwrap();
        state
            .peers
            .iter()
            .find(|p| p.generation == generation)
            .cloned()
            .unwrap_or_else(|| panic!("no peer for {generation}"))
    }

    pub fn fail_next_create(&self) {
        self.state.lock().unwrap().fail_next = true;
    }
}

#[async_trait]
impl PeerConnectionFactory for MockPeerFactory {
    async fn create(&self, events: PeerEventSink) -> Result<Arc<dyn PeerConnection>> {
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.fail_next) {
            return Err(Error::Negotiation("cannot create peer connection".into()));
        }
        let peer = Arc::new(MockPeer {
            generation: events.generation(),
            events,
            state: Mutex::new(MockPeerState::default()),
        });
        state.peers.push(peer.clone());
        Ok(peer)
    }
}
