use crate::error::Result;
use crate::media::MediaStream;
use crate::peer::connection::{PeerConnection, SenderId};
use crate::peer::types::{Generation, IceCandidate, SessionDescription};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Peer connection state as reported by the WebRTC stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// ICE gathering state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatheringState {
    #[default]
    New,
    Gathering,
    Complete,
}

/// Events raised by a peer connection instance
#[derive(Debug, Clone)]
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    NegotiationNeeded,
    GatheringStateChanged(GatheringState),
    StateChanged(PeerState),
}

/// A [`PeerEvent`] stamped with the generation that raised it
#[derive(Debug)]
pub struct PeerEnvelope {
    pub generation: Generation,
    pub event: PeerEvent,
}

/// Per-instance event channel. Every event it carries is stamped with the
/// instance's generation.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    generation: Generation,
    tx: mpsc::UnboundedSender<PeerEnvelope>,
}

impl PeerEventSink {
    pub fn new(generation: Generation, tx: mpsc::UnboundedSender<PeerEnvelope>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn emit(&self, event: PeerEvent) {
        let envelope = PeerEnvelope {
            generation: self.generation,
            event,
        };
        if self.tx.send(envelope).is_err() {
            debug!("Peer event for {} dropped, controller is gone", self.generation);
        }
    }
}

/// Result of an asynchronous operation issued under some generation
#[derive(Debug)]
pub enum Completion {
    /// Offer created and set as local description
    LocalDescription {
        generation: Generation,
        result: Result<SessionDescription>,
    },
    /// Capture stream fetched for an attachment pass
    Stream {
        generation: Generation,
        result: Result<Arc<MediaStream>>,
    },
}

impl Completion {
    pub fn generation(&self) -> Generation {
        match self {
            Completion::LocalDescription { generation, .. }
            | Completion::Stream { generation, .. } => *generation,
        }
    }
}

/// One peer connection together with the negotiation bookkeeping done on it
pub struct PeerInstance {
    pub(crate) generation: Generation,
    pub(crate) connection_id: String,
    pub(crate) pc: Arc<dyn PeerConnection>,
    pub(crate) attached: Option<Arc<MediaStream>>,
    pub(crate) senders: Vec<SenderId>,
    pub(crate) has_local_description: bool,
    pub(crate) has_remote_description: bool,
    pub(crate) gathering: GatheringState,
    pub(crate) state: PeerState,
    /// Offers issued but not yet sent
    pub(crate) offers_in_flight: usize,
    /// Local candidates gathered for this instance
    pub(crate) local_candidates: Vec<IceCandidate>,
    /// Local candidates held back until the pending offer is sent
    pub(crate) held_candidates: Vec<IceCandidate>,
    /// Remote candidates received before the remote description
    pub(crate) pending_remote_candidates: Vec<IceCandidate>,
}

impl PeerInstance {
    pub fn new(generation: Generation, connection_id: String, pc: Arc<dyn PeerConnection>) -> Self {
        Self {
            generation,
            connection_id,
            pc,
            attached: None,
            senders: Vec::new(),
            has_local_description: false,
            has_remote_description: false,
            gathering: GatheringState::New,
            state: PeerState::New,
            offers_in_flight: 0,
            local_candidates: Vec::new(),
            held_candidates: Vec::new(),
            pending_remote_candidates: Vec::new(),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn attached_stream(&self) -> Option<&Arc<MediaStream>> {
        self.attached.as_ref()
    }

    pub fn sender_count(&self) -> usize {
        self.senders.len()
    }

    pub fn has_local_description(&self) -> bool {
        self.has_local_description
    }

    pub fn has_remote_description(&self) -> bool {
        self.has_remote_description
    }

    pub fn gathering(&self) -> GatheringState {
        self.gathering
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn is_negotiating(&self) -> bool {
        self.offers_in_flight > 0
    }

    pub fn held_candidates(&self) -> usize {
        self.held_candidates.len()
    }

    pub fn pending_remote_candidates(&self) -> usize {
        self.pending_remote_candidates.len()
    }

    /// Closes the underlying connection; its handlers are detached first
    pub(crate) async fn close(&self) {
        debug!("Closing peer connection {} ({})", self.generation, self.connection_id);
        if let Err(e) = self.pc.close().await {
            warn!("close {}: {}", self.generation, e);
        }
    }
}
