//! Lifecycle of the peer connection towards the receiver.
//!
//! Exactly one [`PeerInstance`] is current. Each instance is created under a
//! [`Generation`]; every event it raises and every asynchronous operation
//! issued on it carries that generation, and anything that comes back for a
//! generation other than the current one is dropped.

use crate::error::{Error, Result};
use crate::logger::dump_candidate;
use crate::media::{MediaStream, MediaStreamSupplier};
use crate::peer::connection::PeerConnectionFactory;
use crate::peer::ice::analyze_candidates;
use crate::peer::state::{
    Completion, GatheringState, PeerEnvelope, PeerEvent, PeerEventSink, PeerInstance,
};
use crate::peer::types::{Generation, IceCandidate, SessionDescription};
use crate::session::StateNotifier;
use crate::signaling::{SignalHandler, SignalSink};
use crate::utils::random_id;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

pub struct PeerConnectionController {
    factory: Arc<dyn PeerConnectionFactory>,
    supplier: Arc<Mutex<MediaStreamSupplier>>,
    current: PeerInstance,
    events_tx: mpsc::UnboundedSender<PeerEnvelope>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    status: StateNotifier,
}

impl PeerConnectionController {
    /// Creates generation 0 and starts the first stream attachment pass
    pub async fn construct(
        factory: Arc<dyn PeerConnectionFactory>,
        supplier: Arc<Mutex<MediaStreamSupplier>>,
        events_tx: mpsc::UnboundedSender<PeerEnvelope>,
        completions_tx: mpsc::UnboundedSender<Completion>,
        status: StateNotifier,
    ) -> Result<Self> {
        let current = create_instance(factory.as_ref(), Generation::INITIAL, &events_tx).await?;
        let controller = Self {
            factory,
            supplier,
            current,
            events_tx,
            completions_tx,
            status,
        };
        controller.publish();
        controller.attach_current_stream();
        Ok(controller)
    }

    pub fn generation(&self) -> Generation {
        self.current.generation
    }

    pub fn current(&self) -> &PeerInstance {
        &self.current
    }

    /// Replaces the current instance with a fresh one of the next generation.
    ///
    /// The successor is built before the predecessor is closed. If it cannot
    /// be built the predecessor stays current.
    pub async fn reset(&mut self) -> Result<()> {
        let generation = self.current.generation.next();
        let successor = create_instance(self.factory.as_ref(), generation, &self.events_tx)
            .await
            .map_err(|e| {
                error!("Cannot create peer connection {}: {}", generation, e);
                e
            })?;

        let predecessor = std::mem::replace(&mut self.current, successor);
        predecessor.close().await;
        info!(
            "Replaced peer connection {} with {}",
            predecessor.generation, generation
        );

        self.publish();
        self.attach_current_stream();
        Ok(())
    }

    /// Closes the current instance for good
    pub async fn close(&mut self) {
        self.current.close().await;
    }

    /// Re-fetches the capture stream and attaches it to the current instance
    /// once the fetch completes.
    pub fn attach_current_stream(&self) {
        let supplier = self.supplier.clone();
        let tx = self.completions_tx.clone();
        let generation = self.current.generation;
        tokio::spawn(async move {
            // results must reach the controller in fetch order
            let mut supplier = supplier.lock().await;
            let result = supplier.get_stream().await;
            if tx.send(Completion::Stream { generation, result }).is_err() {
                debug!("Stream result for {} dropped, controller is gone", generation);
            }
        });
    }

    pub async fn handle_peer_event(
        &mut self,
        envelope: PeerEnvelope,
        signals: &mut (dyn SignalSink + '_),
    ) {
        let PeerEnvelope { generation, event } = envelope;
        if generation != self.current.generation {
            debug!("Dropping {:?} from superseded {}", event, generation);
            return;
        }

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                dump_candidate("LOCAL", generation, &candidate);
                self.current.local_candidates.push(candidate.clone());
                if self.current.is_negotiating() {
                    // the offer it belongs to goes out first
                    self.current.held_candidates.push(candidate);
                } else {
                    signals.send_local_ice_candidate(&candidate).await;
                }
            }
            PeerEvent::NegotiationNeeded => self.renegotiate(),
            PeerEvent::GatheringStateChanged(state) => {
                self.current.gathering = state;
                if state == GatheringState::Complete {
                    analyze_candidates(&self.current.local_candidates);
                }
                self.publish();
            }
            PeerEvent::StateChanged(state) => {
                self.current.state = state;
                self.publish();
            }
        }
    }

    pub async fn handle_completion(
        &mut self,
        completion: Completion,
        signals: &mut (dyn SignalSink + '_),
    ) {
        let generation = completion.generation();
        if generation != self.current.generation {
            debug!("Dropping completion from superseded {}", generation);
            return;
        }

        match completion {
            Completion::LocalDescription { result, .. } => {
                self.current.offers_in_flight = self.current.offers_in_flight.saturating_sub(1);
                match result {
                    Ok(description) => {
                        self.current.has_local_description = true;
                        signals.send_local_session_description(&description).await;
                    }
                    Err(e) => error!("Renegotiation of {} failed: {}", generation, e),
                }
                if !self.current.is_negotiating() {
                    self.release_held_candidates(signals).await;
                }
            }
            Completion::Stream { result, .. } => match result {
                Ok(stream) => self.attach(Some(stream)).await,
                Err(e) => {
                    warn!("getStream: {}", e);
                    self.attach(None).await;
                }
            },
        }
    }

    pub async fn apply_remote_description(&mut self, description: SessionDescription) {
        let generation = self.current.generation;
        debug!("Applying remote {:?} to {}", description.sdp_type, generation);
        if let Err(e) = self.current.pc.set_remote_description(description).await {
            error!("setRemoteDescription: {}", e);
            return;
        }
        self.current.has_remote_description = true;

        let queued = std::mem::take(&mut self.current.pending_remote_candidates);
        if !queued.is_empty() {
            debug!("Applying {} queued remote candidate(s)", queued.len());
        }
        for candidate in queued {
            self.add_remote_candidate(candidate).await;
        }
    }

    pub async fn apply_remote_candidate(&mut self, candidate: IceCandidate) {
        dump_candidate("REMOTE", self.current.generation, &candidate);
        if !self.current.has_remote_description {
            debug!("Remote description not set yet, queuing candidate");
            self.current.pending_remote_candidates.push(candidate);
            return;
        }
        self.add_remote_candidate(candidate).await;
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) {
        if let Err(e) = self.current.pc.add_ice_candidate(candidate).await {
            error!("addIceCandidate: {}", e);
        }
    }

    async fn release_held_candidates(&mut self, signals: &mut (dyn SignalSink + '_)) {
        let held = std::mem::take(&mut self.current.held_candidates);
        if !held.is_empty() {
            debug!("Sending {} held local candidate(s)", held.len());
        }
        for candidate in &held {
            signals.send_local_ice_candidate(candidate).await;
        }
    }

    /// Offer, set local, read back; the result comes back as a completion
    fn renegotiate(&mut self) {
        self.current.offers_in_flight += 1;
        let pc = self.current.pc.clone();
        let tx = self.completions_tx.clone();
        let generation = self.current.generation;
        debug!("Negotiation needed on {}", generation);
        tokio::spawn(async move {
            let result: Result<SessionDescription> = async {
                let offer = pc.create_offer().await?;
                pc.set_local_description(offer).await?;
                pc.local_description()
                    .await
                    .ok_or_else(|| Error::Negotiation("no local description after set".into()))
            }
            .await;
            if tx
                .send(Completion::LocalDescription { generation, result })
                .is_err()
            {
                debug!("Offer for {} dropped, controller is gone", generation);
            }
        });
    }

    async fn attach(&mut self, stream: Option<Arc<MediaStream>>) {
        let unchanged = match (&self.current.attached, &stream) {
            (Some(attached), Some(stream)) => Arc::ptr_eq(attached, stream),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            // nothing changed for us
            return;
        }

        let pc = self.current.pc.clone();
        for sender in std::mem::take(&mut self.current.senders) {
            if let Err(e) = pc.remove_track(sender).await {
                warn!("removeTrack: {}", e);
            }
        }

        if let Some(stream) = &stream {
            info!(
                "Attaching stream {} ({} track(s)) to {}",
                stream.id(),
                stream.tracks().len(),
                self.current.generation
            );
            for track in stream.tracks() {
                match pc.add_track(track.clone()).await {
                    Ok(sender) => self.current.senders.push(sender),
                    Err(e) => warn!("addTrack: {}", e),
                }
            }
        } else {
            info!("No stream attached to {}", self.current.generation);
        }

        self.current.attached = stream;
        self.publish();
    }

    fn publish(&self) {
        let current = &self.current;
        self.status.update(|s| {
            s.generation = current.generation;
            s.peer_state = current.state;
            s.gathering = current.gathering;
            s.stream_attached = current.attached.is_some();
        });
    }
}

async fn create_instance(
    factory: &dyn PeerConnectionFactory,
    generation: Generation,
    events_tx: &mpsc::UnboundedSender<PeerEnvelope>,
) -> Result<PeerInstance> {
    let connection_id = random_id();
    info!("Creating peer connection {} ({})", generation, connection_id);
    let pc = factory
        .create(PeerEventSink::new(generation, events_tx.clone()))
        .await?;
    Ok(PeerInstance::new(generation, connection_id, pc))
}

#[async_trait]
impl SignalHandler for PeerConnectionController {
    async fn on_reset(&mut self) {
        info!("Reset requested by receiver");
        if self.reset().await.is_err() {
            warn!("Keeping peer connection {}", self.current.generation);
        }
    }

    async fn on_remote_session_description(&mut self, description: SessionDescription) {
        self.apply_remote_description(description).await;
    }

    async fn on_remote_ice_candidate(&mut self, candidate: IceCandidate) {
        self.apply_remote_candidate(candidate).await;
    }
}
