//! Composition root.
//!
//! [`start`] builds the relay, the capture supplier and the peer connection
//! controller, then runs them on a single task. Each event source has its own
//! channel; the task is the only place where session state is touched.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::media::{DeviceChangeNotifier, MediaDevices, MediaStreamSupplier};
use crate::peer::connection::PeerConnectionFactory;
use crate::peer::controller::PeerConnectionController;
use crate::peer::state::{Completion, PeerEnvelope};
use crate::session::{SessionState, StateNotifier};
use crate::signaling::{RelayEvent, RelayEventSink, SignalingRelay};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

enum Command {
    Reset,
    Shutdown(oneshot::Sender<()>),
}

/// Control surface of a running coordinator
pub struct CoordinatorHandle {
    application_id: String,
    relay_events: RelayEventSink,
    device_changes: DeviceChangeNotifier,
    commands: mpsc::UnboundedSender<Command>,
    status: StateNotifier,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Receiver application the relay transport has to launch
    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    /// Where the relay transport reports sessions and messages
    pub fn relay_events(&self) -> RelayEventSink {
        self.relay_events.clone()
    }

    /// Where the platform capture layer reports topology changes
    pub fn device_changes(&self) -> DeviceChangeNotifier {
        self.device_changes.clone()
    }

    pub fn status(&self) -> watch::Receiver<SessionState> {
        self.status.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.status.snapshot()
    }

    /// Replaces the peer connection, as a `reset` from the receiver would
    pub fn reset(&self) -> Result<()> {
        self.commands.send(Command::Reset).map_err(|_| Error::Closed)
    }

    /// Closes the peer connection and stops the task
    pub async fn shutdown(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown(tx))
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?;
        if let Err(e) = self.task.await {
            warn!("Coordinator task ended abnormally: {}", e);
        }
        Ok(())
    }
}

struct SessionCoordinator {
    relay: SignalingRelay,
    controller: PeerConnectionController,
    status: StateNotifier,
    relay_rx: mpsc::UnboundedReceiver<RelayEvent>,
    peer_rx: mpsc::UnboundedReceiver<PeerEnvelope>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    device_rx: mpsc::UnboundedReceiver<()>,
    command_rx: mpsc::UnboundedReceiver<Command>,
}

/// Wires everything together and spawns the coordinator task.
///
/// The first peer connection is created before this returns, so a factory
/// error surfaces here.
pub async fn start(
    config: Config,
    devices: Arc<dyn MediaDevices>,
    factory: Arc<dyn PeerConnectionFactory>,
) -> Result<CoordinatorHandle> {
    config.validate()?;
    info!(
        "Starting session coordinator (app {}, namespace {}, source '{}')",
        config.application_id, config.namespace, config.source_marker
    );

    let (relay_tx, relay_rx) = mpsc::unbounded_channel();
    let (peer_tx, peer_rx) = mpsc::unbounded_channel();
    let (completion_tx, completion_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let relay_events = RelayEventSink::new(relay_tx);
    let relay = SignalingRelay::new(config.namespace, relay_events.clone());

    let supplier = MediaStreamSupplier::new(devices, config.source_marker);
    let device_changes = supplier.device_changes().clone();
    let device_rx = device_changes.subscribe();
    let supplier = Arc::new(Mutex::new(supplier));

    let status = StateNotifier::new();
    let controller = PeerConnectionController::construct(
        factory,
        supplier,
        peer_tx,
        completion_tx,
        status.clone(),
    )
    .await?;

    let coordinator = SessionCoordinator {
        relay,
        controller,
        status: status.clone(),
        relay_rx,
        peer_rx,
        completion_rx,
        device_rx,
        command_rx,
    };
    let task = tokio::spawn(coordinator.run());

    Ok(CoordinatorHandle {
        application_id: config.application_id,
        relay_events,
        device_changes,
        commands: command_tx,
        status,
        task,
    })
}

impl SessionCoordinator {
    async fn run(mut self) {
        loop {
            tokio::select! {
                Some(event) = self.relay_rx.recv() => self.on_relay_event(event).await,
                Some(envelope) = self.peer_rx.recv() => {
                    self.controller.handle_peer_event(envelope, &mut self.relay).await;
                }
                Some(completion) = self.completion_rx.recv() => {
                    self.controller.handle_completion(completion, &mut self.relay).await;
                }
                Some(()) = self.device_rx.recv() => {
                    debug!("Device topology changed");
                    self.controller.attach_current_stream();
                }
                command = self.command_rx.recv() => match command {
                    Some(Command::Reset) => {
                        if let Err(e) = self.controller.reset().await {
                            warn!("Reset failed: {}", e);
                        }
                    }
                    Some(Command::Shutdown(done)) => {
                        self.close().await;
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        debug!("All handles dropped");
                        self.close().await;
                        return;
                    }
                },
            }
            self.publish_relay();
        }
    }

    async fn on_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::SessionStarted(session) => {
                info!("Relay session started: {}", session.id());
                self.relay.on_session_connected(session).await;
            }
            RelayEvent::SessionResumed(session) => {
                info!("Relay session resumed: {}", session.id());
                self.relay.on_session_connected(session).await;
            }
            RelayEvent::SessionEnded(id) => {
                info!("Relay session ended: {}", id);
                self.relay.on_session_disconnected();
            }
            RelayEvent::Message { namespace, raw } => {
                self.relay
                    .on_inbound_message(&namespace, &raw, &mut self.controller)
                    .await;
            }
        }
    }

    async fn close(&mut self) {
        info!("Shutting down session coordinator");
        self.controller.close().await;
        self.relay.on_session_disconnected();
        self.publish_relay();
    }

    fn publish_relay(&self) {
        let session = self.relay.session_id();
        let pending = self.relay.pending_len();
        self.status.update(|s| {
            s.relay_session = session;
            s.pending_messages = pending;
        });
    }
}
