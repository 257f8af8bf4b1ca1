//! Observable session status for a presentation layer.

use crate::peer::state::{GatheringState, PeerState};
use crate::peer::types::Generation;
use tokio::sync::watch;

/// Snapshot of everything a UI binds to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionState {
    /// Id of the relay session, `None` while disconnected
    pub relay_session: Option<String>,
    /// Outbound messages waiting for a relay session
    pub pending_messages: usize,
    pub generation: Generation,
    pub peer_state: PeerState,
    pub gathering: GatheringState,
    /// Whether the capture stream is attached to the current peer connection
    pub stream_attached: bool,
}

impl SessionState {
    pub fn relay_connected(&self) -> bool {
        self.relay_session.is_some()
    }
}

/// Publishes [`SessionState`] changes
#[derive(Debug, Clone)]
pub struct StateNotifier {
    tx: watch::Sender<SessionState>,
}

impl Default for StateNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl StateNotifier {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    /// Applies `f` and wakes subscribers only if something changed
    pub fn update(&self, f: impl FnOnce(&mut SessionState)) {
        self.tx.send_if_modified(|state| {
            let before = state.clone();
            f(state);
            *state != before
        });
    }
}
