//! Signaling over the cast relay.
//!
//! Messages are JSON envelopes `{"type": .., "data": ..}` on a single
//! namespace. While no relay session exists outbound messages are queued and
//! delivered in order once one connects.

use crate::error::{Error, Result};
use crate::peer::types::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Message types (synced with the cast receiver)
pub const MSG_TYPE_RESET: &str = "reset";
pub const MSG_TYPE_ICE_CANDIDATE: &str = "iceCandidate";
pub const MSG_TYPE_SESSION_DESCRIPTION: &str = "sessionDescription";

/// Wire envelope. Also the form in which undelivered messages wait.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

/// An established relay session, provided by the cast transport
#[async_trait]
pub trait RelaySession: Send + Sync {
    /// Session identity, for logs
    fn id(&self) -> String;

    /// Routes every message received on `namespace` into `sink`. Listeners
    /// are added, never replaced, and live as long as the session.
    fn add_message_listener(&self, namespace: &str, sink: RelayEventSink);

    async fn send_message(&self, namespace: &str, message: String) -> Result<()>;
}

/// Everything the relay transport reports
pub enum RelayEvent {
    SessionStarted(Arc<dyn RelaySession>),
    SessionResumed(Arc<dyn RelaySession>),
    SessionEnded(String),
    Message { namespace: String, raw: String },
}

impl fmt::Debug for RelayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayEvent::SessionStarted(s) => write!(f, "SessionStarted({})", s.id()),
            RelayEvent::SessionResumed(s) => write!(f, "SessionResumed({})", s.id()),
            RelayEvent::SessionEnded(id) => write!(f, "SessionEnded({})", id),
            RelayEvent::Message { namespace, raw } => {
                write!(f, "Message({}, {} bytes)", namespace, raw.len())
            }
        }
    }
}

/// Sending half handed to the relay transport and to session listeners
#[derive(Debug, Clone)]
pub struct RelayEventSink {
    tx: mpsc::UnboundedSender<RelayEvent>,
}

impl RelayEventSink {
    pub fn new(tx: mpsc::UnboundedSender<RelayEvent>) -> Self {
        Self { tx }
    }

    pub fn session_started(&self, session: Arc<dyn RelaySession>) {
        self.emit(RelayEvent::SessionStarted(session));
    }

    pub fn session_resumed(&self, session: Arc<dyn RelaySession>) {
        self.emit(RelayEvent::SessionResumed(session));
    }

    pub fn session_ended(&self, session_id: impl Into<String>) {
        self.emit(RelayEvent::SessionEnded(session_id.into()));
    }

    /// Inbound message from the receiver
    pub fn deliver(&self, namespace: impl Into<String>, raw: impl Into<String>) {
        self.emit(RelayEvent::Message {
            namespace: namespace.into(),
            raw: raw.into(),
        });
    }

    fn emit(&self, event: RelayEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("Relay event dropped, coordinator is gone: {:?}", e.0);
        }
    }
}

/// Receives typed inbound signaling
#[async_trait]
pub trait SignalHandler: Send {
    async fn on_reset(&mut self);
    async fn on_remote_session_description(&mut self, description: SessionDescription);
    async fn on_remote_ice_candidate(&mut self, candidate: IceCandidate);
}

/// Outbound signaling used by the peer connection side
#[async_trait]
pub trait SignalSink: Send {
    async fn send_local_session_description(&mut self, description: &SessionDescription);
    async fn send_local_ice_candidate(&mut self, candidate: &IceCandidate);
}

pub struct SignalingRelay {
    namespace: String,
    session: Option<Arc<dyn RelaySession>>,
    pending: VecDeque<WireMessage>,
    inbound: RelayEventSink,
}

impl SignalingRelay {
    /// `inbound` is subscribed on every session that connects
    pub fn new(namespace: impl Into<String>, inbound: RelayEventSink) -> Self {
        Self {
            namespace: namespace.into(),
            session: None,
            pending: VecDeque::new(),
            inbound,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.id())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Sends now if a session is held, otherwise queues
    pub async fn send_message(&mut self, kind: &str, data: Value) {
        let message = WireMessage {
            kind: kind.to_owned(),
            data,
        };
        match self.session.clone() {
            Some(session) => self.dispatch(&session, &message).await,
            None => {
                debug!("No session, queuing {} message", message.kind);
                self.pending.push_back(message);
            }
        }
    }

    /// Attaches to a new or resumed session. A session already held keeps
    /// its listener.
    pub async fn on_session_connected(&mut self, session: Arc<dyn RelaySession>) {
        let id = session.id();
        if self.session_id().as_deref() == Some(id.as_str()) {
            debug!("Relay session {} already subscribed", id);
        } else {
            session.add_message_listener(&self.namespace, self.inbound.clone());
        }
        self.session = Some(session.clone());
        self.flush_pending(&session).await;
    }

    pub fn on_session_disconnected(&mut self) {
        if let Some(session) = self.session.take() {
            info!(
                "Relay session {} gone, {} message(s) pending",
                session.id(),
                self.pending.len()
            );
        }
    }

    /// Parses and dispatches a message received from the relay.
    /// Nothing here is ever returned as an error.
    pub async fn on_inbound_message(
        &self,
        namespace: &str,
        raw: &str,
        handler: &mut (dyn SignalHandler + '_),
    ) {
        if namespace != self.namespace {
            return;
        }

        let message: WireMessage = match serde_json::from_str(raw) {
            Ok(m) => m,
            Err(e) => {
                warn!("Malformed message: {}", e);
                return;
            }
        };

        match message.kind.as_str() {
            MSG_TYPE_RESET => handler.on_reset().await,
            MSG_TYPE_SESSION_DESCRIPTION => match decode(message.data) {
                Ok(description) => handler.on_remote_session_description(description).await,
                Err(e) => warn!("Bad sessionDescription: {}", e),
            },
            MSG_TYPE_ICE_CANDIDATE => match decode(message.data) {
                Ok(candidate) => handler.on_remote_ice_candidate(candidate).await,
                Err(e) => warn!("Bad iceCandidate: {}", e),
            },
            other => error!("Unknown message type: {}", other),
        }
    }

    async fn flush_pending(&mut self, session: &Arc<dyn RelaySession>) {
        if !self.pending.is_empty() {
            debug!("Sending {} pending message(s)", self.pending.len());
        }
        while let Some(message) = self.pending.pop_front() {
            self.dispatch(session, &message).await;
        }
    }

    async fn dispatch(&self, session: &Arc<dyn RelaySession>, message: &WireMessage) {
        let raw = match serde_json::to_string(message) {
            Ok(raw) => raw,
            Err(e) => {
                error!("sendMessage: {}", e);
                return;
            }
        };
        // no retry, the relay re-establishes sessions on its own
        if let Err(e) = session.send_message(&self.namespace, raw).await {
            error!("sendMessage: {}", e);
        }
    }

    async fn send_typed<T: Serialize>(&mut self, kind: &str, payload: &T) {
        match serde_json::to_value(payload) {
            Ok(data) => self.send_message(kind, data).await,
            Err(e) => error!("Cannot encode {}: {}", kind, e),
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(data: Value) -> Result<T> {
    if data.is_null() {
        return Err(Error::Protocol("missing data".into()));
    }
    Ok(serde_json::from_value(data)?)
}

#[async_trait]
impl SignalSink for SignalingRelay {
    async fn send_local_session_description(&mut self, description: &SessionDescription) {
        self.send_typed(MSG_TYPE_SESSION_DESCRIPTION, description).await;
    }

    async fn send_local_ice_candidate(&mut self, candidate: &IceCandidate) {
        self.send_typed(MSG_TYPE_ICE_CANDIDATE, candidate).await;
    }
}
