pub mod connection;
pub mod controller;
pub mod ice;
pub mod state;
pub mod types;

pub use connection::{PeerConnection, PeerConnectionFactory, SenderId, WebRtcPeerFactory};
pub use controller::PeerConnectionController;
pub use state::{GatheringState, PeerEvent, PeerEventSink, PeerState};
pub use types::{Generation, IceCandidate, SdpType, ServerConfig, SessionDescription};
