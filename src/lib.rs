pub mod config;
pub mod coordinator;
pub mod error;
pub mod logger;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;
mod utils;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use coordinator::{start, CoordinatorHandle};
pub use error::{Error, Result};
pub use media::{DeviceChangeNotifier, DeviceInfo, MediaDevices, MediaStream, MediaStreamSupplier};
pub use peer::{Generation, PeerConnectionFactory, WebRtcPeerFactory};
pub use session::SessionState;
pub use signaling::{RelayEventSink, RelaySession};
