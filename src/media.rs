//! Capture source lookup and stream caching.
//!
//! The platform capture layer is reached through [`MediaDevices`]. The
//! supplier picks the device whose label contains the source marker
//! (the PulseAudio "PACC" sink monitor), keeps one stream for it and only
//! re-acquires when the matched device changes.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Outbound track handed to the peer connection
pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    AudioInput,
    AudioOutput,
    VideoInput,
}

/// One entry of the platform's device enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
    pub kind: DeviceKind,
}

impl DeviceInfo {
    pub fn audio_input(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind: DeviceKind::AudioInput,
        }
    }
}

/// The capture source matched by the last lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDevice {
    pub id: String,
    pub label: String,
}

/// Capture constraints for [`MediaDevices::get_user_media`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConstraints {
    /// Only this device is acceptable
    pub device_id: String,
    pub auto_gain_control: bool,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl AudioConstraints {
    /// Exact device, all processing off so the signal stays untouched
    pub fn raw(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            auto_gain_control: false,
            echo_cancellation: false,
            noise_suppression: false,
        }
    }
}

/// Opus sample track, 48kHz stereo. Capture backends write encoded frames into it.
pub fn opus_track(track_id: impl Into<String>, stream_id: impl Into<String>) -> LocalTrack {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
            rtcp_feedback: vec![],
        },
        track_id.into(),
        stream_id.into(),
    ))
}

/// A captured stream: a set of outbound tracks under one id
pub struct MediaStream {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field(
                "tracks",
                &self.tracks.iter().map(|t| t.id()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Platform capture primitives
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>>;

    async fn get_user_media(&self, constraints: &AudioConstraints) -> Result<MediaStream>;

    /// Stops capturing on a stream that is no longer used
    fn release(&self, _stream: &MediaStream) {}
}

/// Single-subscriber device topology notification.
///
/// The platform side calls [`notify`](Self::notify) on every change, related
/// or not. Subscribing again replaces the previous subscriber.
#[derive(Debug, Clone, Default)]
pub struct DeviceChangeNotifier {
    subscriber: Arc<Mutex<Option<mpsc::UnboundedSender<()>>>>,
}

impl DeviceChangeNotifier {
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    pub fn notify(&self) {
        let guard = self
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(()).is_err() {
                    debug!("Device change subscriber is gone");
                }
            }
            None => debug!("Device change without subscriber"),
        }
    }
}

pub struct MediaStreamSupplier {
    devices: Arc<dyn MediaDevices>,
    source_marker: String,
    device: Option<ResolvedDevice>,
    stream: Option<Arc<MediaStream>>,
    device_changes: DeviceChangeNotifier,
}

impl MediaStreamSupplier {
    pub fn new(devices: Arc<dyn MediaDevices>, source_marker: impl Into<String>) -> Self {
        Self {
            devices,
            source_marker: source_marker.into(),
            device: None,
            stream: None,
            device_changes: DeviceChangeNotifier::default(),
        }
    }

    /// Handle the platform layer uses to report topology changes
    pub fn device_changes(&self) -> &DeviceChangeNotifier {
        &self.device_changes
    }

    /// Whether a capture stream is currently held
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// The stream handed out by the last successful fetch
    pub fn current_stream(&self) -> Option<&Arc<MediaStream>> {
        self.stream.as_ref()
    }

    pub fn resolved_device(&self) -> Option<&ResolvedDevice> {
        self.device.as_ref()
    }

    /// Looks up the capture source. `Ok(None)` means no matching hardware.
    pub async fn resolve_device(&self) -> Result<Option<ResolvedDevice>> {
        let devices = self.devices.enumerate_devices().await?;
        Ok(devices
            .into_iter()
            .find(|d| d.kind == DeviceKind::AudioInput && d.label.contains(&self.source_marker))
            .map(|d| ResolvedDevice {
                id: d.id,
                label: d.label,
            }))
    }

    /// Returns the stream of the capture source, re-acquiring only when the
    /// matched device changed or no stream is held.
    pub async fn get_stream(&mut self) -> Result<Arc<MediaStream>> {
        let device = self.resolve_device().await?;

        let new_id = device.as_ref().map(|d| d.id.as_str()).unwrap_or("");
        let old_id = self.device.as_ref().map(|d| d.id.as_str()).unwrap_or("");
        if new_id == old_id {
            if let Some(stream) = &self.stream {
                // already fetched
                return Ok(stream.clone());
            }
        }

        self.device = device;
        self.release_stream();

        let Some(device) = self.device.clone() else {
            info!("Capture source '{}' not found", self.source_marker);
            return Err(Error::DeviceNotFound);
        };

        info!("Acquiring capture stream for {} ({})", device.label, device.id);
        let stream = Arc::new(
            self.devices
                .get_user_media(&AudioConstraints::raw(device.id))
                .await?,
        );
        debug!("Acquired {:?}", stream);
        self.stream = Some(stream.clone());
        Ok(stream)
    }

    fn release_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!("Releasing capture stream {}", stream.id());
            self.devices.release(&stream);
        }
    }
}
