//! Media-engine seams: local devices, tracks, and peer connections.
//!
//! The call manager only ever talks to these traits; the concrete engine
//! (browser bindings, native WebRTC, test doubles) lives outside the crate.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::peer::PeerEvents;
use crate::error::ErrorCode;
use crate::net::types::IceCandidate;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("media device unavailable: {0}")]
    Device(String),
    #[error("media permission denied")]
    PermissionDenied,
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("peer connection closed")]
    Closed,
}

impl ErrorCode for MediaError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Device(_) => "E_MEDIA_DEVICE",
            Self::PermissionDenied => "E_MEDIA_PERMISSION",
            Self::Negotiation(_) => "E_MEDIA_NEGOTIATION",
            Self::Closed => "E_MEDIA_CLOSED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Device(_) | Self::Negotiation(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// One local or remote media track.
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    fn enabled(&self) -> bool;
    /// Mute/unmute in place. The device stays acquired.
    fn set_enabled(&self, enabled: bool);
    /// Release the underlying device. Idempotent.
    fn stop(&self);
}

/// A set of tracks under one stream id. Clones share the same tracks.
#[derive(Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self { id: id.into(), tracks }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn set_enabled(&self, kind: TrackKind, enabled: bool) {
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
        }
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracks: Vec<(&str, TrackKind, bool)> = self.tracks.iter().map(|t| (t.id(), t.kind(), t.enabled())).collect();
        f.debug_struct("MediaStream").field("id", &self.id).field("tracks", &tracks).finish()
    }
}

/// Which devices a call asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self { audio: true, video: true }
    }
}

/// Local capture devices.
#[async_trait::async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire a local stream.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError`] when the device is missing, busy or denied.
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError>;
}

/// One peer-to-peer connection to a remote participant.
///
/// `create_offer` and `accept_offer` set the local description before
/// returning the SDP to relay.
#[async_trait::async_trait]
pub trait PeerConnection: Send + Sync {
    /// # Errors
    ///
    /// Returns [`MediaError`] when the track cannot be attached.
    fn add_track(&self, track: Arc<dyn MediaTrack>, stream_id: &str) -> Result<(), MediaError>;

    /// # Errors
    ///
    /// Returns [`MediaError::Negotiation`] on SDP failure.
    async fn create_offer(&self) -> Result<String, MediaError>;

    /// Apply a remote offer and produce the answer SDP.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::Negotiation`] on SDP failure.
    async fn accept_offer(&self, sdp: String) -> Result<String, MediaError>;

    /// # Errors
    ///
    /// Returns [`MediaError::Negotiation`] on SDP failure.
    async fn accept_answer(&self, sdp: String) -> Result<(), MediaError>;

    /// # Errors
    ///
    /// Returns [`MediaError`] when the candidate is rejected.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;

    fn close(&self);
}

/// Builds peer connections. `events` is how the connection reports local
/// candidates and remote streams back to the call.
pub trait PeerFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns [`MediaError`] when the engine cannot create a connection.
    fn create(&self, remote_user_id: &str, events: PeerEvents) -> Result<Arc<dyn PeerConnection>, MediaError>;
}
