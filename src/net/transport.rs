//! Push-channel boundary consumed by the presence store and call manager.
//!
//! SYSTEM CONTEXT
//! ==============
//! The concrete socket client (reconnect, backoff, queueing while offline)
//! lives outside this crate. Here it is a trait for the outgoing surface plus
//! the decoded event set it delivers. Events are applied in delivery order.

#[cfg(test)]
#[path = "transport_test.rs"]
mod transport_test;

use serde::{Deserialize, Serialize};

use super::types::{ParticipantUpdate, Poi, Position, SignalKind, SignalPayload};
use crate::error::ErrorCode;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("transport send failed: {0}")]
    Send(String),
}

impl ErrorCode for TransportError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Closed => "E_TRANSPORT_CLOSED",
            Self::Send(_) => "E_TRANSPORT_SEND",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Send(_))
    }
}

/// Outgoing half of the shared realtime connection.
///
/// Calls are fire-and-forget: the implementation queues while disconnected.
pub trait Transport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// # Errors
    ///
    /// Returns [`TransportError`] when the message could not be queued.
    fn join_poi(&self, poi_id: &str) -> Result<(), TransportError>;

    /// # Errors
    ///
    /// Returns [`TransportError`] when the message could not be queued.
    fn leave_poi(&self, poi_id: &str) -> Result<(), TransportError>;

    /// Ask the server to remove this session from whatever POI it holds.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the message could not be queued.
    fn leave_current_poi(&self) -> Result<(), TransportError>;

    /// # Errors
    ///
    /// Returns [`TransportError`] when the message could not be queued.
    fn send_signal(&self, kind: SignalKind, payload: SignalPayload) -> Result<(), TransportError>;

    /// # Errors
    ///
    /// Returns [`TransportError`] when the message could not be queued.
    fn move_avatar(&self, position: Position) -> Result<(), TransportError>;
}

/// Events delivered by the transport, decoded from `{"type": ..., ...}` JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransportEvent {
    ParticipantJoined(ParticipantUpdate),
    #[serde(rename_all = "camelCase")]
    ParticipantLeft { session_id: String },
    #[serde(rename_all = "camelCase")]
    PositionUpdated { session_id: String, position: Position, #[serde(default)] is_moving: bool },
    PoiUpdated(Poi),
    #[serde(rename_all = "camelCase")]
    PoiDeleted { poi_id: String },
    /// The server refused an optimistic join.
    #[serde(rename_all = "camelCase")]
    JoinRejected { poi_id: String, #[serde(default)] reason: Option<String> },
    CallOffer(SignalPayload),
    CallAnswer(SignalPayload),
    IceCandidate(SignalPayload),
    #[serde(rename_all = "camelCase")]
    CallParticipantJoined {
        poi_id: String,
        user_id: String,
        display_name: String,
        #[serde(default)]
        avatar_url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    CallParticipantLeft { poi_id: String, user_id: String },
}

impl TransportEvent {
    /// Decode one event from its JSON text form.
    ///
    /// # Errors
    ///
    /// Returns the serde error for unknown event types or malformed payloads.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Short name for log fields.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ParticipantJoined(_) => "participantJoined",
            Self::ParticipantLeft { .. } => "participantLeft",
            Self::PositionUpdated { .. } => "positionUpdated",
            Self::PoiUpdated(_) => "poiUpdated",
            Self::PoiDeleted { .. } => "poiDeleted",
            Self::JoinRejected { .. } => "joinRejected",
            Self::CallOffer(_) => "callOffer",
            Self::CallAnswer(_) => "callAnswer",
            Self::IceCandidate(_) => "iceCandidate",
            Self::CallParticipantJoined { .. } => "callParticipantJoined",
            Self::CallParticipantLeft { .. } => "callParticipantLeft",
        }
    }
}
