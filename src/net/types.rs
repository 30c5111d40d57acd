//! Shared wire-protocol DTOs for the client/backend boundary.
//!
//! DESIGN
//! ======
//! These types mirror backend payloads (camelCase JSON) so persisted
//! documents, HTTP responses and transport events all decode through the same
//! definitions.

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;

use serde::{Deserialize, Serialize};

/// Whether the identity belongs to a throwaway guest or a registered account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    #[default]
    Guest,
    Registered,
}

/// Permission level of a user in the shared space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Member,
    Host,
    Admin,
}

/// The local user's profile as returned by `/api/users/{id}/profile`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Backend user identifier.
    pub id: String,
    /// Name shown to other participants.
    pub display_name: String,
    pub account_type: AccountType,
    pub role: Role,
    /// Creation timestamp as an RFC 3339 string.
    pub created_at: String,
    /// Avatar image URL, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Free-form profile text, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

/// A geographic coordinate on the shared map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

impl Position {
    #[must_use]
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// One connected remote session in the roster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Transport session identifier; changes when the user reconnects.
    pub session_id: String,
    /// Stable user identifier.
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub position: Position,
    #[serde(default)]
    pub is_moving: bool,
    #[serde(default)]
    pub role: Role,
}

/// A roster broadcast. Identity fields are optional because move and
/// re-announce broadcasts may omit them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantUpdate {
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub position: Position,
    #[serde(default)]
    pub is_moving: bool,
    #[serde(default)]
    pub role: Option<Role>,
}

impl From<Participant> for ParticipantUpdate {
    fn from(p: Participant) -> Self {
        Self {
            session_id: p.session_id,
            user_id: Some(p.user_id),
            display_name: Some(p.display_name),
            avatar_url: p.avatar_url,
            position: p.position,
            is_moving: p.is_moving,
            role: Some(p.role),
        }
    }
}

/// A point of interest users can gather at.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poi {
    pub id: String,
    pub name: String,
    pub position: Position,
    /// Server-confirmed occupancy, adjusted optimistically by the client.
    pub participant_count: u32,
    pub max_participants: u32,
    /// User ids of the occupants.
    #[serde(default)]
    pub participants: Vec<String>,
}

impl Poi {
    /// True when no further participant may join.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.participant_count >= self.max_participants
    }

    #[must_use]
    pub fn lists(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }
}

// =============================================================================
// CALL SIGNALING
// =============================================================================

/// Display metadata for a call participant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallParticipantMeta {
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Logical signaling operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

/// A trickled ICE candidate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

/// Body of a signaling message, tagged by `kind`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SignalBody {
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate(IceCandidate),
}

impl SignalBody {
    #[must_use]
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Offer { .. } => SignalKind::Offer,
            Self::Answer { .. } => SignalKind::Answer,
            Self::IceCandidate(_) => SignalKind::IceCandidate,
        }
    }
}

/// A point-to-point signaling message relayed by the transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalPayload {
    pub poi_id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub body: SignalBody,
}
