//! Presence store: remote roster, POIs, and the local membership pointer.
//!
//! SYSTEM CONTEXT
//! ==============
//! Transport events and user intents both land here as synchronous
//! mutations. The store never talks to the transport; the session
//! coordinator sends join/leave intents after the store has decided.
//!
//! DESIGN
//! ======
//! `pois` and `current_user_poi` are persisted together as one document on
//! every change to either. Restoring one without the other is exactly the
//! desync this store exists to prevent: the roster says "present" while the
//! client says "absent" and no leave is ever sent.
//!
//! Join is fail-closed (a locally full POI refuses), leave is fail-open (a
//! leave for a POI we cannot see still clears the pointer).

pub mod roster;

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::{Authority, Reconciliation, reconcile_with};
use crate::error::ErrorCode;
use crate::net::types::{Participant, ParticipantUpdate, Poi, Position};
use crate::storage::{Storage, StorageError, load_json, save_json};
use roster::Roster;

/// Storage key of the presence document.
pub const PRESENCE_KEY: &str = "presence";

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// The persisted layout: `{pois, currentUserPOI}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    #[serde(default)]
    pub pois: Vec<Poi>,
    #[serde(rename = "currentUserPOI", default)]
    pub current_user_poi: Option<String>,
}

/// Change notifications for observers (UI, coordinator logging).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PresenceChange {
    /// The membership pointer moved. Emitted once per transition.
    Membership { previous: Option<String>, current: Option<String> },
    /// POI data changed (count, roster, or the POI appeared/disappeared).
    Poi(String),
    Roster,
}

/// Result of [`PresenceStore::join_poi_with_auto_leave`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinOutcome {
    pub joined: bool,
    /// POI that was left as part of the transition.
    pub left: Option<String>,
}

/// Result of [`PresenceStore::reconcile_membership`].
#[derive(Clone, Debug, PartialEq)]
pub enum MembershipReconcile {
    /// No pointer to reconcile.
    NoMembership,
    /// The backend still lists the user; POI data refreshed.
    Confirmed(String),
    /// The POI exists but no longer lists the user; pointer cleared.
    NotListed(String),
    /// The POI is gone; removed locally and pointer cleared.
    Absent(String),
    /// The fetch failed; nothing changed.
    Kept { poi_id: String, reason: String },
}

pub struct PresenceStore {
    roster: Roster,
    pois: BTreeMap<String, Poi>,
    current_user_poi: Option<String>,
    storage: Option<Arc<dyn Storage>>,
    changes: broadcast::Sender<PresenceChange>,
}

impl Default for PresenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceStore {
    /// An empty, unpersisted store.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { roster: Roster::new(), pois: BTreeMap::new(), current_user_poi: None, storage: None, changes }
    }

    /// An empty store that persists to `storage`.
    #[must_use]
    pub fn with_storage(storage: Arc<dyn Storage>) -> Self {
        let mut store = Self::new();
        store.storage = Some(storage);
        store
    }

    /// Rebuild the store from the persisted `{pois, currentUserPOI}` document.
    ///
    /// An undecodable document restores as empty; it is overwritten by the
    /// next persisted change.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the document exists but cannot be read.
    pub fn restore(storage: Arc<dyn Storage>) -> Result<Self, StorageError> {
        let snapshot = match load_json::<PresenceSnapshot>(storage.as_ref(), PRESENCE_KEY) {
            Ok(snapshot) => snapshot.unwrap_or_default(),
            Err(e @ StorageError::Json { .. }) => {
                warn!(error = %e, code = e.error_code(), "presence document undecodable; starting empty");
                PresenceSnapshot::default()
            }
            Err(e) => return Err(e),
        };
        let mut store = Self::with_storage(storage);
        store.apply_snapshot(snapshot);
        Ok(store)
    }

    /// The persistable part of the store.
    #[must_use]
    pub fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot { pois: self.pois.values().cloned().collect(), current_user_poi: self.current_user_poi.clone() }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceChange> {
        self.changes.subscribe()
    }

    /// Drop all state and persist the empty snapshot.
    pub fn reset(&mut self) {
        let previous = self.current_user_poi.take();
        self.roster.clear();
        self.pois.clear();
        self.persist();
        self.emit(PresenceChange::Roster);
        if previous.is_some() {
            self.emit(PresenceChange::Membership { previous, current: None });
        }
    }

    // =========================================================================
    // ROSTER
    // =========================================================================

    pub fn add_or_update_participant(&mut self, update: ParticipantUpdate) -> bool {
        let applied = self.roster.upsert(update);
        if applied {
            self.emit(PresenceChange::Roster);
        }
        applied
    }

    pub fn remove_participant(&mut self, session_id: &str) -> Option<Participant> {
        let removed = self.roster.remove(session_id);
        if removed.is_some() {
            self.emit(PresenceChange::Roster);
        }
        removed
    }

    pub fn update_position(&mut self, session_id: &str, position: Position, is_moving: bool) -> bool {
        let applied = self.roster.update_position(session_id, position, is_moving);
        if applied {
            self.emit(PresenceChange::Roster);
        }
        applied
    }

    #[must_use]
    pub fn participant(&self, session_id: &str) -> Option<&Participant> {
        self.roster.get(session_id)
    }

    #[must_use]
    pub fn participant_by_user(&self, user_id: &str) -> Option<&Participant> {
        self.roster.get_by_user(user_id)
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.roster.iter()
    }

    // =========================================================================
    // POIS
    // =========================================================================

    #[must_use]
    pub fn poi(&self, poi_id: &str) -> Option<&Poi> {
        self.pois.get(poi_id)
    }

    pub fn pois(&self) -> impl Iterator<Item = &Poi> {
        self.pois.values()
    }

    #[must_use]
    pub fn current_user_poi(&self) -> Option<&str> {
        self.current_user_poi.as_deref()
    }

    /// Apply authoritative POI data from the server.
    pub fn upsert_poi(&mut self, poi: Poi) {
        let id = poi.id.clone();
        self.pois.insert(id.clone(), poi);
        self.persist();
        self.emit(PresenceChange::Poi(id));
    }

    /// Forget a POI deleted upstream. The membership pointer is left for the
    /// caller to clear through [`Self::leave_poi`] so a leave intent is sent.
    pub fn remove_poi(&mut self, poi_id: &str) -> Option<Poi> {
        let removed = self.pois.remove(poi_id)?;
        self.persist();
        self.emit(PresenceChange::Poi(poi_id.to_owned()));
        Some(removed)
    }

    // =========================================================================
    // MEMBERSHIP
    // =========================================================================

    /// Optimistically join `poi_id`. Returns `false` without side effects if
    /// the POI is unknown, full, or the user already holds another POI.
    pub fn join_poi(&mut self, poi_id: &str, user_id: &str) -> bool {
        if self.current_user_poi.as_deref() == Some(poi_id) {
            return true;
        }
        if let Some(current) = &self.current_user_poi {
            debug!(%poi_id, %current, "join refused while holding another POI");
            return false;
        }
        if !self.can_join(poi_id) {
            return false;
        }
        self.occupy(poi_id, user_id);
        self.current_user_poi = Some(poi_id.to_owned());
        self.persist();
        self.emit(PresenceChange::Poi(poi_id.to_owned()));
        self.emit(PresenceChange::Membership { previous: None, current: Some(poi_id.to_owned()) });
        true
    }

    /// Leave the held POI (if different) and join `poi_id` as one transition.
    ///
    /// Capacity is checked before anything changes; observers see a single
    /// `Membership { previous: Some(old), current: Some(new) }`.
    pub fn join_poi_with_auto_leave(&mut self, poi_id: &str, user_id: &str) -> JoinOutcome {
        let previous = self.current_user_poi.clone();
        if previous.as_deref() == Some(poi_id) {
            return JoinOutcome { joined: true, left: None };
        }
        if !self.can_join(poi_id) {
            return JoinOutcome { joined: false, left: None };
        }
        if let Some(old) = &previous {
            self.vacate(old, user_id);
        }
        self.occupy(poi_id, user_id);
        self.current_user_poi = Some(poi_id.to_owned());
        self.persist();
        if let Some(old) = &previous {
            self.emit(PresenceChange::Poi(old.clone()));
        }
        self.emit(PresenceChange::Poi(poi_id.to_owned()));
        self.emit(PresenceChange::Membership { previous: previous.clone(), current: Some(poi_id.to_owned()) });
        JoinOutcome { joined: true, left: previous }
    }

    /// Optimistically leave `poi_id`. Safe for POIs that no longer exist
    /// locally: the pointer is still cleared. Returns whether the pointer
    /// referred to `poi_id`.
    pub fn leave_poi(&mut self, poi_id: &str, user_id: &str) -> bool {
        let was_member = self.current_user_poi.as_deref() == Some(poi_id);
        let vacated = self.vacate(poi_id, user_id);
        if was_member {
            self.current_user_poi = None;
        }
        if !(vacated || was_member) {
            return false;
        }
        self.persist();
        if vacated {
            self.emit(PresenceChange::Poi(poi_id.to_owned()));
        }
        if was_member {
            self.emit(PresenceChange::Membership { previous: Some(poi_id.to_owned()), current: None });
        }
        was_member
    }

    /// Roll back an optimistic join the server refused.
    pub fn reject_join(&mut self, poi_id: &str, user_id: &str) -> bool {
        info!(%poi_id, "server rejected join; rolling back");
        self.leave_poi(poi_id, user_id)
    }

    /// Check a restored membership pointer against the authoritative POI.
    pub async fn reconcile_membership<A>(&mut self, authority: &A, user_id: &str) -> MembershipReconcile
    where
        A: Authority<Poi> + ?Sized,
    {
        let Some(poi_id) = self.current_user_poi.clone() else {
            return MembershipReconcile::NoMembership;
        };
        match reconcile_with(authority, &poi_id).await {
            Reconciliation::Confirmed(poi) if poi.lists(user_id) => {
                self.upsert_poi(poi);
                MembershipReconcile::Confirmed(poi_id)
            }
            Reconciliation::Confirmed(poi) => {
                self.upsert_poi(poi);
                self.clear_pointer(&poi_id);
                MembershipReconcile::NotListed(poi_id)
            }
            Reconciliation::Absent => {
                self.remove_poi(&poi_id);
                self.clear_pointer(&poi_id);
                MembershipReconcile::Absent(poi_id)
            }
            Reconciliation::Unavailable { reason } => {
                warn!(%poi_id, %reason, "membership reconciliation unavailable; keeping pointer");
                MembershipReconcile::Kept { poi_id, reason }
            }
        }
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn apply_snapshot(&mut self, snapshot: PresenceSnapshot) {
        self.pois = snapshot.pois.into_iter().map(|p| (p.id.clone(), p)).collect();
        self.current_user_poi = snapshot.current_user_poi;
    }

    fn can_join(&self, poi_id: &str) -> bool {
        match self.pois.get(poi_id) {
            None => {
                debug!(%poi_id, "join refused for unknown POI");
                false
            }
            Some(poi) if poi.is_full() => {
                debug!(%poi_id, count = poi.participant_count, max = poi.max_participants, "join refused: POI full");
                false
            }
            Some(_) => true,
        }
    }

    fn occupy(&mut self, poi_id: &str, user_id: &str) {
        if let Some(poi) = self.pois.get_mut(poi_id) {
            poi.participant_count = poi.participant_count.saturating_add(1);
            if !poi.lists(user_id) {
                poi.participants.push(user_id.to_owned());
            }
        }
    }

    /// Decrement and unlist when the user is counted in `poi_id`.
    fn vacate(&mut self, poi_id: &str, user_id: &str) -> bool {
        let counted_by_pointer = self.current_user_poi.as_deref() == Some(poi_id);
        let Some(poi) = self.pois.get_mut(poi_id) else {
            return false;
        };
        if !(counted_by_pointer || poi.lists(user_id)) {
            return false;
        }
        poi.participant_count = poi.participant_count.saturating_sub(1);
        poi.participants.retain(|p| p != user_id);
        true
    }

    fn clear_pointer(&mut self, poi_id: &str) {
        if self.current_user_poi.as_deref() == Some(poi_id) {
            self.current_user_poi = None;
            self.persist();
            self.emit(PresenceChange::Membership { previous: Some(poi_id.to_owned()), current: None });
        }
    }

    fn persist(&self) {
        let Some(storage) = &self.storage else {
            return;
        };
        if let Err(e) = save_json(storage.as_ref(), PRESENCE_KEY, &self.snapshot()) {
            warn!(error = %e, code = e.error_code(), "presence snapshot not persisted");
        }
    }

    fn emit(&self, change: PresenceChange) {
        // Sending only fails when nobody is subscribed.
        if self.changes.send(change).is_err() {
            debug!("no presence subscribers");
        }
    }
}
