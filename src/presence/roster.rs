//! Remote participant roster keyed by transport session.
//!
//! DESIGN
//! ======
//! Position broadcasts address sessions, call and profile events address
//! users. The roster keeps the session map as the source of truth and a
//! `user_id -> session_id` index beside it; neither key is ever used in place
//! of the other.

#[cfg(test)]
#[path = "roster_test.rs"]
mod roster_test;

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::net::types::{Participant, ParticipantUpdate, Position};

#[derive(Clone, Debug, Default)]
pub struct Roster {
    by_session: HashMap<String, Participant>,
    session_by_user: HashMap<String, String>,
}

impl Roster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_session.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_session.is_empty()
    }

    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<&Participant> {
        self.by_session.get(session_id)
    }

    #[must_use]
    pub fn get_by_user(&self, user_id: &str) -> Option<&Participant> {
        let session_id = self.session_by_user.get(user_id)?;
        self.by_session.get(session_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.by_session.values()
    }

    /// Insert or overlay an entry. Returns `false` when a new session arrives
    /// without a user id.
    ///
    /// A user reconnecting under a new session replaces their old entry.
    pub fn upsert(&mut self, update: ParticipantUpdate) -> bool {
        if let Some(existing) = self.by_session.get_mut(&update.session_id) {
            existing.position = update.position;
            existing.is_moving = update.is_moving;
            if let Some(name) = update.display_name {
                existing.display_name = name;
            }
            if let Some(avatar) = update.avatar_url {
                existing.avatar_url = Some(avatar);
            }
            if let Some(role) = update.role {
                existing.role = role;
            }
            if let Some(user_id) = update.user_id {
                if user_id != existing.user_id {
                    let old_user = std::mem::replace(&mut existing.user_id, user_id.clone());
                    if self.session_by_user.get(&old_user) == Some(&update.session_id) {
                        self.session_by_user.remove(&old_user);
                    }
                    self.index_user(user_id, update.session_id);
                }
            }
            return true;
        }

        let Some(user_id) = update.user_id else {
            warn!(session_id = %update.session_id, "participant without user id; ignoring");
            return false;
        };
        let participant = Participant {
            session_id: update.session_id.clone(),
            user_id: user_id.clone(),
            display_name: update.display_name.unwrap_or_default(),
            avatar_url: update.avatar_url,
            position: update.position,
            is_moving: update.is_moving,
            role: update.role.unwrap_or_default(),
        };
        self.by_session.insert(update.session_id.clone(), participant);
        self.index_user(user_id, update.session_id);
        true
    }

    /// Remove a session. The user index is only dropped if it still points here.
    pub fn remove(&mut self, session_id: &str) -> Option<Participant> {
        let removed = self.by_session.remove(session_id)?;
        if self.session_by_user.get(&removed.user_id).map(String::as_str) == Some(session_id) {
            self.session_by_user.remove(&removed.user_id);
        }
        Some(removed)
    }

    /// Last writer wins. Unknown sessions are ignored.
    pub fn update_position(&mut self, session_id: &str, position: Position, is_moving: bool) -> bool {
        let Some(entry) = self.by_session.get_mut(session_id) else {
            debug!(%session_id, "position update for unknown session");
            return false;
        };
        entry.position = position;
        entry.is_moving = is_moving;
        true
    }

    pub fn clear(&mut self) {
        self.by_session.clear();
        self.session_by_user.clear();
    }

    fn index_user(&mut self, user_id: String, session_id: String) {
        if let Some(previous) = self.session_by_user.insert(user_id, session_id.clone()) {
            if previous != session_id {
                debug!(stale_session = %previous, %session_id, "user reconnected; dropping stale session");
                self.by_session.remove(&previous);
            }
        }
    }
}
