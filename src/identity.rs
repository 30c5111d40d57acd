//! Cached identity of the local user.
//!
//! SYSTEM CONTEXT
//! ==============
//! The identity is created once (first profile creation), persisted as the
//! `{identity}` document, and reconciled against the profile endpoint on app
//! start. When the backend has deleted the user, the presence document is
//! cleared with it: membership of a user that no longer exists is meaningless.

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;

use std::sync::Arc;

use crate::cache::{Authority, ReconcileOutcome, ReconciledCache};
use crate::net::types::Identity;
use crate::presence::PRESENCE_KEY;
use crate::storage::{Storage, StorageError};

/// Storage key of the identity document.
pub const IDENTITY_KEY: &str = "identity";

/// Thin wrapper giving the generic cache identity-specific entry points.
pub struct IdentityCache {
    cache: ReconciledCache<Identity>,
}

impl IdentityCache {
    /// Open the cache and load any persisted identity.
    pub fn open(storage: Arc<dyn Storage>) -> Self {
        let mut cache = ReconciledCache::new(storage, IDENTITY_KEY).with_dependents([PRESENCE_KEY]);
        cache.load();
        Self { cache }
    }

    #[must_use]
    pub fn current(&self) -> Option<&Identity> {
        self.cache.get()
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.cache.get().map(|i| i.id.as_str())
    }

    /// Store a freshly created profile.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the identity cannot be persisted.
    pub fn create(&mut self, identity: Identity) -> Result<(), StorageError> {
        self.cache.save(identity)
    }

    /// Apply an explicit profile edit. Returns `false` when there is no
    /// identity or the edit names a different user.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the edited identity cannot be persisted.
    pub fn update(&mut self, identity: Identity) -> Result<bool, StorageError> {
        if self.user_id() != Some(identity.id.as_str()) {
            return Ok(false);
        }
        self.cache.save(identity)?;
        Ok(true)
    }

    /// Forget the identity (logout).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the document cannot be removed.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.cache.clear()
    }

    /// Reconcile the cached identity, if any. `None` when nothing is cached.
    pub async fn reconcile<A>(&mut self, profiles: &A) -> Option<ReconcileOutcome<Identity>>
    where
        A: Authority<Identity> + ?Sized,
    {
        let id = self.user_id()?.to_owned();
        Some(self.cache.reconcile(profiles, &id).await)
    }
}
