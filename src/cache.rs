//! Locally persisted values reconciled against an authoritative backend.
//!
//! DESIGN
//! ======
//! One fetch yields one of three outcomes and each has a fixed effect on the
//! cache:
//! - confirmed: the fetched value replaces the cached one
//! - absent:    the backend has no such id, so the cache and its dependents are cleared
//! - unavailable: the fetch failed, so the cached value is kept as last-known-good
//!
//! `reconcile_with` classifies; `ReconciledCache` applies. The presence store
//! reuses the classifier for membership-on-reload.
//!
//! TRADE-OFFS
//! ==========
//! Availability is preferred over freshness: a backend outage never logs a
//! user out. There are no retries here; callers decide when to try again.

#[cfg(test)]
#[path = "cache_test.rs"]
mod tests;

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::ErrorCode;
use crate::net::api::ApiError;
use crate::net::types::{Identity, Poi};
use crate::storage::{Storage, StorageError, load_json, save_json};

/// Values that carry their own authoritative id.
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for Identity {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for Poi {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Authoritative source for `T`. `Ok(None)` means "confirmed absent".
#[async_trait::async_trait]
pub trait Authority<T>: Send + Sync {
    /// Fetch the authoritative value for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the backend could not answer.
    async fn fetch(&self, id: &str) -> Result<Option<T>, ApiError>;
}

/// Classification of one authoritative fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation<T> {
    Confirmed(T),
    Absent,
    Unavailable { reason: String },
}

/// Fetch `id` once and classify the answer.
///
/// A value whose id differs from the requested one is classified as
/// unavailable: it proves nothing about the cached entity.
pub async fn reconcile_with<T, A>(authority: &A, id: &str) -> Reconciliation<T>
where
    T: Keyed + Send,
    A: Authority<T> + ?Sized,
{
    match authority.fetch(id).await {
        Ok(Some(value)) if value.key() == id => Reconciliation::Confirmed(value),
        Ok(Some(value)) => Reconciliation::Unavailable {
            reason: format!("backend returned id {} for {id}", value.key()),
        },
        Ok(None) => Reconciliation::Absent,
        Err(e) => Reconciliation::Unavailable { reason: format!("{}: {e}", e.error_code()) },
    }
}

/// What `ReconciledCache::reconcile` did to the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome<T> {
    /// The authoritative value was saved.
    Confirmed(T),
    /// The backend reported the id absent; cache and dependents were cleared.
    Cleared,
    /// The fetch failed; the cached value is unchanged.
    Kept { reason: String },
}

/// A single persisted value stored as `{ "<key>": value }` under `key`.
pub struct ReconciledCache<T> {
    storage: Arc<dyn Storage>,
    key: String,
    dependents: Vec<String>,
    value: Option<T>,
}

impl<T> ReconciledCache<T>
where
    T: Keyed + Serialize + DeserializeOwned + Clone + Send,
{
    pub fn new(storage: Arc<dyn Storage>, key: impl Into<String>) -> Self {
        Self { storage, key: key.into(), dependents: Vec::new(), value: None }
    }

    /// Extra storage keys that are wiped together with the value on absence.
    #[must_use]
    pub fn with_dependents<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependents = keys.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the persisted value into memory and return it.
    ///
    /// Unreadable or undecodable documents load as `None`.
    pub fn load(&mut self) -> Option<T> {
        self.value = match self.read_envelope() {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %self.key, error = %e, code = e.error_code(), "cached value unreadable; treating as empty");
                None
            }
        };
        self.value.clone()
    }

    /// The in-memory value, without touching storage.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Replace the value in memory and in storage.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if encoding or the write fails. A failed write
    /// still leaves the new value in memory.
    pub fn save(&mut self, value: T) -> Result<(), StorageError> {
        let mut envelope = Map::new();
        let encoded = serde_json::to_value(&value).map_err(|source| StorageError::Json { key: self.key.clone(), source })?;
        envelope.insert(self.key.clone(), encoded);
        self.value = Some(value);
        save_json(self.storage.as_ref(), &self.key, &Value::Object(envelope))
    }

    /// Drop the value from memory and storage. Dependents are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the removal fails; memory is cleared regardless.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.value = None;
        self.storage.remove(&self.key)
    }

    /// Reconcile `id` against `authority` and apply the outcome.
    pub async fn reconcile<A>(&mut self, authority: &A, id: &str) -> ReconcileOutcome<T>
    where
        A: Authority<T> + ?Sized,
    {
        match reconcile_with(authority, id).await {
            Reconciliation::Confirmed(value) => {
                if let Err(e) = self.save(value.clone()) {
                    warn!(key = %self.key, error = %e, "confirmed value could not be persisted");
                }
                ReconcileOutcome::Confirmed(value)
            }
            Reconciliation::Absent => {
                info!(key = %self.key, %id, "backend reports value absent; clearing cache");
                if let Err(e) = self.clear() {
                    warn!(key = %self.key, error = %e, "cache clear failed");
                }
                for dep in &self.dependents {
                    if let Err(e) = self.storage.remove(dep) {
                        warn!(key = %dep, error = %e, "dependent state clear failed");
                    }
                }
                ReconcileOutcome::Cleared
            }
            Reconciliation::Unavailable { reason } => {
                warn!(key = %self.key, %id, %reason, "reconciliation unavailable; keeping cached value");
                ReconcileOutcome::Kept { reason }
            }
        }
    }

    fn read_envelope(&self) -> Result<Option<T>, StorageError> {
        let Some(mut envelope) = load_json::<Map<String, Value>>(self.storage.as_ref(), &self.key)? else {
            return Ok(None);
        };
        let Some(inner) = envelope.remove(&self.key) else {
            return Ok(None);
        };
        if inner.is_null() {
            return Ok(None);
        }
        serde_json::from_value(inner)
            .map(Some)
            .map_err(|source| StorageError::Json { key: self.key.clone(), source })
    }
}
