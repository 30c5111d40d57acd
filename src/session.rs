//! Client session coordinator.
//!
//! SYSTEM CONTEXT
//! ==============
//! Owns the identity cache, presence store and call manager, and is the only
//! place where they meet. User intents arrive as method calls, server pushes
//! arrive through `handle_event`, and outgoing intents leave through the
//! shared `Transport`.
//!
//! DESIGN
//! ======
//! Cross-component rules live here and nowhere else:
//! - leaving a POI whose call is live leaves the call
//! - moving to another POI leaves the previous call before the new one can start
//! - leave intents are always sent (fail open); join intents only after the
//!   store accepted the join (fail closed)
//!
//! Store mutations happen synchronously under `&mut self`. Call work that
//! suspends (device acquisition, negotiation) is handed back as a `'static`
//! future over the shared [`CallSessionManager`], so the session stays free
//! for `leave_call` and further events while devices are pending.

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, info, warn};

use crate::cache::{Authority, ReconcileOutcome};
use crate::call::media::{MediaDevices, PeerFactory};
use crate::call::{CallError, CallSessionManager};
use crate::config::ClientConfig;
use crate::error::ErrorCode;
use crate::identity::IdentityCache;
use crate::net::transport::{Transport, TransportEvent};
use crate::net::types::{CallParticipantMeta, Identity, Poi, Position};
use crate::presence::{MembershipReconcile, PresenceStore};
use crate::storage::{Storage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no local identity")]
    NoIdentity,
    #[error("not in a POI")]
    NotInPoi,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Call(#[from] CallError),
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NoIdentity => "E_SESSION_NO_IDENTITY",
            Self::NotInPoi => "E_SESSION_NOT_IN_POI",
            Self::Storage(e) => e.error_code(),
            Self::Call(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.retryable(),
            Self::Call(e) => e.retryable(),
            Self::NoIdentity | Self::NotInPoi => false,
        }
    }
}

/// Deferred call work produced by [`ClientSession::apply_event`]. Failures
/// are logged by the task itself.
pub type EventTask = BoxFuture<'static, ()>;

/// What app-start reconciliation did.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapReport {
    /// `None` when no identity was cached.
    pub identity: Option<ReconcileOutcome<Identity>>,
    pub membership: MembershipReconcile,
}

pub struct ClientSession {
    config: ClientConfig,
    storage: Arc<dyn Storage>,
    transport: Arc<dyn Transport>,
    identity: IdentityCache,
    presence: PresenceStore,
    calls: Arc<CallSessionManager>,
}

impl ClientSession {
    pub fn new(
        config: ClientConfig,
        storage: Arc<dyn Storage>,
        transport: Arc<dyn Transport>,
        media: Arc<dyn MediaDevices>,
        peers: Arc<dyn PeerFactory>,
    ) -> Self {
        let calls = Arc::new(CallSessionManager::new(Arc::clone(&transport), media, peers, config.media));
        Self {
            identity: IdentityCache::open(Arc::clone(&storage)),
            presence: PresenceStore::with_storage(Arc::clone(&storage)),
            config,
            storage,
            transport,
            calls,
        }
    }

    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.current()
    }

    #[must_use]
    pub fn presence(&self) -> &PresenceStore {
        &self.presence
    }

    /// The shared call manager. Clone the `Arc` to drive calls without
    /// borrowing the session.
    #[must_use]
    pub fn calls(&self) -> &Arc<CallSessionManager> {
        &self.calls
    }

    /// Load persisted state and reconcile it against the backend.
    ///
    /// Subscriptions taken on the presence store before this call are stale
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] when the presence document exists
    /// but cannot be decoded.
    pub async fn bootstrap<P, Q>(&mut self, profiles: &P, pois: &Q) -> Result<BootstrapReport, SessionError>
    where
        P: Authority<Identity> + ?Sized,
        Q: Authority<Poi> + ?Sized,
    {
        self.identity = IdentityCache::open(Arc::clone(&self.storage));
        self.presence = PresenceStore::restore(Arc::clone(&self.storage))?;

        let identity = self.identity.reconcile(profiles).await;
        let Some(user_id) = self.identity.user_id().map(str::to_owned) else {
            if identity.is_some() {
                info!("identity cleared by backend; dropping presence");
                self.presence = PresenceStore::with_storage(Arc::clone(&self.storage));
            } else if self.presence.current_user_poi().is_some() {
                info!("membership without identity; resetting presence");
                self.presence.reset();
            }
            return Ok(BootstrapReport { identity, membership: MembershipReconcile::NoMembership });
        };

        let membership = self.presence.reconcile_membership(pois, &user_id).await;
        match &membership {
            MembershipReconcile::Confirmed(poi_id) => self.send_join(poi_id),
            MembershipReconcile::NotListed(poi_id) | MembershipReconcile::Absent(poi_id) => self.send_leave(poi_id),
            MembershipReconcile::Kept { .. } | MembershipReconcile::NoMembership => {}
        }
        Ok(BootstrapReport { identity, membership })
    }

    /// Persist the profile returned by first profile creation.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] if the identity cannot be persisted.
    pub fn create_identity(&mut self, identity: Identity) -> Result<(), SessionError> {
        info!(user_id = %identity.id, "identity created");
        self.identity.create(identity)?;
        Ok(())
    }

    /// Join `poi_id`, leaving the current POI (and its call) if different.
    ///
    /// Returns `false` when the POI refused the join locally; nothing is sent.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoIdentity`] without an identity.
    pub fn join_poi(&mut self, poi_id: &str) -> Result<bool, SessionError> {
        let user_id = self.require_user()?;
        if self.presence.current_user_poi() == Some(poi_id) {
            return Ok(true);
        }
        let outcome = self.presence.join_poi_with_auto_leave(poi_id, &user_id);
        if !outcome.joined {
            info!(%poi_id, "join refused locally");
            return Ok(false);
        }
        if self.calls.poi_id().is_some_and(|call_poi| call_poi != poi_id) {
            self.calls.leave_call();
        }
        if let Some(left) = &outcome.left {
            self.send_leave(left);
        }
        self.send_join(poi_id);
        Ok(true)
    }

    /// Leave `poi_id`. The leave intent is sent even when the store had no
    /// record of the membership. Returns whether the store held it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoIdentity`] without an identity.
    pub fn leave_poi(&mut self, poi_id: &str) -> Result<bool, SessionError> {
        let user_id = self.require_user()?;
        Ok(self.leave_poi_as(poi_id, &user_id))
    }

    /// Leave whatever POI is held. With no pointer the server is still asked
    /// to drop this session from any POI.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoIdentity`] without an identity.
    pub fn leave_current_poi(&mut self) -> Result<(), SessionError> {
        let user_id = self.require_user()?;
        let Some(poi_id) = self.presence.current_user_poi().map(str::to_owned) else {
            self.calls.leave_call();
            if let Err(e) = self.transport.leave_current_poi() {
                warn!(error = %e, code = e.error_code(), "leave-current intent not sent");
            }
            return Ok(());
        };
        self.leave_poi_as(&poi_id, &user_id);
        Ok(())
    }

    /// Record call intent for the current POI and return the initialization.
    ///
    /// The returned future owns its handle on the call manager; awaiting it
    /// does not borrow the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotInPoi`] without a membership.
    pub fn begin_call(&self) -> Result<BoxFuture<'static, Result<(), CallError>>, SessionError> {
        let user_id = self.require_user()?;
        let poi_id = self.presence.current_user_poi().ok_or(SessionError::NotInPoi)?;
        self.calls.join_poi_call(poi_id, &user_id);
        let calls = Arc::clone(&self.calls);
        Ok(async move { calls.initialize_call().await }.boxed())
    }

    /// Start (or join) the call of the current POI.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotInPoi`] without a membership and
    /// [`SessionError::Call`] when initialization fails.
    pub async fn start_call(&self) -> Result<(), SessionError> {
        self.begin_call()?.await?;
        Ok(())
    }

    pub fn leave_call(&self) {
        self.calls.leave_call();
    }

    pub fn toggle_audio(&self) -> bool {
        self.calls.toggle_audio()
    }

    pub fn toggle_video(&self) -> bool {
        self.calls.toggle_video()
    }

    pub fn move_avatar(&self, position: Position) {
        if let Err(e) = self.transport.move_avatar(position) {
            warn!(error = %e, code = e.error_code(), "move intent not sent");
        }
    }

    /// Apply one push event from the transport and run any call work it
    /// produced to completion.
    pub async fn handle_event(&mut self, event: TransportEvent) {
        if let Some(task) = self.apply_event(event) {
            task.await;
        }
    }

    /// Apply one push event to the stores. Call work (signaling, new call
    /// participants, automatic call start) is returned instead of awaited.
    #[must_use = "dropping the task skips its call work"]
    pub fn apply_event(&mut self, event: TransportEvent) -> Option<EventTask> {
        debug!(event = event.name(), "transport event");
        let own_user = self.identity.user_id().map(str::to_owned);
        let is_own = |user_id: &str| own_user.as_deref() == Some(user_id);

        match event {
            TransportEvent::ParticipantJoined(update) => {
                if !update.user_id.as_deref().is_some_and(is_own) {
                    self.presence.add_or_update_participant(update);
                }
                None
            }
            TransportEvent::ParticipantLeft { session_id } => {
                self.presence.remove_participant(&session_id);
                None
            }
            TransportEvent::PositionUpdated { session_id, position, is_moving } => {
                self.presence.update_position(&session_id, position, is_moving);
                None
            }
            TransportEvent::PoiUpdated(poi) => {
                self.presence.upsert_poi(poi);
                None
            }
            TransportEvent::PoiDeleted { poi_id } => {
                let held = self.presence.current_user_poi() == Some(poi_id.as_str());
                self.presence.remove_poi(&poi_id);
                if let Some(user_id) = own_user.as_deref().filter(|_| held) {
                    info!(%poi_id, "current POI deleted; leaving");
                    self.leave_poi_as(&poi_id, user_id);
                } else if self.calls.poi_id().as_deref() == Some(poi_id.as_str()) {
                    self.calls.leave_call();
                }
                None
            }
            TransportEvent::JoinRejected { poi_id, reason } => {
                info!(%poi_id, reason = reason.as_deref().unwrap_or("unspecified"), "join rejected by server");
                if self.calls.poi_id().as_deref() == Some(poi_id.as_str()) {
                    self.calls.leave_call();
                }
                if let Some(user_id) = own_user.as_deref() {
                    self.presence.reject_join(&poi_id, user_id);
                }
                None
            }
            TransportEvent::CallOffer(payload)
            | TransportEvent::CallAnswer(payload)
            | TransportEvent::IceCandidate(payload) => {
                let calls = Arc::clone(&self.calls);
                Some(
                    async move {
                        let kind = payload.body.kind();
                        if let Err(e) = calls.handle_signal(payload).await {
                            warn!(?kind, error = %e, code = e.error_code(), "signal handling failed");
                        }
                    }
                    .boxed(),
                )
            }
            TransportEvent::CallParticipantJoined { poi_id, user_id, display_name, avatar_url } => {
                let local_user = own_user.as_deref()?;
                if is_own(&user_id) {
                    return None;
                }
                let in_poi = self.presence.current_user_poi() == Some(poi_id.as_str());
                let auto_start = in_poi && self.config.auto_join_calls;
                if auto_start && self.calls.poi_id().is_none() {
                    self.calls.join_poi_call(&poi_id, local_user);
                }
                if self.calls.poi_id().as_deref() != Some(poi_id.as_str()) {
                    debug!(%poi_id, %user_id, "participant for a call we are not in");
                    return None;
                }
                let calls = Arc::clone(&self.calls);
                let meta = CallParticipantMeta { display_name, avatar_url };
                Some(
                    async move {
                        if let Err(e) = calls.add_participant(&user_id, meta).await {
                            warn!(%user_id, error = %e, code = e.error_code(), "call participant not connected");
                        }
                        if auto_start {
                            match calls.initialize_call().await {
                                Ok(()) => {}
                                Err(e @ (CallError::NoPendingCall | CallError::Superseded)) => {
                                    debug!(%poi_id, error = %e, "automatic call start overtaken by leave");
                                }
                                Err(e) => {
                                    warn!(%poi_id, error = %e, code = e.error_code(), "automatic call start failed");
                                }
                            }
                        }
                    }
                    .boxed(),
                )
            }
            TransportEvent::CallParticipantLeft { poi_id, user_id } => {
                if self.calls.poi_id().as_deref() == Some(poi_id.as_str()) {
                    self.calls.remove_participant(&user_id);
                }
                None
            }
        }
    }

    /// Leave the call and drop in-memory state. Persisted documents are kept
    /// so the next start can restore and reconcile them.
    pub fn shutdown(&mut self) {
        self.calls.leave_call();
        self.presence = PresenceStore::with_storage(Arc::clone(&self.storage));
        info!("session shut down");
    }

    fn require_user(&self) -> Result<String, SessionError> {
        self.identity.user_id().map(str::to_owned).ok_or(SessionError::NoIdentity)
    }

    fn leave_poi_as(&mut self, poi_id: &str, user_id: &str) -> bool {
        if self.calls.poi_id().as_deref() == Some(poi_id) {
            self.calls.leave_call();
        }
        let held = self.presence.leave_poi(poi_id, user_id);
        self.send_leave(poi_id);
        held
    }

    fn send_join(&self, poi_id: &str) {
        if let Err(e) = self.transport.join_poi(poi_id) {
            warn!(%poi_id, error = %e, code = e.error_code(), "join intent not sent");
        }
    }

    fn send_leave(&self, poi_id: &str) {
        if let Err(e) = self.transport.leave_poi(poi_id) {
            warn!(%poi_id, error = %e, code = e.error_code(), "leave intent not sent");
        }
    }
}
