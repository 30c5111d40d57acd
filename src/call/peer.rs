//! Per-remote-participant connection state and its callback handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use super::CallCore;
use super::media::{MediaStream, PeerConnection};
use crate::error::{ErrorCode, lock};
use crate::net::types::{IceCandidate, SignalBody, SignalPayload};

/// Addressing for signals on one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalRoute {
    pub poi_id: String,
    pub local_user_id: String,
    pub remote_user_id: String,
}

impl SignalRoute {
    pub(crate) fn payload(&self, body: SignalBody) -> SignalPayload {
        SignalPayload {
            poi_id: self.poi_id.clone(),
            from_user_id: self.local_user_id.clone(),
            to_user_id: self.remote_user_id.clone(),
            body,
        }
    }
}

/// Pairwise offer direction: the smaller user id offers.
#[must_use]
pub fn is_offerer(local_user_id: &str, remote_user_id: &str) -> bool {
    local_user_id < remote_user_id
}

/// One live connection owned by the call session.
pub(crate) struct PeerLink {
    pub(crate) id: u64,
    pub(crate) connection: Arc<dyn PeerConnection>,
    pub(crate) remote_description_set: bool,
    open: Arc<AtomicBool>,
}

impl PeerLink {
    pub(crate) fn new(id: u64, connection: Arc<dyn PeerConnection>, open: Arc<AtomicBool>) -> Self {
        Self { id, connection, remote_description_set: false, open }
    }

    /// Close the connection and silence its [`PeerEvents`].
    pub(crate) fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.connection.close();
    }
}

/// Callback handle given to [`super::media::PeerFactory::create`].
///
/// Every method is a no-op once the owning link has been closed or the call
/// manager dropped.
#[derive(Clone)]
pub struct PeerEvents {
    core: Weak<CallCore>,
    open: Arc<AtomicBool>,
    link_id: u64,
    route: SignalRoute,
}

impl PeerEvents {
    pub(crate) fn new(core: Weak<CallCore>, link_id: u64, route: SignalRoute) -> Self {
        Self { core, open: Arc::new(AtomicBool::new(true)), link_id, route }
    }

    pub(crate) fn open_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.open)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn remote_user_id(&self) -> &str {
        &self.route.remote_user_id
    }

    /// Relay a locally gathered ICE candidate to the remote side.
    pub fn local_candidate(&self, candidate: IceCandidate) {
        if !self.is_open() {
            debug!(remote = %self.route.remote_user_id, "candidate after link close; dropped");
            return;
        }
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let body = SignalBody::IceCandidate(candidate);
        if let Err(e) = core.transport.send_signal(body.kind(), self.route.payload(body)) {
            warn!(remote = %self.route.remote_user_id, error = %e, code = e.error_code(), "ice candidate not sent");
        }
    }

    /// Publish the remote participant's stream.
    pub fn remote_stream(&self, stream: MediaStream) {
        self.with_live_session(|inner| {
            if let Some(session) = inner.session.as_mut() {
                session.remote_streams.insert(self.route.remote_user_id.clone(), stream);
            }
        });
    }

    /// The remote participant's stream ended.
    pub fn remote_stream_removed(&self) {
        self.with_live_session(|inner| {
            if let Some(session) = inner.session.as_mut() {
                session.remote_streams.remove(&self.route.remote_user_id);
            }
        });
    }

    fn with_live_session(&self, apply: impl FnOnce(&mut super::CallInner)) {
        if !self.is_open() {
            return;
        }
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let mut inner = lock(&core.inner);
        let current = inner.links.get(&self.route.remote_user_id).map(|l| l.id);
        if current == Some(self.link_id) {
            apply(&mut *inner);
        }
    }
}
