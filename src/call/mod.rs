//! Call session manager: one live WebRTC-style call per client.
//!
//! SYSTEM CONTEXT
//! ==============
//! A call is scoped to a POI. The coordinator records intent with
//! `join_poi_call`, starts devices with `initialize_call`, and feeds roster
//! and signaling events in as they arrive from the transport.
//!
//! DESIGN
//! ======
//! State machine `Idle -> Pending -> Initializing -> Active -> Ending -> Idle`.
//! Initialization is one shared future stored on the manager: every caller
//! that arrives while it runs awaits the same attempt, so devices are
//! acquired once per session no matter how many triggers fire.
//!
//! The interior `std::sync::Mutex` is never held across an await. Each
//! suspension is followed by an epoch check; `leave_call` bumps the epoch, so
//! an attempt that resumes after a leave releases what it acquired and
//! resolves `Superseded` instead of resurrecting the call.
//!
//! ERROR HANDLING
//! ==============
//! Device or negotiation failure during initialization tears down to a
//! fresh `Idle` and then returns the error. Once active, a failing link is
//! dropped on its own; the rest of the call is untouched.
//!
//! Internally `Superseded` also reports a link that was closed or replaced
//! while negotiating. With the epoch unchanged that only skips the one
//! participant; initialization carries on.

pub mod media;
pub mod peer;

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::error::{ErrorCode, lock};
use crate::net::transport::Transport;
use crate::net::types::{CallParticipantMeta, IceCandidate, SignalBody, SignalPayload};
use media::{MediaConstraints, MediaDevices, MediaError, MediaStream, PeerConnection, PeerFactory, TrackKind};
use peer::{PeerEvents, PeerLink, SignalRoute, is_offerer};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("no pending call to initialize")]
    NoPendingCall,
    /// Returned to callers re-entering from a `close`/`stop` callback while
    /// `leave_call` tears down.
    #[error("call is ending")]
    Ending,
    #[error("call initialization superseded by leave")]
    Superseded,
    #[error(transparent)]
    Media(#[from] MediaError),
}

impl ErrorCode for CallError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NoPendingCall => "E_CALL_NO_PENDING",
            Self::Ending => "E_CALL_ENDING",
            Self::Superseded => "E_CALL_SUPERSEDED",
            Self::Media(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Ending => true,
            Self::Media(e) => e.retryable(),
            Self::NoPendingCall | Self::Superseded => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallState {
    #[default]
    Idle,
    /// Intent recorded, no devices touched.
    Pending,
    Initializing,
    Active,
    /// Teardown in progress. `leave_call` returns only after `Idle` is
    /// restored, so this is observable from `PeerConnection::close` and
    /// `MediaTrack::stop` callbacks only.
    Ending,
}

/// Read model of the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSnapshot {
    pub state: CallState,
    pub session_id: Option<u64>,
    pub poi_id: Option<String>,
    pub participants: BTreeMap<String, CallParticipantMeta>,
    /// User ids with a published remote stream, sorted.
    pub remote_streams: Vec<String>,
    /// User ids with a live peer link, sorted.
    pub links: Vec<String>,
    pub has_local_stream: bool,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

pub(crate) struct CallSession {
    session_id: u64,
    poi_id: String,
    local_user_id: String,
    participants: BTreeMap<String, CallParticipantMeta>,
    remote_streams: BTreeMap<String, MediaStream>,
    local_stream: Option<MediaStream>,
}

struct PendingOffer {
    from_user_id: String,
    sdp: String,
}

#[derive(Clone)]
struct LinkHandle {
    id: u64,
    connection: Arc<dyn PeerConnection>,
}

enum InitStep {
    Connect(String),
    Answer(PendingOffer),
    Done,
    Superseded,
}

type InitAttempt = Shared<BoxFuture<'static, Result<(), CallError>>>;

pub(crate) struct CallInner {
    state: CallState,
    /// Bumped by every teardown.
    epoch: u64,
    next_session_id: u64,
    next_link_id: u64,
    session: Option<CallSession>,
    links: HashMap<String, PeerLink>,
    pending_offers: VecDeque<PendingOffer>,
    /// Remote candidates waiting for a link with a remote description.
    pending_candidates: HashMap<String, Vec<IceCandidate>>,
    in_flight: Option<InitAttempt>,
    audio_enabled: bool,
    video_enabled: bool,
}

impl CallInner {
    fn new(constraints: MediaConstraints) -> Self {
        Self {
            state: CallState::Idle,
            epoch: 0,
            next_session_id: 0,
            next_link_id: 0,
            session: None,
            links: HashMap::new(),
            pending_offers: VecDeque::new(),
            pending_candidates: HashMap::new(),
            in_flight: None,
            audio_enabled: constraints.audio,
            video_enabled: constraints.video,
        }
    }

    /// Back to a fresh `Idle`. Counters survive so ids stay unique.
    fn reset(&mut self, constraints: MediaConstraints) {
        self.state = CallState::Idle;
        self.session = None;
        self.links.clear();
        self.pending_offers.clear();
        self.pending_candidates.clear();
        self.in_flight = None;
        self.audio_enabled = constraints.audio;
        self.video_enabled = constraints.video;
    }

    fn link_handle(&self, user_id: &str) -> Option<LinkHandle> {
        self.links.get(user_id).map(|l| LinkHandle { id: l.id, connection: Arc::clone(&l.connection) })
    }

    fn next_init_step(&mut self) -> InitStep {
        let Some(session) = self.session.as_ref() else {
            return InitStep::Superseded;
        };
        if let Some(user) = session.participants.keys().find(|u| !self.links.contains_key(*u)) {
            return InitStep::Connect(user.clone());
        }
        if let Some(offer) = self.pending_offers.pop_front() {
            return InitStep::Answer(offer);
        }
        let (session_id, poi_id) = (session.session_id, session.poi_id.clone());
        self.state = CallState::Active;
        self.in_flight = None;
        info!(session_id, %poi_id, links = self.links.len(), "call active");
        InitStep::Done
    }
}

pub(crate) struct CallCore {
    inner: Mutex<CallInner>,
    transport: Arc<dyn Transport>,
    media: Arc<dyn MediaDevices>,
    peers: Arc<dyn PeerFactory>,
    constraints: MediaConstraints,
}

impl CallCore {
    fn is_current(&self, epoch: u64) -> bool {
        lock(&self.inner).epoch == epoch
    }

    async fn initialize(self: Arc<Self>, epoch: u64) -> Result<(), CallError> {
        match self.run_initialization(epoch).await {
            Ok(()) => Ok(()),
            Err(e) if self.is_current(epoch) => {
                warn!(error = %e, code = e.error_code(), "call initialization failed; tearing down");
                self.teardown();
                Err(e)
            }
            Err(_) => {
                info!("call initialization superseded by leave");
                Err(CallError::Superseded)
            }
        }
    }

    /// Turn a link lost mid-negotiation into a skip while the call lives on.
    fn skip_lost_link<T>(&self, epoch: u64, remote: &str, result: Result<T, CallError>) -> Result<(), CallError> {
        match result {
            Ok(_) => Ok(()),
            Err(CallError::Superseded) if self.is_current(epoch) => {
                debug!(%remote, "peer link closed during negotiation; skipped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn run_initialization(self: &Arc<Self>, epoch: u64) -> Result<(), CallError> {
        let stream = self.media.acquire(self.constraints).await?;
        let adopted = {
            let mut inner = lock(&self.inner);
            let (audio, video) = (inner.audio_enabled, inner.video_enabled);
            let current = inner.epoch == epoch;
            match inner.session.as_mut() {
                Some(session) if current => {
                    stream.set_enabled(TrackKind::Audio, audio);
                    stream.set_enabled(TrackKind::Video, video);
                    session.local_stream = Some(stream.clone());
                    true
                }
                _ => false,
            }
        };
        if !adopted {
            stream.stop();
            return Err(CallError::Superseded);
        }

        loop {
            let step = {
                let mut inner = lock(&self.inner);
                if inner.epoch == epoch { inner.next_init_step() } else { InitStep::Superseded }
            };
            match step {
                InitStep::Connect(user) => {
                    let result = self.connect(epoch, &user, true).await;
                    self.skip_lost_link(epoch, &user, result)?;
                }
                InitStep::Answer(offer) => {
                    let result = self.answer_offer(epoch, &offer.from_user_id, offer.sdp).await;
                    self.skip_lost_link(epoch, &offer.from_user_id, result)?;
                }
                InitStep::Done => return Ok(()),
                InitStep::Superseded => return Err(CallError::Superseded),
            }
        }
    }

    /// Create and register a link to `remote`, offering when this side is the offerer.
    async fn connect(self: &Arc<Self>, epoch: u64, remote: &str, may_offer: bool) -> Result<LinkHandle, CallError> {
        let (route, local_stream, link_id) = {
            let mut inner = lock(&self.inner);
            if inner.epoch != epoch {
                return Err(CallError::Superseded);
            }
            let Some(session) = inner.session.as_ref() else {
                return Err(CallError::Superseded);
            };
            let route = SignalRoute {
                poi_id: session.poi_id.clone(),
                local_user_id: session.local_user_id.clone(),
                remote_user_id: remote.to_owned(),
            };
            let stream = session.local_stream.clone();
            inner.next_link_id += 1;
            (route, stream, inner.next_link_id)
        };

        let events = PeerEvents::new(Arc::downgrade(self), link_id, route.clone());
        let link = PeerLink::new(link_id, self.peers.create(remote, events.clone())?, events.open_flag());
        if let Some(stream) = &local_stream {
            for track in stream.tracks() {
                if let Err(e) = link.connection.add_track(Arc::clone(track), stream.id()) {
                    link.close();
                    return Err(e.into());
                }
            }
        }
        let handle = LinkHandle { id: link_id, connection: Arc::clone(&link.connection) };

        let replaced = {
            let mut inner = lock(&self.inner);
            let wanted = inner.epoch == epoch
                && inner.session.as_ref().is_some_and(|s| s.participants.contains_key(remote));
            if wanted { Ok(inner.links.insert(remote.to_owned(), link)) } else { Err(link) }
        };
        match replaced {
            Ok(Some(old)) => old.close(),
            Ok(None) => {}
            Err(orphan) => {
                orphan.close();
                return Err(CallError::Superseded);
            }
        }
        debug!(%remote, link_id, "peer link created");

        if may_offer && is_offerer(&route.local_user_id, remote) {
            let sdp = match handle.connection.create_offer().await {
                Ok(sdp) => sdp,
                Err(e) => {
                    self.drop_link(remote, link_id);
                    return Err(e.into());
                }
            };
            if !self.link_is_current(epoch, remote, link_id) {
                return Err(CallError::Superseded);
            }
            self.send(&route, SignalBody::Offer { sdp });
        }
        Ok(handle)
    }

    async fn answer_offer(self: &Arc<Self>, epoch: u64, remote: &str, sdp: String) -> Result<(), CallError> {
        let existing = {
            let mut inner = lock(&self.inner);
            if inner.epoch != epoch {
                return Err(CallError::Superseded);
            }
            if let Some(session) = inner.session.as_mut() {
                session.participants.entry(remote.to_owned()).or_default();
            }
            inner.link_handle(remote)
        };
        let link = match existing {
            Some(link) => link,
            None => self.connect(epoch, remote, false).await?,
        };
        let answer = match link.connection.accept_offer(sdp).await {
            Ok(answer) => answer,
            Err(e) => {
                self.drop_link(remote, link.id);
                return Err(e.into());
            }
        };
        let (route, candidates) = self.remote_description_applied(epoch, remote, link.id)?;
        self.send(&route, SignalBody::Answer { sdp: answer });
        flush_candidates(remote, &link, candidates).await;
        Ok(())
    }

    async fn accept_answer(&self, epoch: u64, remote: &str, sdp: String) -> Result<(), CallError> {
        let Some(link) = lock(&self.inner).link_handle(remote) else {
            debug!(%remote, "answer without a link; ignored");
            return Ok(());
        };
        if let Err(e) = link.connection.accept_answer(sdp).await {
            self.drop_link(remote, link.id);
            return Err(e.into());
        }
        let (_, candidates) = self.remote_description_applied(epoch, remote, link.id)?;
        flush_candidates(remote, &link, candidates).await;
        Ok(())
    }

    async fn add_remote_candidate(&self, remote: &str, candidate: IceCandidate) {
        let ready = {
            let mut inner = lock(&self.inner);
            let known = inner.links.contains_key(remote)
                || inner.pending_offers.iter().any(|o| o.from_user_id == remote)
                || inner.session.as_ref().is_some_and(|s| s.participants.contains_key(remote));
            if !known {
                debug!(%remote, "candidate from a non-participant; dropped");
                return;
            }
            let ready = inner
                .links
                .get(remote)
                .filter(|l| l.remote_description_set)
                .map(|l| LinkHandle { id: l.id, connection: Arc::clone(&l.connection) });
            if ready.is_none() {
                inner.pending_candidates.entry(remote.to_owned()).or_default().push(candidate.clone());
            }
            ready
        };
        if let Some(link) = ready {
            flush_candidates(remote, &link, vec![candidate]).await;
        }
    }

    /// Mark the link's remote description and hand back buffered candidates.
    fn remote_description_applied(
        &self,
        epoch: u64,
        remote: &str,
        link_id: u64,
    ) -> Result<(SignalRoute, Vec<IceCandidate>), CallError> {
        let mut inner = lock(&self.inner);
        if inner.epoch != epoch {
            return Err(CallError::Superseded);
        }
        let Some(session) = inner.session.as_ref() else {
            return Err(CallError::Superseded);
        };
        let route = SignalRoute {
            poi_id: session.poi_id.clone(),
            local_user_id: session.local_user_id.clone(),
            remote_user_id: remote.to_owned(),
        };
        match inner.links.get_mut(remote) {
            Some(link) if link.id == link_id => link.remote_description_set = true,
            _ => return Err(CallError::Superseded),
        }
        let candidates = inner.pending_candidates.remove(remote).unwrap_or_default();
        Ok((route, candidates))
    }

    fn link_is_current(&self, epoch: u64, remote: &str, link_id: u64) -> bool {
        let inner = lock(&self.inner);
        inner.epoch == epoch && inner.links.get(remote).is_some_and(|l| l.id == link_id)
    }

    fn drop_link(&self, remote: &str, link_id: u64) {
        let removed = {
            let mut inner = lock(&self.inner);
            if inner.links.get(remote).is_some_and(|l| l.id == link_id) {
                inner.pending_candidates.remove(remote);
                if let Some(session) = inner.session.as_mut() {
                    session.remote_streams.remove(remote);
                }
                inner.links.remove(remote)
            } else {
                None
            }
        };
        if let Some(link) = removed {
            warn!(%remote, link_id, "peer link dropped after negotiation failure");
            link.close();
        }
    }

    fn send(&self, route: &SignalRoute, body: SignalBody) {
        let kind = body.kind();
        if let Err(e) = self.transport.send_signal(kind, route.payload(body)) {
            warn!(remote = %route.remote_user_id, ?kind, error = %e, code = e.error_code(), "signal not sent");
        }
    }

    /// Close everything and return to a fresh `Idle`.
    fn teardown(&self) {
        let (links, local_stream, session_id) = {
            let mut inner = lock(&self.inner);
            if inner.state == CallState::Idle && inner.session.is_none() {
                inner.reset(self.constraints);
                return;
            }
            inner.state = CallState::Ending;
            inner.epoch += 1;
            inner.in_flight = None;
            let links: Vec<PeerLink> = inner.links.drain().map(|(_, link)| link).collect();
            let session = inner.session.as_mut();
            let session_id = session.as_ref().map(|s| s.session_id);
            let local_stream = session.and_then(|s| s.local_stream.take());
            (links, local_stream, session_id)
        };
        for link in &links {
            link.close();
        }
        if let Some(stream) = local_stream {
            stream.stop();
        }
        lock(&self.inner).reset(self.constraints);
        info!(?session_id, links = links.len(), "call left");
    }
}

async fn flush_candidates(remote: &str, link: &LinkHandle, candidates: Vec<IceCandidate>) {
    for candidate in candidates {
        if let Err(e) = link.connection.add_ice_candidate(candidate).await {
            warn!(%remote, link_id = link.id, error = %e, code = e.error_code(), "remote ice candidate rejected");
        }
    }
}

pub struct CallSessionManager {
    core: Arc<CallCore>,
}

impl CallSessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        media: Arc<dyn MediaDevices>,
        peers: Arc<dyn PeerFactory>,
        constraints: MediaConstraints,
    ) -> Self {
        let core = CallCore { inner: Mutex::new(CallInner::new(constraints)), transport, media, peers, constraints };
        Self { core: Arc::new(core) }
    }

    #[must_use]
    pub fn state(&self) -> CallState {
        lock(&self.core.inner).state
    }

    /// POI of the current session, if any.
    #[must_use]
    pub fn poi_id(&self) -> Option<String> {
        lock(&self.core.inner).session.as_ref().map(|s| s.poi_id.clone())
    }

    #[must_use]
    pub fn local_stream(&self) -> Option<MediaStream> {
        lock(&self.core.inner).session.as_ref().and_then(|s| s.local_stream.clone())
    }

    #[must_use]
    pub fn remote_stream(&self, user_id: &str) -> Option<MediaStream> {
        lock(&self.core.inner).session.as_ref().and_then(|s| s.remote_streams.get(user_id).cloned())
    }

    #[must_use]
    pub fn snapshot(&self) -> CallSnapshot {
        let inner = lock(&self.core.inner);
        let session = inner.session.as_ref();
        let mut links: Vec<String> = inner.links.keys().cloned().collect();
        links.sort();
        CallSnapshot {
            state: inner.state,
            session_id: session.map(|s| s.session_id),
            poi_id: session.map(|s| s.poi_id.clone()),
            participants: session.map(|s| s.participants.clone()).unwrap_or_default(),
            remote_streams: session.map(|s| s.remote_streams.keys().cloned().collect()).unwrap_or_default(),
            links,
            has_local_stream: session.is_some_and(|s| s.local_stream.is_some()),
            audio_enabled: inner.audio_enabled,
            video_enabled: inner.video_enabled,
        }
    }

    /// Record intent to join the call of `poi_id`. No devices are touched.
    ///
    /// Same POI while a call exists is a no-op; a different POI leaves the
    /// current call first.
    pub fn join_poi_call(&self, poi_id: &str, local_user_id: &str) {
        let (state, current) = {
            let inner = lock(&self.core.inner);
            (inner.state, inner.session.as_ref().map(|s| s.poi_id.clone()))
        };
        match (state, current) {
            (CallState::Idle, _) => {}
            (CallState::Ending, _) => {
                debug!(%poi_id, "call ending; join ignored");
                return;
            }
            (_, Some(current)) if current == poi_id => return,
            _ => self.leave_call(),
        }

        let mut inner = lock(&self.core.inner);
        if inner.state != CallState::Idle {
            return;
        }
        inner.next_session_id += 1;
        let session_id = inner.next_session_id;
        inner.session = Some(CallSession {
            session_id,
            poi_id: poi_id.to_owned(),
            local_user_id: local_user_id.to_owned(),
            participants: BTreeMap::new(),
            remote_streams: BTreeMap::new(),
            local_stream: None,
        });
        inner.state = CallState::Pending;
        info!(%poi_id, session_id, "call pending");
    }

    /// Acquire local media and connect to every known participant.
    ///
    /// Callers arriving while an attempt runs await that same attempt.
    ///
    /// # Errors
    ///
    /// [`CallError::NoPendingCall`] when idle, [`CallError::Superseded`] when
    /// the call was left mid-attempt, [`CallError::Media`] on device or
    /// negotiation failure (after teardown to `Idle`).
    pub async fn initialize_call(&self) -> Result<(), CallError> {
        let attempt = {
            let mut inner = lock(&self.core.inner);
            match inner.state {
                CallState::Idle => return Err(CallError::NoPendingCall),
                CallState::Ending => return Err(CallError::Ending),
                CallState::Active => return Ok(()),
                CallState::Initializing => inner.in_flight.clone().ok_or(CallError::Superseded)?,
                CallState::Pending => {
                    inner.state = CallState::Initializing;
                    let attempt = Arc::clone(&self.core).initialize(inner.epoch).boxed().shared();
                    inner.in_flight = Some(attempt.clone());
                    attempt
                }
            }
        };
        attempt.await
    }

    /// Add or refresh a call participant. While active, a link is created
    /// right away.
    ///
    /// # Errors
    ///
    /// Returns [`CallError`] when the new link fails; only that link is dropped.
    pub async fn add_participant(&self, user_id: &str, meta: CallParticipantMeta) -> Result<(), CallError> {
        let epoch = {
            let mut inner = lock(&self.core.inner);
            let state = inner.state;
            let Some(session) = inner.session.as_mut() else {
                debug!(%user_id, "participant for idle call ignored");
                return Ok(());
            };
            if session.local_user_id == user_id {
                return Ok(());
            }
            session.participants.insert(user_id.to_owned(), meta);
            if state != CallState::Active || inner.links.contains_key(user_id) {
                return Ok(());
            }
            inner.epoch
        };
        let result = self.core.connect(epoch, user_id, true).await;
        match self.core.skip_lost_link(epoch, user_id, result) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(%user_id, error = %e, code = e.error_code(), "could not connect to participant");
                Err(e)
            }
        }
    }

    /// Close the link to `user_id` and forget its metadata and stream.
    pub fn remove_participant(&self, user_id: &str) {
        let link = {
            let mut inner = lock(&self.core.inner);
            if let Some(session) = inner.session.as_mut() {
                session.participants.remove(user_id);
                session.remote_streams.remove(user_id);
            }
            inner.pending_candidates.remove(user_id);
            inner.pending_offers.retain(|o| o.from_user_id != user_id);
            inner.links.remove(user_id)
        };
        if let Some(link) = link {
            debug!(%user_id, link_id = link.id, "peer link closed");
            link.close();
        }
    }

    /// Apply an incoming offer, answer or ICE candidate.
    ///
    /// # Errors
    ///
    /// Returns [`CallError`] when negotiating with the sender failed; that
    /// sender's link is dropped.
    pub async fn handle_signal(&self, payload: SignalPayload) -> Result<(), CallError> {
        let SignalPayload { poi_id, from_user_id, to_user_id, body } = payload;
        let epoch = {
            let mut inner = lock(&self.core.inner);
            let Some(session) = inner.session.as_ref() else {
                debug!(%poi_id, kind = ?body.kind(), "signal without a call; ignored");
                return Ok(());
            };
            if session.poi_id != poi_id || session.local_user_id != to_user_id || from_user_id == to_user_id {
                debug!(%poi_id, kind = ?body.kind(), "signal for another call; ignored");
                return Ok(());
            }
            match inner.state {
                CallState::Idle | CallState::Ending => return Ok(()),
                CallState::Pending | CallState::Initializing => {
                    if let SignalBody::Offer { sdp } = body {
                        debug!(from = %from_user_id, "offer buffered until media is ready");
                        inner.pending_offers.push_back(PendingOffer { from_user_id, sdp });
                        return Ok(());
                    }
                }
                CallState::Active => {}
            }
            inner.epoch
        };
        let result = match body {
            SignalBody::Offer { sdp } => self.core.answer_offer(epoch, &from_user_id, sdp).await,
            SignalBody::Answer { sdp } => self.core.accept_answer(epoch, &from_user_id, sdp).await,
            SignalBody::IceCandidate(candidate) => {
                self.core.add_remote_candidate(&from_user_id, candidate).await;
                Ok(())
            }
        };
        self.core.skip_lost_link(epoch, &from_user_id, result)
    }

    /// Flip the audio flag and mute/unmute local audio tracks in place.
    pub fn toggle_audio(&self) -> bool {
        self.toggle(TrackKind::Audio)
    }

    /// Flip the video flag and enable/disable local video tracks in place.
    pub fn toggle_video(&self) -> bool {
        self.toggle(TrackKind::Video)
    }

    fn toggle(&self, kind: TrackKind) -> bool {
        let mut inner = lock(&self.core.inner);
        let flag = match kind {
            TrackKind::Audio => &mut inner.audio_enabled,
            TrackKind::Video => &mut inner.video_enabled,
        };
        *flag = !*flag;
        let enabled = *flag;
        if let Some(stream) = inner.session.as_ref().and_then(|s| s.local_stream.as_ref()) {
            stream.set_enabled(kind, enabled);
        }
        debug!(?kind, enabled, "local track toggled");
        enabled
    }

    /// Close every link, stop local tracks, and return to a fresh `Idle`.
    pub fn leave_call(&self) {
        self.core.teardown();
    }
}
