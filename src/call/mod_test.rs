use super::*;
use super::media::MediaTrack;
use crate::doubles::{MockMedia, MockPeerFactory, MockTransport};
use crate::net::types::SignalKind;

// "m" sits between "a" (who offers to us) and "z" (whom we offer to).
const LOCAL: &str = "m";

struct Rig {
    manager: CallSessionManager,
    transport: Arc<MockTransport>,
    media: Arc<MockMedia>,
    peers: Arc<MockPeerFactory>,
}

fn rig_with(media: Arc<MockMedia>) -> Rig {
    let transport = MockTransport::new();
    let peers = MockPeerFactory::new();
    let manager = CallSessionManager::new(transport.clone(), media.clone(), peers.clone(), MediaConstraints::default());
    Rig { manager, transport, media, peers }
}

fn rig() -> Rig {
    rig_with(MockMedia::new())
}

fn fresh_snapshot() -> CallSnapshot {
    rig().manager.snapshot()
}

fn meta(name: &str) -> CallParticipantMeta {
    CallParticipantMeta { display_name: name.to_owned(), avatar_url: None }
}

fn signal(from: &str, body: SignalBody) -> SignalPayload {
    SignalPayload { poi_id: "p1".to_owned(), from_user_id: from.to_owned(), to_user_id: LOCAL.to_owned(), body }
}

fn candidate(n: u16) -> IceCandidate {
    IceCandidate { candidate: format!("candidate:{n}"), sdp_mid: Some("0".to_owned()), sdp_mline_index: Some(n) }
}

async fn active_rig(participants: &[&str]) -> Rig {
    let rig = rig();
    rig.manager.join_poi_call("p1", LOCAL);
    for user in participants {
        rig.manager.add_participant(user, meta(user)).await.unwrap();
    }
    rig.manager.initialize_call().await.unwrap();
    rig
}

// =============================================================
// lifecycle
// =============================================================

#[tokio::test]
async fn initialize_without_pending_call_fails() {
    let rig = rig();
    assert_eq!(rig.manager.initialize_call().await, Err(CallError::NoPendingCall));
    assert_eq!(rig.media.acquisitions(), 0);
}

#[tokio::test]
async fn join_records_intent_without_touching_devices() {
    let rig = rig();
    rig.manager.join_poi_call("p1", LOCAL);
    let snap = rig.manager.snapshot();
    assert_eq!(snap.state, CallState::Pending);
    assert_eq!(snap.poi_id.as_deref(), Some("p1"));
    assert!(snap.session_id.is_some());
    assert_eq!(rig.media.acquisitions(), 0);
}

#[tokio::test]
async fn initialize_links_every_known_participant() {
    let rig = active_rig(&["z", "a"]).await;

    let snap = rig.manager.snapshot();
    assert_eq!(snap.state, CallState::Active);
    assert_eq!(snap.links, vec!["a".to_owned(), "z".to_owned()]);
    assert!(snap.has_local_stream);
    assert_eq!(rig.media.acquisitions(), 1);
    assert_eq!(rig.peers.latest("z").tracks(), vec!["audio-1".to_owned(), "video-1".to_owned()]);

    // Only the smaller id offers.
    let offers = rig.transport.signals(SignalKind::Offer);
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].to_user_id, "z");
    assert_eq!(offers[0].from_user_id, LOCAL);
}

#[tokio::test]
async fn initialize_when_active_is_a_no_op() {
    let rig = active_rig(&["z"]).await;
    assert_eq!(rig.manager.initialize_call().await, Ok(()));
    assert_eq!(rig.media.acquisitions(), 1);
    assert_eq!(rig.peers.created().len(), 1);
}

#[tokio::test]
async fn concurrent_initialize_acquires_media_once() {
    let (media, gate) = MockMedia::gated();
    let rig = rig_with(media);
    rig.manager.join_poi_call("p1", LOCAL);
    rig.manager.add_participant("z", meta("z")).await.unwrap();

    let (first, second, ()) = tokio::join!(rig.manager.initialize_call(), rig.manager.initialize_call(), async {
        while rig.media.acquisitions() == 0 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();
    });

    assert_eq!(first, Ok(()));
    assert_eq!(second, Ok(()));
    assert_eq!(rig.media.acquisitions(), 1);
    assert_eq!(rig.peers.created().len(), 1);
    assert_eq!(rig.manager.state(), CallState::Active);
}

#[tokio::test]
async fn leave_during_initialization_releases_resumed_attempt() {
    let (media, gate) = MockMedia::gated();
    let rig = rig_with(media);
    rig.manager.join_poi_call("p1", LOCAL);
    rig.manager.add_participant("z", meta("z")).await.unwrap();

    let (result, ()) = tokio::join!(rig.manager.initialize_call(), async {
        while rig.media.acquisitions() == 0 {
            tokio::task::yield_now().await;
        }
        rig.manager.leave_call();
        gate.notify_one();
    });

    assert_eq!(result, Err(CallError::Superseded));
    assert!(rig.media.tracks().iter().all(|t| t.is_stopped()));
    assert!(rig.peers.created().is_empty());
    assert_eq!(rig.manager.snapshot(), fresh_snapshot());
}

#[tokio::test]
async fn rejoin_after_leave_is_an_independent_session() {
    let rig = active_rig(&["z"]).await;
    let first = rig.manager.snapshot();
    rig.manager.leave_call();
    assert!(rig.media.tracks().iter().all(|t| t.is_stopped()));
    assert!(rig.peers.latest("z").is_closed());

    rig.manager.join_poi_call("p1", LOCAL);
    rig.manager.add_participant("z", meta("z")).await.unwrap();
    rig.manager.initialize_call().await.unwrap();
    let second = rig.manager.snapshot();

    assert_eq!(rig.media.acquisitions(), 2);
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(CallSnapshot { session_id: None, ..first }, CallSnapshot { session_id: None, ..second });
    assert!(!rig.media.track("audio-2").is_stopped());
}

#[tokio::test]
async fn leave_call_restores_fresh_state() {
    let rig = active_rig(&["z", "a"]).await;
    rig.manager.toggle_audio();
    rig.manager.toggle_video();

    rig.manager.leave_call();

    assert_eq!(rig.manager.snapshot(), fresh_snapshot());
    assert!(rig.peers.created().iter().all(|p| p.is_closed()));
    assert!(rig.manager.local_stream().is_none());
}

#[tokio::test]
async fn device_failure_tears_down_to_idle() {
    let rig = rig_with(MockMedia::failing(MediaError::PermissionDenied));
    rig.manager.join_poi_call("p1", LOCAL);
    rig.manager.add_participant("z", meta("z")).await.unwrap();

    let result = rig.manager.initialize_call().await;

    assert_eq!(result, Err(CallError::Media(MediaError::PermissionDenied)));
    assert_eq!(rig.manager.snapshot(), fresh_snapshot());
    assert_eq!(rig.manager.initialize_call().await, Err(CallError::NoPendingCall));
}

#[tokio::test]
async fn negotiation_failure_during_initialize_releases_media() {
    let rig = rig();
    rig.peers.fail_negotiation_with("z");
    rig.manager.join_poi_call("p1", LOCAL);
    rig.manager.add_participant("z", meta("z")).await.unwrap();

    let result = rig.manager.initialize_call().await;

    assert!(matches!(result, Err(CallError::Media(MediaError::Negotiation(_)))));
    assert_eq!(rig.manager.state(), CallState::Idle);
    assert!(rig.media.tracks().iter().all(|t| t.is_stopped()));
    assert!(rig.peers.latest("z").is_closed());
}

#[tokio::test]
async fn joining_another_poi_leaves_the_current_call() {
    let rig = active_rig(&["z"]).await;
    rig.manager.join_poi_call("p1", LOCAL);
    assert_eq!(rig.manager.state(), CallState::Active);

    rig.manager.join_poi_call("p2", LOCAL);

    let snap = rig.manager.snapshot();
    assert_eq!(snap.state, CallState::Pending);
    assert_eq!(snap.poi_id.as_deref(), Some("p2"));
    assert!(snap.links.is_empty());
    assert!(rig.media.tracks().iter().all(|t| t.is_stopped()));
}

#[tokio::test]
async fn teardown_reports_ending_to_reentrant_callers() {
    let media = MockMedia::new();
    let manager = Arc::new(CallSessionManager::new(
        MockTransport::new(),
        media.clone(),
        MockPeerFactory::new(),
        MediaConstraints::default(),
    ));
    manager.join_poi_call("p1", LOCAL);
    manager.initialize_call().await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let observed = Arc::clone(&seen);
    let weak = Arc::downgrade(&manager);
    media.track("audio-1").on_stop(move || {
        if let Some(manager) = weak.upgrade() {
            observed.lock().unwrap().push((manager.state(), manager.initialize_call().now_or_never()));
        }
    });

    manager.leave_call();

    assert_eq!(*seen.lock().unwrap(), vec![(CallState::Ending, Some(Err(CallError::Ending)))]);
    assert_eq!(manager.state(), CallState::Idle);
}

// =============================================================
// negotiation races
// =============================================================

#[tokio::test]
async fn participant_removed_mid_offer_is_skipped() {
    let rig = rig();
    let gate = rig.peers.gate_negotiation_with("y");
    rig.manager.join_poi_call("p1", LOCAL);
    rig.manager.add_participant("y", meta("y")).await.unwrap();
    rig.manager.add_participant("z", meta("z")).await.unwrap();

    let (result, ()) = tokio::join!(rig.manager.initialize_call(), async {
        rig.peers.negotiating("y").await;
        rig.manager.remove_participant("y");
        gate.notify_one();
    });

    assert_eq!(result, Ok(()));
    let snap = rig.manager.snapshot();
    assert_eq!(snap.state, CallState::Active);
    assert_eq!(snap.links, vec!["z".to_owned()]);
    assert!(snap.has_local_stream);
    assert!(rig.peers.latest("y").is_closed());
    assert!(!rig.peers.latest("z").is_closed());
    assert!(rig.media.tracks().iter().all(|t| !t.is_stopped()));
    let offered: Vec<String> = rig.transport.signals(SignalKind::Offer).into_iter().map(|o| o.to_user_id).collect();
    assert_eq!(offered, vec!["z".to_owned()]);
    assert_eq!(rig.manager.initialize_call().await, Ok(()));
}

#[tokio::test]
async fn leave_mid_offer_releases_everything() {
    let rig = rig();
    let gate = rig.peers.gate_negotiation_with("z");
    rig.manager.join_poi_call("p1", LOCAL);
    rig.manager.add_participant("z", meta("z")).await.unwrap();

    let (result, ()) = tokio::join!(rig.manager.initialize_call(), async {
        rig.peers.negotiating("z").await;
        rig.manager.leave_call();
        gate.notify_one();
    });

    assert_eq!(result, Err(CallError::Superseded));
    assert_eq!(rig.manager.snapshot(), fresh_snapshot());
    assert!(rig.media.tracks().iter().all(|t| t.is_stopped()));
    assert!(rig.peers.latest("z").is_closed());
    assert!(rig.transport.signals(SignalKind::Offer).is_empty());
}

#[tokio::test]
async fn buffered_offerer_removed_mid_answer_is_skipped() {
    let rig = rig();
    let gate = rig.peers.gate_negotiation_with("a");
    rig.manager.join_poi_call("p1", LOCAL);
    rig.manager.handle_signal(signal("a", SignalBody::Offer { sdp: "sdp-a".to_owned() })).await.unwrap();

    let (result, ()) = tokio::join!(rig.manager.initialize_call(), async {
        rig.peers.negotiating("a").await;
        rig.manager.remove_participant("a");
        gate.notify_one();
    });

    assert_eq!(result, Ok(()));
    let snap = rig.manager.snapshot();
    assert_eq!(snap.state, CallState::Active);
    assert!(snap.links.is_empty());
    assert!(!snap.participants.contains_key("a"));
    assert!(rig.peers.latest("a").is_closed());
    assert!(rig.transport.signals(SignalKind::Answer).is_empty());
}

#[tokio::test]
async fn participant_removed_while_connecting_keeps_call_active() {
    let rig = active_rig(&["y"]).await;
    let gate = rig.peers.gate_negotiation_with("z");

    let (result, ()) = tokio::join!(rig.manager.add_participant("z", meta("z")), async {
        rig.peers.negotiating("z").await;
        rig.manager.remove_participant("z");
        gate.notify_one();
    });

    assert_eq!(result, Ok(()));
    let snap = rig.manager.snapshot();
    assert_eq!(snap.state, CallState::Active);
    assert_eq!(snap.links, vec!["y".to_owned()]);
    assert!(rig.peers.latest("z").is_closed());
    assert!(!rig.peers.latest("y").is_closed());
}

// =============================================================
// toggles
// =============================================================

#[tokio::test]
async fn toggles_mutate_tracks_in_place() {
    let rig = active_rig(&[]).await;

    assert!(!rig.manager.toggle_audio());
    assert!(!rig.media.track("audio-1").enabled());
    assert!(rig.media.track("video-1").enabled());

    assert!(!rig.manager.toggle_video());
    assert!(!rig.media.track("video-1").enabled());

    assert!(rig.manager.toggle_audio());
    assert!(rig.media.track("audio-1").enabled());
    assert_eq!(rig.media.acquisitions(), 1);
}

#[tokio::test]
async fn toggle_before_initialize_applies_to_acquired_tracks() {
    let rig = rig();
    rig.manager.join_poi_call("p1", LOCAL);
    assert!(!rig.manager.toggle_video());

    rig.manager.initialize_call().await.unwrap();

    assert!(!rig.media.track("video-1").enabled());
    assert!(rig.media.track("audio-1").enabled());
    assert!(!rig.manager.snapshot().video_enabled);
}

// =============================================================
// participants
// =============================================================

#[tokio::test]
async fn participant_added_while_active_is_linked_immediately() {
    let rig = active_rig(&[]).await;

    rig.manager.add_participant("z", meta("Zed")).await.unwrap();
    rig.manager.add_participant("a", meta("Ann")).await.unwrap();

    let snap = rig.manager.snapshot();
    assert_eq!(snap.links, vec!["a".to_owned(), "z".to_owned()]);
    assert_eq!(snap.participants.get("z"), Some(&meta("Zed")));
    let offers = rig.transport.signals(SignalKind::Offer);
    assert_eq!(offers.iter().map(|o| o.to_user_id.as_str()).collect::<Vec<_>>(), vec!["z"]);
}

#[tokio::test]
async fn participant_for_idle_call_is_ignored() {
    let rig = rig();
    rig.manager.add_participant("z", meta("z")).await.unwrap();
    assert_eq!(rig.manager.snapshot(), fresh_snapshot());
}

#[tokio::test]
async fn negotiation_failure_drops_only_that_link() {
    let rig = active_rig(&["z1"]).await;
    rig.peers.fail_negotiation_with("z2");

    let result = rig.manager.add_participant("z2", meta("z2")).await;

    assert!(matches!(result, Err(CallError::Media(MediaError::Negotiation(_)))));
    let snap = rig.manager.snapshot();
    assert_eq!(snap.state, CallState::Active);
    assert_eq!(snap.links, vec!["z1".to_owned()]);
    assert!(rig.peers.latest("z2").is_closed());
    assert!(!rig.peers.latest("z1").is_closed());
}

#[tokio::test]
async fn remove_participant_closes_only_that_link() {
    let rig = active_rig(&["z", "a"]).await;

    rig.manager.remove_participant("z");

    let snap = rig.manager.snapshot();
    assert_eq!(snap.links, vec!["a".to_owned()]);
    assert!(!snap.participants.contains_key("z"));
    assert!(rig.peers.latest("z").is_closed());
    assert!(!rig.peers.latest("a").is_closed());
}

// =============================================================
// signaling
// =============================================================

#[tokio::test]
async fn offer_before_media_is_buffered_then_answered() {
    let rig = rig();
    rig.manager.join_poi_call("p1", LOCAL);
    rig.manager.handle_signal(signal("a", SignalBody::Offer { sdp: "sdp-a".to_owned() })).await.unwrap();
    assert!(rig.peers.created().is_empty());

    rig.manager.initialize_call().await.unwrap();

    let peer = rig.peers.latest("a");
    assert_eq!(peer.remote_sdp().as_deref(), Some("sdp-a"));
    let answers = rig.transport.signals(SignalKind::Answer);
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].to_user_id, "a");
    assert!(rig.manager.snapshot().participants.contains_key("a"));
    assert!(rig.transport.signals(SignalKind::Offer).is_empty());
}

#[tokio::test]
async fn ice_candidates_wait_for_remote_description() {
    let rig = active_rig(&["z"]).await;
    let peer = rig.peers.latest("z");

    rig.manager.handle_signal(signal("z", SignalBody::IceCandidate(candidate(1)))).await.unwrap();
    assert!(peer.candidates().is_empty());

    rig.manager.handle_signal(signal("z", SignalBody::Answer { sdp: "answer-z".to_owned() })).await.unwrap();
    assert_eq!(peer.remote_sdp().as_deref(), Some("answer-z"));
    assert_eq!(peer.candidates(), vec![candidate(1)]);

    rig.manager.handle_signal(signal("z", SignalBody::IceCandidate(candidate(2)))).await.unwrap();
    assert_eq!(peer.candidates(), vec![candidate(1), candidate(2)]);
}

#[tokio::test]
async fn candidates_from_non_participants_are_dropped() {
    let rig = active_rig(&["z"]).await;

    rig.manager.handle_signal(signal("q", SignalBody::IceCandidate(candidate(1)))).await.unwrap();

    assert!(lock(&rig.manager.core.inner).pending_candidates.is_empty());
    assert!(rig.peers.latest("z").candidates().is_empty());
}

#[tokio::test]
async fn candidates_after_buffered_offer_reach_the_answering_link() {
    let rig = rig();
    rig.manager.join_poi_call("p1", LOCAL);
    rig.manager.handle_signal(signal("a", SignalBody::Offer { sdp: "sdp-a".to_owned() })).await.unwrap();
    rig.manager.handle_signal(signal("a", SignalBody::IceCandidate(candidate(3)))).await.unwrap();

    rig.manager.initialize_call().await.unwrap();

    assert_eq!(rig.peers.latest("a").candidates(), vec![candidate(3)]);
    assert!(lock(&rig.manager.core.inner).pending_candidates.is_empty());
}

#[tokio::test]
async fn offer_while_active_creates_link_and_answers() {
    let rig = active_rig(&[]).await;

    rig.manager.handle_signal(signal("a", SignalBody::Offer { sdp: "sdp-a".to_owned() })).await.unwrap();

    assert_eq!(rig.manager.snapshot().links, vec!["a".to_owned()]);
    assert_eq!(rig.transport.signals(SignalKind::Answer).len(), 1);
}

#[tokio::test]
async fn signals_for_another_call_are_ignored() {
    let rig = active_rig(&[]).await;
    let mut stray = signal("a", SignalBody::Offer { sdp: "x".to_owned() });
    stray.poi_id = "elsewhere".to_owned();
    rig.manager.handle_signal(stray).await.unwrap();

    let mut misrouted = signal("a", SignalBody::Offer { sdp: "x".to_owned() });
    misrouted.to_user_id = "someone-else".to_owned();
    rig.manager.handle_signal(misrouted).await.unwrap();

    assert!(rig.peers.created().is_empty());
}

#[tokio::test]
async fn peer_events_stop_after_link_close() {
    let rig = active_rig(&["z"]).await;
    let peer = rig.peers.latest("z");

    peer.events.remote_stream(MediaStream::new("remote-z", Vec::new()));
    assert_eq!(rig.manager.snapshot().remote_streams, vec!["z".to_owned()]);
    peer.events.local_candidate(candidate(7));
    assert_eq!(rig.transport.signals(SignalKind::IceCandidate).len(), 1);

    rig.manager.remove_participant("z");
    peer.events.remote_stream(MediaStream::new("remote-z", Vec::new()));
    peer.events.local_candidate(candidate(8));

    assert!(rig.manager.snapshot().remote_streams.is_empty());
    assert_eq!(rig.transport.signals(SignalKind::IceCandidate).len(), 1);
    assert!(!peer.events.is_open());
}
