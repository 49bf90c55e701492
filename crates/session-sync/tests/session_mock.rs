//! Session actor tests against a scripted media session.
//!
//! `MockSession` lets each test inject exactly the events and payloads it
//! needs and inspect every call the actor made in response.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use session_sync::actors::RemovalReason;
use session_sync::clock::TokioClock;
use session_sync::mic::Confidence;
use session_sync::sdk::{
    ConnectionState, MembershipSnapshot, SdkError, SdkEvent, SdkEventReceiver, TrackSource,
};
use session_sync::{SessionActor, SessionActorHandle, SyncConfig, SyncError, ViewUpdate};
use sync_protocol::{BroadcastMessage, MicStateReport, MicStateRequest, ScreenShareNotice, Sid};
use sync_test_utils::{MockSession, RecordedCall, TestParticipant, TestPublication, ViewCollector};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const ORIGIN_MS: i64 = 1_700_000_000_000;

fn spawn(
    session: &Arc<MockSession>,
    events: SdkEventReceiver,
) -> (SessionActorHandle, JoinHandle<()>) {
    SessionActor::spawn(
        Arc::<MockSession>::clone(session),
        events,
        SyncConfig::default(),
        Arc::new(TokioClock::starting_at(ORIGIN_MS)),
        CancellationToken::new(),
    )
}

async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

fn mic_state(sid: &str, ts: i64, enabled: bool) -> BroadcastMessage {
    BroadcastMessage::MicState(MicStateReport {
        sid: Sid::from(sid),
        ts,
        enabled,
        cause: None,
        n: None,
    })
}

fn claim(sid: &str, ts: i64) -> BroadcastMessage {
    BroadcastMessage::ScreenShareClaim(ScreenShareNotice {
        sid: Sid::from(sid),
        ts,
        sender: None,
    })
}

fn request_replies(session: &MockSession) -> Vec<MicStateReport> {
    session
        .sent_of_type("mic_state")
        .into_iter()
        .filter_map(|m| match m {
            BroadcastMessage::MicState(report)
                if report.cause.as_deref() == Some("mic_state_req_reply") =>
            {
                Some(report)
            }
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_older_mic_report_does_not_override_newer() {
    let (session, events) = MockSession::builder("PA_me")
        .with_remote(TestParticipant::new("PA_bob").with_unreadable_mic().build())
        .build();
    let (handle, _task) = spawn(&session, events);
    let mut view = ViewCollector::new(handle.subscribe());
    settle(10).await;

    session.deliver(&mic_state("PA_bob", ORIGIN_MS + 2_000, false), "PA_bob");
    session.deliver(&mic_state("PA_bob", ORIGIN_MS + 1_000, true), "PA_bob");
    settle(3_000).await;

    let bob = Sid::from("PA_bob");
    let state = handle.get_state().await.unwrap();
    let view_of_bob = state.participant(&bob).unwrap();
    assert_eq!(view_of_bob.muted, Some(true));
    assert_eq!(view_of_bob.confidence, Confidence::Authoritative);

    let badges = view.mic_badges(&bob);
    assert_eq!(badges.last(), Some(&(Some(true), Confidence::Authoritative)));
    assert!(!badges.iter().any(|(muted, _)| *muted == Some(false)));
}

#[tokio::test(start_paused = true)]
async fn test_malformed_payloads_are_ignored() {
    let (session, events) = MockSession::builder("PA_me")
        .with_remote(TestParticipant::new("PA_bob").with_mic(false).build())
        .build();
    let (handle, _task) = spawn(&session, events);
    settle(100).await;
    let before = handle.get_state().await.unwrap();

    session.deliver_raw(&b"{not json"[..], Some(Sid::from("PA_bob")));
    session.deliver_raw(&br#"{"type":"mystery","sid":"PA_bob"}"#[..], None);
    session.deliver_raw(&br#"{"type":"mic_state","ts":5}"#[..], None);
    settle(100).await;

    let after = handle.get_state().await.unwrap();
    assert_eq!(before.participants, after.participants);
}

#[tokio::test(start_paused = true)]
async fn test_own_echo_is_ignored() {
    let (session, events) = MockSession::builder("PA_me").build();
    let (handle, _task) = spawn(&session, events);
    settle(100).await;

    session.deliver(&claim("PA_me", ORIGIN_MS + 60_000), "PA_me");
    settle(100).await;

    let state = handle.get_state().await.unwrap();
    assert_eq!(state.screen_winner, None);
    assert_eq!(state.participants.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_departed_sender_is_not_resurrected() {
    let (session, events) = MockSession::builder("PA_me")
        .with_remote(TestParticipant::new("PA_bob").with_mic(false).build())
        .build();
    let (handle, _task) = spawn(&session, events);
    settle(500).await;
    let mut view = ViewCollector::new(handle.subscribe());

    session.disconnect_remote("PA_bob");
    settle(50).await;
    // Late traffic still in flight from the departed participant.
    session.deliver(&mic_state("PA_bob", ORIGIN_MS + 600, true), "PA_bob");
    session.deliver(&claim("PA_bob", ORIGIN_MS + 600), "PA_bob");
    settle(5_000).await;

    let state = handle.get_state().await.unwrap();
    assert!(state.participant(&Sid::from("PA_bob")).is_none());
    assert_eq!(state.screen_winner, None);
    assert_eq!(
        view.tiles_removed(),
        vec![(Sid::from("PA_bob"), RemovalReason::Disconnected)]
    );
    assert!(!view.tiles_added().contains(&Sid::from("PA_bob")));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_sender_is_adopted_from_channel() {
    let (session, events) = MockSession::builder("PA_me").build();
    let (handle, _task) = spawn(&session, events);
    settle(100).await;
    let mut view = ViewCollector::new(handle.subscribe());

    // The SDK has not announced carol yet; her broadcast arrives first.
    session.update_remote(TestParticipant::new("PA_carol").with_name("Carol").build());
    session.deliver(&mic_state("PA_carol", ORIGIN_MS + 100, true), "PA_carol");
    settle(100).await;

    let state = handle.get_state().await.unwrap();
    let view_of_carol = state.participant(&Sid::from("PA_carol")).unwrap();
    assert_eq!(view_of_carol.display_name, "Carol");
    assert_eq!(view_of_carol.muted, Some(false));
    assert_eq!(view.tiles_added(), vec![Sid::from("PA_carol")]);
    assert!(view.seen().contains(&ViewUpdate::ParticipantCount(2)));
}

#[tokio::test(start_paused = true)]
async fn test_request_reply_waits_for_local_media() {
    let (session, events) = MockSession::builder("PA_me")
        .with_remote(TestParticipant::new("PA_bob").build())
        .build();
    session.fail_local_capture(Some(SdkError::CaptureDenied("no devices".to_string())));
    let (_handle, _task) = spawn(&session, events);
    settle(10).await;

    session.deliver(
        &BroadcastMessage::MicStateReq(MicStateRequest {
            from_sid: Sid::from("PA_bob"),
            from_key: "PA_bob".to_string(),
            ts: ORIGIN_MS + 10,
            n: None,
        }),
        "PA_bob",
    );
    settle(1_000).await;
    assert!(request_replies(&session).is_empty());

    settle(700).await;
    let replies = request_replies(&session);
    assert!(!replies.is_empty());
    // No microphone could be published.
    assert!(replies.iter().all(|r| !r.enabled));
}

#[tokio::test(start_paused = true)]
async fn test_request_reply_is_prompt_when_media_ready() {
    let (session, events) = MockSession::builder("PA_me")
        .with_remote(TestParticipant::new("PA_bob").build())
        .build();
    let (handle, _task) = spawn(&session, events);
    settle(200).await;
    assert!(handle.get_state().await.unwrap().local_media_ready);

    session.deliver(
        &BroadcastMessage::MicStateReq(MicStateRequest {
            from_sid: Sid::from("PA_bob"),
            from_key: "PA_bob".to_string(),
            ts: ORIGIN_MS + 200,
            n: None,
        }),
        "PA_bob",
    );
    settle(50).await;

    let replies = request_replies(&session);
    assert!(!replies.is_empty());
    assert!(replies.iter().all(|r| r.enabled));
}

#[tokio::test(start_paused = true)]
async fn test_local_share_yields_to_newer_claim() {
    let (session, events) = MockSession::builder("PA_me")
        .with_remote(TestParticipant::new("PA_bob").build())
        .build();
    let (handle, _task) = spawn(&session, events);
    settle(200).await;

    handle.start_screen_share(false).await.unwrap();
    assert!(session
        .calls()
        .contains(&RecordedCall::PublishTrack(TrackSource::ScreenShare)));
    assert_eq!(session.sent_of_type("screen_share_claim").len(), 1);

    // An older claim loses, and bob is told so again.
    session.deliver(&claim("PA_bob", ORIGIN_MS), "PA_bob");
    settle(50).await;
    let state = handle.get_state().await.unwrap();
    assert!(!state.local_share.is_idle());
    assert_eq!(state.screen_winner, Some(Sid::from("PA_me")));
    assert_eq!(session.sent_of_type("screen_share_claim").len(), 2);

    // A newer one wins.
    session.deliver(&claim("PA_bob", ORIGIN_MS + 60_000), "PA_bob");
    settle(50).await;
    let state = handle.get_state().await.unwrap();
    assert!(state.local_share.is_idle());
    assert_eq!(state.screen_winner, Some(Sid::from("PA_bob")));
    assert!(session
        .calls()
        .contains(&RecordedCall::UnpublishTrack(TrackSource::ScreenShare)));
    assert_eq!(session.sent_of_type("screen_share_release").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_share_behind_known_newer_claim_is_superseded() {
    let (session, events) = MockSession::builder("PA_me")
        .with_remote(TestParticipant::new("PA_bob").build())
        .build();
    let (handle, _task) = spawn(&session, events);
    settle(200).await;

    // Bob's clock runs ahead of ours.
    session.deliver(&claim("PA_bob", ORIGIN_MS + 10_000), "PA_bob");
    settle(50).await;
    session.clear_calls();

    let result = handle.start_screen_share(false).await;
    assert_eq!(
        result,
        Err(SyncError::ScreenShareSuperseded {
            winner: Sid::from("PA_bob")
        })
    );

    let state = handle.get_state().await.unwrap();
    assert!(state.local_share.is_idle());
    assert_eq!(state.screen_winner, Some(Sid::from("PA_bob")));
    assert!(state.camera_enabled);
    assert!(session.sent_of_type("screen_share_claim").is_empty());
    assert!(!session
        .calls()
        .iter()
        .any(|c| matches!(c, RecordedCall::CreateScreenTracks { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_share_is_not_reported_as_superseded() {
    let (session, events) = MockSession::builder("PA_me")
        .with_remote(TestParticipant::new("PA_bob").build())
        .build();
    let (handle, _task) = spawn(&session, events);
    settle(200).await;

    // A stale claim that the new share beats.
    session.deliver(&claim("PA_bob", ORIGIN_MS), "PA_bob");
    session.delay_screen_capture(Duration::from_millis(500));
    settle(50).await;

    let starter = handle.clone();
    let start = tokio::spawn(async move { starter.start_screen_share(false).await });
    settle(100).await;
    handle.stop_screen_share().await.unwrap();

    let result = start.await.unwrap();
    assert!(matches!(result, Err(SyncError::MediaAcquisition(_))), "{result:?}");
    let state = handle.get_state().await.unwrap();
    assert!(state.local_share.is_idle());
    assert!(state.camera_enabled);
    assert!(session.sent_of_type("screen_share_claim").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_screen_capture_denied() {
    let (session, events) = MockSession::builder("PA_me").build();
    let (handle, _task) = spawn(&session, events);
    settle(200).await;

    session.fail_screen_capture(Some(SdkError::CaptureDenied("user cancelled".to_string())));
    let result = handle.start_screen_share(true).await;
    assert!(matches!(result, Err(SyncError::MediaAcquisition(_))));
    assert!(session.sent_of_type("screen_share_claim").is_empty());
    assert!(handle.get_state().await.unwrap().local_share.is_idle());
    assert!(handle.get_state().await.unwrap().camera_enabled);
}

#[tokio::test(start_paused = true)]
async fn test_only_latest_remote_share_is_subscribed() {
    let (session, events) = MockSession::builder("PA_me")
        .with_remote(TestParticipant::new("PA_bob").build())
        .with_remote(TestParticipant::new("PA_carol").build())
        .build();
    let (handle, _task) = spawn(&session, events);
    settle(200).await;
    let mut view = ViewCollector::new(handle.subscribe());
    session.clear_calls();

    for sid in ["PA_bob", "PA_carol"] {
        session.inject(SdkEvent::TrackPublished {
            sid: Sid::from(sid),
            publication: TestPublication::screen_share().build(),
        });
        settle(10).await;
    }

    let subscriptions: Vec<RecordedCall> = session
        .calls()
        .into_iter()
        .filter(|c| matches!(c, RecordedCall::SetSubscribed { .. }))
        .collect();
    let plan = |sid: &str, subscribed: bool| RecordedCall::SetSubscribed {
        sid: Sid::from(sid),
        source: TrackSource::ScreenShare,
        subscribed,
    };
    assert_eq!(
        subscriptions,
        vec![
            plan("PA_bob", true),
            plan("PA_bob", false),
            plan("PA_carol", true),
        ]
    );
    assert_eq!(
        view.active_screens(),
        vec![Some(Sid::from("PA_bob")), Some(Sid::from("PA_carol"))]
    );

    // Carol stops: bob's share comes back.
    session.inject(SdkEvent::TrackUnpublished {
        sid: Sid::from("PA_carol"),
        kind: session_sync::sdk::TrackKind::Video,
        source: TrackSource::ScreenShare,
    });
    settle(10).await;
    assert_eq!(
        handle.get_state().await.unwrap().active_screen,
        Some(Sid::from("PA_bob"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_silent_departure_is_evicted() {
    let (session, events) = MockSession::builder("PA_me")
        .with_remote(TestParticipant::new("PA_bob").build())
        .build();
    let (handle, _task) = spawn(&session, events);
    let mut view = ViewCollector::new(handle.subscribe());
    settle(6_000).await;

    session.drop_remote("PA_bob");
    settle(8_000).await;

    assert!(handle
        .get_state()
        .await
        .unwrap()
        .participant(&Sid::from("PA_bob"))
        .is_none());
    assert_eq!(
        view.tiles_removed(),
        vec![(Sid::from("PA_bob"), RemovalReason::Evicted)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_evicted_sharer_releases_slot_and_mic_state() {
    let bob = Sid::from("PA_bob");
    let (session, events) = MockSession::builder("PA_me")
        .with_remote(
            TestParticipant::new("PA_bob")
                .with_unreadable_mic()
                .with_publication(TestPublication::screen_share())
                .build(),
        )
        .build();
    let (handle, _task) = spawn(&session, events);
    settle(100).await;
    session.deliver(&claim("PA_bob", ORIGIN_MS + 50), "PA_bob");
    session.deliver(&mic_state("PA_bob", ORIGIN_MS + 60, false), "PA_bob");
    settle(6_000).await;

    let state = handle.get_state().await.unwrap();
    assert_eq!(state.active_screen, Some(bob.clone()));
    assert_eq!(state.screen_winner, Some(bob.clone()));
    assert_eq!(state.participant(&bob).unwrap().muted, Some(true));

    let mut view = ViewCollector::new(handle.subscribe());
    session.clear_calls();
    session.drop_remote("PA_bob");
    settle(8_000).await;

    let state = handle.get_state().await.unwrap();
    assert!(state.participant(&bob).is_none());
    assert_eq!(state.active_screen, None);
    assert_eq!(state.screen_winner, None);
    assert_eq!(view.active_screens(), vec![None]);
    assert_eq!(view.tiles_removed(), vec![(bob.clone(), RemovalReason::Evicted)]);
    assert!(!session
        .calls()
        .iter()
        .any(|c| matches!(c, RecordedCall::SetSubscribed { sid, .. } if *sid == bob)));

    // Coming back starts from nothing: the old broadcast is gone.
    session.connect(TestParticipant::new("PA_bob").with_unreadable_mic().build());
    settle(10).await;
    let state = handle.get_state().await.unwrap();
    assert_eq!(state.participant(&bob).unwrap().muted, None);
    assert_eq!(state.screen_winner, None);
}

#[tokio::test(start_paused = true)]
async fn test_unenumerable_membership_suppresses_eviction() {
    let (session, events) = MockSession::builder("PA_me")
        .with_remote(TestParticipant::new("PA_bob").build())
        .build();
    let (handle, _task) = spawn(&session, events);
    settle(6_000).await;

    session.drop_remote("PA_bob");
    session.set_membership(Some(MembershipSnapshot {
        state: ConnectionState::Connected,
        local_sid: Some(Sid::from("PA_me")),
        views: Vec::new(),
    }));
    settle(15_000).await;
    assert!(handle
        .get_state()
        .await
        .unwrap()
        .participant(&Sid::from("PA_bob"))
        .is_some());

    session.set_membership(None);
    settle(6_000).await;
    assert!(handle
        .get_state()
        .await
        .unwrap()
        .participant(&Sid::from("PA_bob"))
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn test_mute_before_media_ready_is_kept() {
    let (session, events) = MockSession::builder("PA_me").build();
    session.delay_local_capture(Duration::from_millis(1_000));
    let (handle, _task) = spawn(&session, events);
    settle(100).await;

    handle.set_mic_enabled(false).await.unwrap();
    assert!(!handle.get_state().await.unwrap().local_media_ready);
    settle(2_000).await;

    let state = handle.get_state().await.unwrap();
    assert!(state.local_media_ready);
    assert!(!state.mic_enabled);
    assert_eq!(
        state.participant(&Sid::from("PA_me")).unwrap().muted,
        Some(true)
    );

    let calls = session.calls();
    let published = calls
        .iter()
        .position(|c| *c == RecordedCall::PublishTrack(TrackSource::Microphone))
        .unwrap();
    assert!(calls[published..].contains(&RecordedCall::SetMicrophoneEnabled(false)));
    let last_mic_call = calls.iter().rev().find_map(|c| match c {
        RecordedCall::SetMicrophoneEnabled(enabled) => Some(*enabled),
        _ => None,
    });
    assert_eq!(last_mic_call, Some(false));
    let last_report = session
        .sent_of_type("mic_state")
        .into_iter()
        .last()
        .unwrap();
    assert!(matches!(last_report, BroadcastMessage::MicState(r) if !r.enabled));
}

#[tokio::test(start_paused = true)]
async fn test_zero_reconcile_interval_does_not_stall() {
    let (session, events) = MockSession::builder("PA_me")
        .with_remote(TestParticipant::new("PA_bob").build())
        .build();
    let config = SyncConfig {
        reconcile_interval: Duration::ZERO,
        ..SyncConfig::default()
    };
    let (handle, _task) = SessionActor::spawn(
        Arc::<MockSession>::clone(&session),
        events,
        config,
        Arc::new(TokioClock::starting_at(ORIGIN_MS)),
        CancellationToken::new(),
    );
    settle(500).await;

    let state = handle.get_state().await.unwrap();
    assert!(state.participant(&Sid::from("PA_bob")).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_chat_send_failure_is_reported() {
    let (session, events) = MockSession::builder("PA_me").with_name("Me").build();
    let (handle, _task) = spawn(&session, events);
    let mut view = ViewCollector::new(handle.subscribe());
    settle(100).await;

    session.fail_data(true);
    let result = handle.send_chat("hello").await;
    assert!(matches!(result, Err(SyncError::Transport(_))));
    assert!(view.chats().is_empty());

    session.fail_data(false);
    handle.send_chat("hello").await.unwrap();
    assert_eq!(view.chats(), vec![("Me".to_string(), "hello".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn test_leave_disconnects_and_closes_handle() {
    let (session, events) = MockSession::builder("PA_me").build();
    let (handle, task) = spawn(&session, events);
    settle(100).await;

    handle.leave().await.unwrap();
    task.await.unwrap();

    assert_eq!(session.calls().last(), Some(&RecordedCall::Disconnect));
    assert_eq!(handle.get_state().await, Err(SyncError::SessionClosed));
    assert_eq!(handle.set_mic_enabled(true).await, Err(SyncError::SessionClosed));
}
