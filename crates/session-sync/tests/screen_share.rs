//! Integration tests for screen-share arbitration across peers.
//!
//! Every peer runs a real `SessionActor` on the loopback room, so claims,
//! releases and track publications travel the same way they would in a call.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use session_sync::clock::TokioClock;
use session_sync::screen_share::LocalShareState;
use session_sync::sdk::loopback::{JoinOptions, LoopbackRoom};
use session_sync::sdk::TrackSource;
use session_sync::{SessionActor, SessionActorHandle, SyncConfig, SyncError};
use sync_protocol::Sid;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const ORIGIN_MS: i64 = 1_700_000_000_000;

fn spawn_peer(room: &LoopbackRoom, sid: &str) -> (SessionActorHandle, JoinHandle<()>) {
    let (session, events) = room.join_with(
        sid,
        JoinOptions {
            sid: Some(Sid::from(sid)),
            name: Some(sid.to_lowercase()),
            ..JoinOptions::default()
        },
    );
    SessionActor::spawn(
        session,
        events,
        SyncConfig::default(),
        Arc::new(TokioClock::starting_at(ORIGIN_MS)),
        CancellationToken::new(),
    )
}

async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

fn is_active(state: &LocalShareState) -> bool {
    matches!(state, LocalShareState::Active { .. })
}

#[tokio::test(start_paused = true)]
async fn test_simultaneous_claims_resolve_to_larger_sid() {
    let room = LoopbackRoom::new();
    let (a1, _a_task) = spawn_peer(&room, "PA_a1");
    let (b2, _b_task) = spawn_peer(&room, "PA_b2");
    settle(500).await;

    // Same instant on both clocks: the tie goes to the larger sid.
    let (a_result, b_result) =
        tokio::join!(a1.start_screen_share(false), b2.start_screen_share(false));
    settle(200).await;

    assert!(b_result.is_ok());
    if let Err(e) = a_result {
        assert_eq!(
            e,
            SyncError::ScreenShareSuperseded {
                winner: Sid::from("PA_b2")
            }
        );
    }

    let a_state = a1.get_state().await.unwrap();
    let b_state = b2.get_state().await.unwrap();
    assert!(a_state.local_share.is_idle());
    assert!(is_active(&b_state.local_share));
    assert_eq!(a_state.screen_winner, Some(Sid::from("PA_b2")));
    assert_eq!(b_state.screen_winner, Some(Sid::from("PA_b2")));
    assert_eq!(a_state.active_screen, Some(Sid::from("PA_b2")));
    assert_eq!(b_state.active_screen, None);
}

#[tokio::test(start_paused = true)]
async fn test_three_way_start_converges_on_latest() {
    let room = LoopbackRoom::new();
    let (a, _a_task) = spawn_peer(&room, "PA_a");
    let (b, _b_task) = spawn_peer(&room, "PA_b");
    let (c, _c_task) = spawn_peer(&room, "PA_c");
    settle(500).await;

    a.start_screen_share(false).await.unwrap();
    settle(300).await;
    let _ = c.start_screen_share(true).await;
    settle(300).await;
    let _ = b.start_screen_share(false).await;
    settle(500).await;

    let winner = Some(Sid::from("PA_b"));
    let mut active = 0;
    for peer in [&a, &b, &c] {
        let state = peer.get_state().await.unwrap();
        assert_eq!(state.screen_winner, winner, "peer {}", peer.local_sid());
        if is_active(&state.local_share) {
            active += 1;
        }
    }
    assert_eq!(active, 1);
    assert_eq!(a.get_state().await.unwrap().active_screen, winner);
    assert_eq!(c.get_state().await.unwrap().active_screen, winner);
}

#[tokio::test(start_paused = true)]
async fn test_late_joiner_learns_current_sharer() {
    let room = LoopbackRoom::new();
    let (a, _a_task) = spawn_peer(&room, "PA_a");
    settle(500).await;
    a.start_screen_share(false).await.unwrap();
    settle(1_000).await;

    let (c, _c_task) = spawn_peer(&room, "PA_c");
    settle(1_000).await;

    let state = c.get_state().await.unwrap();
    assert_eq!(state.screen_winner, Some(Sid::from("PA_a")));
    assert_eq!(state.active_screen, Some(Sid::from("PA_a")));
    assert_eq!(
        room.subscription(&Sid::from("PA_c"), &Sid::from("PA_a"), TrackSource::ScreenShare),
        Some(true)
    );

    // The late joiner's own share is newer and takes over.
    c.start_screen_share(false).await.unwrap();
    settle(300).await;
    assert!(a.get_state().await.unwrap().local_share.is_idle());
    assert_eq!(
        a.get_state().await.unwrap().active_screen,
        Some(Sid::from("PA_c"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_second_start_is_rejected_while_sharing() {
    let room = LoopbackRoom::new();
    let (a, _a_task) = spawn_peer(&room, "PA_a");
    settle(500).await;

    a.start_screen_share(false).await.unwrap();
    assert_eq!(
        a.start_screen_share(false).await,
        Err(SyncError::AlreadySharing)
    );

    a.stop_screen_share().await.unwrap();
    a.stop_screen_share().await.unwrap();
    assert!(a.get_state().await.unwrap().local_share.is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_sharer_leaving_clears_view() {
    let room = LoopbackRoom::new();
    let (a, a_task) = spawn_peer(&room, "PA_a");
    let (b, _b_task) = spawn_peer(&room, "PA_b");
    settle(500).await;

    a.start_screen_share(false).await.unwrap();
    settle(200).await;
    assert_eq!(
        b.get_state().await.unwrap().active_screen,
        Some(Sid::from("PA_a"))
    );

    a.leave().await.unwrap();
    a_task.await.unwrap();
    settle(200).await;

    let state = b.get_state().await.unwrap();
    assert_eq!(state.active_screen, None);
    assert_eq!(state.screen_winner, None);
}
