//! Session Sync Simulator
//!
//! Runs several peers against an in-memory loopback room and drives a scripted
//! scenario through them, then logs what every peer ended up seeing.
//!
//! # Scenario
//!
//! 1. All peers join and onboard (hello / mic-state bursts)
//! 2. One peer mutes
//! 3. The first and the last peer start screen sharing at the same time
//! 4. The last peer drops without a disconnect event
//! 5. Wait for the reconciliation sweep to evict it
//!
//! # Environment
//!
//! - `SYNC_SIM_PEERS` - number of peers (default 3, minimum 2)
//! - `SYNC_SIM_LOSS` - data-channel loss probability 0.0..1.0 (default 0)
//! - `SYNC_SIM_SEED` - RNG seed for loss (default 7)
//! - `SYNC_PORTAL_URL`, `SYNC_PORTAL_TOKEN`, `SYNC_ROOM` - optional portal
//!   preflight: fetch media credentials before simulating
//! - every `SYNC_*` timing variable understood by `SyncConfig`

#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use common::identity::{default_device_id_path, DeviceIdentity};
use common::portal::{PortalClient, PortalConfig};
use common::secret::SecretString;
use session_sync::clock::TokioClock;
use session_sync::observability::metrics::init_metrics_recorder;
use session_sync::sdk::loopback::{JoinOptions, LoopbackRoom};
use session_sync::{SessionActor, SessionActorHandle, SyncConfig, SyncError, ViewUpdate};
use sync_protocol::Sid;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_PEERS: usize = 3;
const DEFAULT_SEED: u64 = 7;

/// Time for onboarding bursts to finish.
const ONBOARD_WAIT: Duration = Duration::from_secs(4);
/// Time for screen-share claims to settle.
const SHARE_WAIT: Duration = Duration::from_secs(2);
/// Time for the sweep to notice a silent drop.
const EVICTION_WAIT: Duration = Duration::from_secs(12);

struct Peer {
    name: String,
    handle: SessionActorHandle,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting session sync simulator");

    let config = SyncConfig::from_env().context("Failed to load configuration")?;
    let peers = env_parse("SYNC_SIM_PEERS", DEFAULT_PEERS)?.max(2);
    let loss = env_parse("SYNC_SIM_LOSS", 0.0_f64)?.clamp(0.0, 1.0);
    let seed = env_parse("SYNC_SIM_SEED", DEFAULT_SEED)?;

    info!(
        peers,
        loss,
        seed,
        reconcile_interval = ?config.reconcile_interval,
        "Configuration loaded successfully"
    );

    let prometheus_handle = init_metrics_recorder().map_err(|e| anyhow!(e))?;

    portal_preflight().await;

    let shutdown = CancellationToken::new();
    let room = if loss > 0.0 {
        LoopbackRoom::with_loss(loss, seed)
    } else {
        LoopbackRoom::new()
    };

    let mut cast = Vec::with_capacity(peers);
    for i in 0..peers {
        cast.push(join_peer(&room, i, &config, &shutdown));
    }
    watch_updates(&cast);

    tokio::select! {
        result = run_scenario(&room, &cast) => result?,
        _ = signal::ctrl_c() => {
            info!("Received Ctrl-C, stopping simulation");
        }
    }

    for peer in &cast {
        if let Err(e) = peer.handle.leave().await {
            debug!(peer = %peer.name, error = %e, "Peer already gone");
        }
    }
    shutdown.cancel();
    for peer in cast {
        if let Err(e) = peer.task.await {
            warn!(peer = %peer.name, error = %e, "Session task failed");
        }
    }

    info!(metrics = %prometheus_handle.render(), "Final metrics");
    info!("Simulator shutdown complete");
    Ok(())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}

/// Trade the device identity for media credentials, if a portal is
/// configured. The simulation itself always runs on the loopback room.
async fn portal_preflight() {
    let Ok(base_url) = std::env::var("SYNC_PORTAL_URL") else {
        return;
    };
    let token = std::env::var("SYNC_PORTAL_TOKEN").unwrap_or_default();
    let room = std::env::var("SYNC_ROOM").unwrap_or_else(|_| "sim".to_string());

    let identity = match DeviceIdentity::load_or_create(&default_device_id_path()) {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "Could not read device id, using an ephemeral one");
            DeviceIdentity::ephemeral()
        }
    };

    let client = match PortalClient::new(PortalConfig::new(base_url, SecretString::from(token))) {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "Portal client unavailable");
            return;
        }
    };

    match client
        .fetch_media_credentials(&room, &identity.device_id, &identity.session_id)
        .await
    {
        Ok(credentials) => info!(
            room = %room,
            media_url = %credentials.media_url,
            is_host = credentials.is_host,
            "Portal issued media credentials"
        ),
        Err(e) => warn!(
            room = %room,
            error = %e,
            notice = %e.user_message(),
            "Portal preflight failed"
        ),
    }
}

fn join_peer(
    room: &LoopbackRoom,
    index: usize,
    config: &SyncConfig,
    shutdown: &CancellationToken,
) -> Peer {
    let name = format!("peer-{index}");
    let identity = DeviceIdentity::ephemeral();
    let (session, events) = room.join_with(
        &identity.session_id,
        JoinOptions {
            name: Some(name.clone()),
            ..JoinOptions::default()
        },
    );
    let cancel = shutdown.child_token();
    let (handle, task) = SessionActor::spawn(
        session,
        events,
        config.clone(),
        Arc::new(TokioClock::new()),
        cancel.clone(),
    );
    info!(peer = %name, sid = %handle.local_sid(), "Peer joined");
    Peer {
        name,
        handle,
        cancel,
        task,
    }
}

/// Log the first peer's view updates as they happen.
fn watch_updates(cast: &[Peer]) {
    let Some(observer) = cast.first() else {
        return;
    };
    let mut updates = observer.handle.subscribe();
    let name = observer.name.clone();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(ViewUpdate::Speaking { .. }) => {}
                Ok(update) => debug!(peer = %name, update = ?update, "View update"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(peer = %name, skipped, "View updates lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn run_scenario(room: &LoopbackRoom, cast: &[Peer]) -> anyhow::Result<()> {
    let (Some(first), Some(second), Some(last)) = (cast.first(), cast.get(1), cast.last()) else {
        return Err(anyhow!("Simulation needs at least two peers"));
    };

    info!("Onboarding");
    tokio::time::sleep(ONBOARD_WAIT).await;

    info!(peer = %second.name, "Muting");
    second.handle.set_mic_enabled(false).await?;

    info!(first = %first.name, last = %last.name, "Starting concurrent screen shares");
    let (first_share, last_share) = tokio::join!(
        first.handle.start_screen_share(false),
        last.handle.start_screen_share(false)
    );
    info!(
        first = ?first_share.as_ref().err().map(SyncError::user_message),
        last = ?last_share.as_ref().err().map(SyncError::user_message),
        "Screen share requests settled (None means started)"
    );
    tokio::time::sleep(SHARE_WAIT).await;

    info!(peer = %last.name, "Dropping peer without a disconnect event");
    room.drop_silently(last.handle.local_sid());
    last.cancel.cancel();
    tokio::time::sleep(EVICTION_WAIT).await;

    let remaining: Vec<&Peer> = cast.iter().filter(|p| !p.cancel.is_cancelled()).collect();
    let mut winners = Vec::new();
    let mut rosters = Vec::new();
    for peer in &remaining {
        let state = peer.handle.get_state().await?;
        for tile in &state.participants {
            info!(
                peer = %peer.name,
                sid = %tile.sid,
                name = %tile.display_name,
                local = tile.is_local,
                muted = ?tile.muted,
                confidence = ?tile.confidence,
                "Tile"
            );
        }
        info!(
            peer = %peer.name,
            share = ?state.local_share,
            active_screen = ?state.active_screen,
            screen_winner = ?state.screen_winner,
            "Peer view"
        );
        winners.push(state.screen_winner);
        rosters.push(state.participants.into_iter().map(|t| t.sid).collect::<Vec<Sid>>());
    }

    let agreed_winner = winners.windows(2).all(|w| matches!(w, [a, b] if a == b));
    let agreed_roster = rosters.windows(2).all(|w| matches!(w, [a, b] if a == b));
    if agreed_winner && agreed_roster {
        info!(peers = remaining.len(), "All peers converged");
    } else {
        warn!(agreed_winner, agreed_roster, "Peers did not converge");
    }
    Ok(())
}
