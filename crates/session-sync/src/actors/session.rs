//! `SessionActor` - owns all synchronization state for one joined room.
//!
//! The actor is the single writer of presence, mic state and screen-share
//! arbitration. Everything that takes time (capture prompts, waiting for
//! local media, burst delays) runs in a spawned task that posts an
//! [`Internal`] event back, so the loop itself never blocks on the user or
//! the network.
//!
//! # Onboarding
//!
//! On start the actor adopts whoever the SDK already lists, then runs three
//! bursts: `peer_hello`, `mic_state_req`, and a local mic re-resolution.
//! Peers answer a request with their mic state once their own media is ready
//! (or after `local_media_timeout`), so a late joiner converges even if
//! several sends are lost.
//!
//! # Screen share
//!
//! capture -> broadcast claim -> publish -> `Active`. The claim timestamp is
//! decided when the user asks to share, before the capture prompt. A newer
//! claim from a peer makes the local share yield at any point; a capture
//! that completes after a yield is discarded. A start that already loses to
//! a claim seen earlier is refused outright.

use super::messages::{
    AfterMedia, Burst, Internal, MicCause, ParticipantView, RemovalReason, SessionMessage,
    SessionSnapshot, ViewUpdate,
};
use super::metrics::MailboxMonitor;
use crate::burst::BurstScheduler;
use crate::channel::{BroadcastChannel, InboundMessage};
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::errors::SyncError;
use crate::mic::{BroadcastOutcome, Confidence, MicReconciler, MicSignals};
use crate::observability::metrics;
use crate::presence::{ChannelObservation, PresenceTracker, SweepOutcome};
use crate::screen_share::{ClaimDecision, LocalShareState, ScreenShareArbiter};
use crate::sdk::probe::{is_audio_publication, microphone_publications};
use crate::sdk::{
    CaptureRequest, LocalTrack, MediaSession, MuteProbe, ParticipantSnapshot, SdkError, SdkEvent,
    SdkEventReceiver, TrackKind, TrackSource,
};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use sync_protocol::{
    BroadcastMessage, ChatMessage, EpochMillis, MicStateReport, MicStateRequest, PeerHello,
    ScreenShareNotice, Sid,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Default channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 64;

/// Floor for the sweep period; `interval` rejects zero.
const MIN_RECONCILE_INTERVAL: Duration = Duration::from_millis(1);

/// Sender shown for chat lines with no usable name.
const UNKNOWN_CHAT_SENDER: &str = "Peer";

/// Handle to a `SessionActor`.
#[derive(Clone)]
pub struct SessionActorHandle {
    sender: mpsc::Sender<SessionMessage>,
    updates: broadcast::Sender<ViewUpdate>,
    cancel_token: CancellationToken,
    local_sid: Sid,
}

impl SessionActorHandle {
    /// Our own participant sid.
    #[must_use]
    pub fn local_sid(&self) -> &Sid {
        &self.local_sid
    }

    /// Subscribe to view updates. Updates sent before subscribing are not
    /// replayed; use [`Self::get_state`] for the current picture.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ViewUpdate> {
        self.updates.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|_| SyncError::SessionClosed)?;
        rx.await.map_err(|_| SyncError::SessionClosed)
    }

    /// Enable or disable the local microphone and tell every peer.
    pub async fn set_mic_enabled(&self, enabled: bool) -> Result<(), SyncError> {
        self.request(|respond_to| SessionMessage::SetMicEnabled {
            enabled,
            respond_to,
        })
        .await?
    }

    /// Flip the local microphone. Returns the new enabled state.
    pub async fn toggle_mic(&self) -> Result<bool, SyncError> {
        self.request(|respond_to| SessionMessage::ToggleMic { respond_to })
            .await?
    }

    /// Enable or disable the local camera.
    ///
    /// # Errors
    ///
    /// `CameraHeldByScreenShare` when enabling while a screen share is
    /// starting or active.
    pub async fn set_camera_enabled(&self, enabled: bool) -> Result<(), SyncError> {
        self.request(|respond_to| SessionMessage::SetCameraEnabled {
            enabled,
            respond_to,
        })
        .await?
    }

    /// Start sharing the screen.
    ///
    /// Resolves once the share is published, or with
    /// `ScreenShareSuperseded` if a newer claim won while capturing.
    pub async fn start_screen_share(&self, with_audio: bool) -> Result<(), SyncError> {
        self.request(|respond_to| SessionMessage::StartScreenShare {
            with_audio,
            respond_to,
        })
        .await?
    }

    /// Stop the local screen share. A no-op when not sharing.
    pub async fn stop_screen_share(&self) -> Result<(), SyncError> {
        self.request(|respond_to| SessionMessage::StopScreenShare { respond_to })
            .await?
    }

    /// Send a chat line to everyone in the room.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), SyncError> {
        let text = text.into();
        self.request(|respond_to| SessionMessage::SendChat { text, respond_to })
            .await?
    }

    /// Get a snapshot of the session.
    pub async fn get_state(&self) -> Result<SessionSnapshot, SyncError> {
        self.request(|respond_to| SessionMessage::GetState { respond_to })
            .await
    }

    /// Leave the room. The actor stops once this returns.
    pub async fn leave(&self) -> Result<(), SyncError> {
        self.request(|respond_to| SessionMessage::Leave { respond_to })
            .await
    }

    /// Cancel the actor (tears down without waiting for a reply).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// The session actor.
pub struct SessionActor {
    local_sid: Sid,
    sdk: Arc<dyn MediaSession>,
    channel: BroadcastChannel,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    receiver: mpsc::Receiver<SessionMessage>,
    events: SdkEventReceiver,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    updates: broadcast::Sender<ViewUpdate>,
    cancel_token: CancellationToken,
    bursts: BurstScheduler<Internal>,
    /// Flips to `true` once local tracks are published.
    media_ready: watch::Sender<bool>,
    presence: PresenceTracker,
    mic: MicReconciler,
    screen: ScreenShareArbiter,
    /// Local microphone intent.
    mic_enabled: bool,
    /// Set when the user mutes before local media is published.
    muted_before_media: bool,
    camera_enabled: bool,
    local_tracks: Vec<LocalTrack>,
    screen_tracks: Vec<LocalTrack>,
    /// Camera state to restore when the local share ends.
    camera_before_share: Option<bool>,
    speakers: BTreeSet<Sid>,
    last_active_screen: Option<Sid>,
    last_count: usize,
    mailbox: MailboxMonitor,
}

impl SessionActor {
    /// Spawn a session actor for an already-connected media session.
    ///
    /// Returns a handle and the task join handle.
    ///
    /// # Arguments
    ///
    /// * `sdk` - The connected media session
    /// * `events` - Event stream of that session
    /// * `config` - Timing configuration
    /// * `clock` - Source of wire timestamps
    /// * `cancel_token` - Tears the session down when cancelled
    pub fn spawn(
        sdk: Arc<dyn MediaSession>,
        events: SdkEventReceiver,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
        cancel_token: CancellationToken,
    ) -> (SessionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(config.view_update_buffer.max(1));
        let (media_ready, _) = watch::channel(false);

        let local_sid = sdk.local_sid();
        let local_name = sdk.local_participant().display_name();

        let actor = Self {
            local_sid: local_sid.clone(),
            channel: BroadcastChannel::new(Arc::clone(&sdk)),
            sdk,
            clock,
            receiver,
            events,
            bursts: BurstScheduler::new(internal_tx.clone(), cancel_token.child_token()),
            internal_tx,
            internal_rx,
            updates: updates.clone(),
            cancel_token: cancel_token.clone(),
            media_ready,
            presence: PresenceTracker::new(local_sid.clone(), local_name, Instant::now(), &config),
            mic: MicReconciler::new(&config),
            screen: ScreenShareArbiter::new(local_sid.clone()),
            config,
            mic_enabled: false,
            muted_before_media: false,
            camera_enabled: false,
            local_tracks: Vec::new(),
            screen_tracks: Vec::new(),
            camera_before_share: None,
            speakers: BTreeSet::new(),
            last_active_screen: None,
            last_count: 0,
            mailbox: MailboxMonitor::new(local_sid.as_str()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionActorHandle {
            sender,
            updates,
            cancel_token,
            local_sid,
        };

        (handle, task_handle)
    }

    /// Run the actor loop.
    #[instrument(skip_all, name = "sync.actor.session", fields(local_sid = %self.local_sid))]
    async fn run(mut self) {
        info!(
            target: "sync.session",
            local_sid = %self.local_sid,
            "SessionActor started"
        );

        self.onboard();

        let period = self.config.reconcile_interval.max(MIN_RECONCILE_INTERVAL);
        let mut reconcile = tokio::time::interval_at(Instant::now() + period, period);
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sync.session",
                        local_sid = %self.local_sid,
                        "SessionActor received cancellation signal"
                    );
                    self.shutdown().await;
                    break;
                }

                _ = reconcile.tick() => {
                    self.reconcile();
                }

                Some(internal) = self.internal_rx.recv() => {
                    self.handle_internal(internal).await;
                }

                Some(event) = self.events.recv() => {
                    if self.handle_sdk_event(event).await == Flow::Stop {
                        break;
                    }
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_depth(self.receiver.len());
                            if self.handle_message(message).await == Flow::Stop {
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "sync.session",
                                local_sid = %self.local_sid,
                                "SessionActor channel closed, leaving"
                            );
                            self.shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        self.bursts.cancel_all();

        info!(
            target: "sync.session",
            local_sid = %self.local_sid,
            participants = self.presence.len(),
            messages_processed = self.mailbox.messages_processed(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            "SessionActor stopped"
        );
    }

    // ------------------------------------------------------------------
    // Onboarding
    // ------------------------------------------------------------------

    fn onboard(&mut self) {
        let now = Instant::now();
        let local_name = self
            .presence
            .record(&self.local_sid)
            .map(|r| r.display_name.clone())
            .unwrap_or_default();
        self.emit(ViewUpdate::TileAdded {
            sid: self.local_sid.clone(),
            display_name: local_name,
            is_local: true,
        });

        let remotes = self.sdk.remote_participants();
        debug!(
            target: "sync.session",
            remotes = remotes.len(),
            "Adopting participants already in the room"
        );
        for participant in &remotes {
            self.adopt_participant(participant, now);
        }

        self.refresh_local_mic();
        self.update_screen_view();
        self.update_count();

        self.schedule(Burst::PeerHello, &self.config.peer_hello_burst);
        self.schedule(Burst::MicStateRequest, &self.config.mic_request_burst);
        self.schedule(Burst::MicResync, &self.config.mic_resync_schedule);

        self.spawn_local_media();
    }

    fn spawn_local_media(&self) {
        let sdk = Arc::clone(&self.sdk);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let full = CaptureRequest {
                audio: true,
                video: true,
            };
            let result = match sdk.create_local_tracks(full).await {
                Ok(tracks) => Ok(tracks),
                Err(e) => {
                    debug!(
                        target: "sync.session",
                        error = %e,
                        "Camera capture failed, retrying with audio only"
                    );
                    sdk.create_local_tracks(CaptureRequest {
                        audio: true,
                        video: false,
                    })
                    .await
                }
            };
            let _ = tx.send(Internal::LocalMediaCaptured(result));
        });
    }

    async fn handle_local_media(&mut self, result: Result<Vec<LocalTrack>, SdkError>) {
        let tracks = match result {
            Ok(tracks) => tracks,
            Err(e) => {
                warn!(
                    target: "sync.session",
                    error = %e,
                    "Local media unavailable, joining without microphone"
                );
                self.mic_enabled = false;
                self.refresh_local_mic();
                return;
            }
        };

        let mut published = Vec::with_capacity(tracks.len());
        for track in tracks {
            // The camera stays off while a share started before media was up.
            if track.source == TrackSource::Camera && !self.screen.local_state().is_idle() {
                self.camera_before_share = Some(true);
                track.stop();
                continue;
            }
            match self.sdk.publish_track(&track).await {
                Ok(()) => published.push(track),
                Err(e) => {
                    warn!(
                        target: "sync.session",
                        source = track.source.as_str(),
                        error = %e,
                        "Failed to publish local track"
                    );
                    track.stop();
                }
            }
        }

        self.mic_enabled = published.iter().any(|t| t.kind == TrackKind::Audio);
        if self.mic_enabled && std::mem::take(&mut self.muted_before_media) {
            match self.sdk.set_microphone_enabled(false).await {
                Ok(()) => self.mic_enabled = false,
                Err(e) => {
                    warn!(
                        target: "sync.session",
                        error = %e,
                        "Failed to apply early mute to published microphone"
                    );
                }
            }
        }
        self.camera_enabled = published.iter().any(|t| t.source == TrackSource::Camera);
        self.local_tracks = published;

        info!(
            target: "sync.session",
            audio = self.mic_enabled,
            video = self.camera_enabled,
            "Local media ready"
        );

        self.media_ready.send_replace(true);
        self.emit(ViewUpdate::Camera {
            enabled: self.camera_enabled,
        });
        self.refresh_local_mic();
        self.schedule(
            Burst::MicState(MicCause::MediaReady),
            &self.config.mic_state_burst,
        );
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    async fn handle_message(&mut self, message: SessionMessage) -> Flow {
        match message {
            SessionMessage::SetMicEnabled {
                enabled,
                respond_to,
            } => {
                let result = self.set_mic_enabled(enabled).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::ToggleMic { respond_to } => {
                let enabled = !self.mic_enabled;
                let result = self.set_mic_enabled(enabled).await.map(|()| enabled);
                let _ = respond_to.send(result);
            }

            SessionMessage::SetCameraEnabled {
                enabled,
                respond_to,
            } => {
                let result = self.set_camera_enabled(enabled).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::StartScreenShare {
                with_audio,
                respond_to,
            } => {
                self.start_screen_share(with_audio, respond_to).await;
            }

            SessionMessage::StopScreenShare { respond_to } => {
                self.teardown_local_share().await;
                let _ = respond_to.send(Ok(()));
            }

            SessionMessage::SendChat { text, respond_to } => {
                let result = self.send_chat(&text).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }

            SessionMessage::Leave { respond_to } => {
                info!(target: "sync.session", local_sid = %self.local_sid, "Leaving room");
                self.shutdown().await;
                let _ = respond_to.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    async fn set_mic_enabled(&mut self, enabled: bool) -> Result<(), SyncError> {
        self.sdk.set_microphone_enabled(enabled).await?;
        self.mic_enabled = enabled;
        if !*self.media_ready.borrow() {
            self.muted_before_media = !enabled;
        }
        debug!(target: "sync.session", enabled, "Local microphone changed");

        self.refresh_local_mic();
        self.schedule(Burst::MicState(MicCause::Toggle), &self.config.mic_state_burst);
        Ok(())
    }

    async fn set_camera_enabled(&mut self, enabled: bool) -> Result<(), SyncError> {
        if enabled && !self.screen.local_state().is_idle() {
            return Err(SyncError::CameraHeldByScreenShare);
        }
        self.sdk.set_camera_enabled(enabled).await?;
        if self.camera_enabled != enabled {
            self.camera_enabled = enabled;
            self.emit(ViewUpdate::Camera { enabled });
        }
        Ok(())
    }

    async fn send_chat(&mut self, text: &str) -> Result<(), SyncError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let sender = self.local_display_name();
        let ts = self.clock.now_ms();
        let message = BroadcastMessage::Chat(ChatMessage {
            sender: Some(sender.clone()),
            text: text.to_string(),
            ts,
        });
        if !self.channel.publish(&message).await {
            return Err(SyncError::Transport("chat message not sent".to_string()));
        }

        self.emit(ViewUpdate::Chat {
            sender,
            text: text.to_string(),
            ts,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Screen share
    // ------------------------------------------------------------------

    async fn start_screen_share(
        &mut self,
        with_audio: bool,
        respond_to: oneshot::Sender<Result<(), SyncError>>,
    ) {
        let (attempt, claimed_at) = match self.screen.begin(self.clock.now_ms()) {
            Ok(started) => started,
            Err(e) => {
                let _ = respond_to.send(Err(e));
                return;
            }
        };
        info!(
            target: "sync.screen",
            attempt,
            claimed_at,
            with_audio,
            "Starting screen share"
        );

        self.hold_camera_for_share().await;

        let sdk = Arc::clone(&self.sdk);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = sdk.create_screen_tracks(with_audio).await;
            let _ = tx.send(Internal::ScreenCaptured {
                attempt,
                result,
                respond_to,
            });
        });
    }

    async fn finish_screen_share(
        &mut self,
        attempt: u64,
        result: Result<Vec<LocalTrack>, SdkError>,
    ) -> Result<(), SyncError> {
        if !self.screen.is_current(attempt) {
            if let Ok(tracks) = &result {
                for track in tracks {
                    track.stop();
                }
            }
            let winner = self.screen.superseded_by(attempt).cloned();
            debug!(target: "sync.screen", attempt, "Discarding capture for abandoned share");
            return Err(match winner {
                Some(winner) => SyncError::ScreenShareSuperseded { winner },
                None => SyncError::MediaAcquisition("screen share cancelled".to_string()),
            });
        }

        let tracks = match result {
            Ok(tracks) => tracks,
            Err(e) => {
                warn!(target: "sync.screen", attempt, error = %e, "Screen capture failed");
                self.screen.release();
                self.restore_camera().await;
                return Err(e.into());
            }
        };

        let claimed_at = self
            .screen
            .local_state()
            .claimed_at()
            .unwrap_or_else(|| self.clock.now_ms());
        self.publish_claim(claimed_at).await;

        let mut published: Vec<&LocalTrack> = Vec::with_capacity(tracks.len());
        for track in &tracks {
            if let Err(e) = self.sdk.publish_track(track).await {
                warn!(
                    target: "sync.screen",
                    attempt,
                    source = track.source.as_str(),
                    error = %e,
                    "Failed to publish screen share, rolling back"
                );
                for done in published {
                    if let Err(e) = self.sdk.unpublish_track(done).await {
                        debug!(target: "sync.screen", error = %e, "Rollback unpublish failed");
                    }
                }
                for track in &tracks {
                    track.stop();
                }
                self.screen.release();
                self.publish_release().await;
                self.restore_camera().await;
                return Err(e.into());
            }
            published.push(track);
        }

        self.screen.activate(attempt);
        self.watch_screen_end(attempt, &tracks);
        self.screen_tracks = tracks;
        info!(target: "sync.screen", attempt, claimed_at, "Screen share active");
        self.emit(ViewUpdate::LocalShare { active: true });
        Ok(())
    }

    /// Notice when the platform ends the capture (e.g. the browser's
    /// "stop sharing" button).
    fn watch_screen_end(&self, attempt: u64, tracks: &[LocalTrack]) {
        let Some(video) = tracks
            .iter()
            .find(|t| t.source == TrackSource::ScreenShare)
        else {
            return;
        };
        let ended = video.ended.clone();
        let cancel = self.cancel_token.child_token();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = ended.cancelled() => {
                    let _ = tx.send(Internal::ScreenTrackEnded { attempt });
                }
            }
        });
    }

    /// Stop whatever local share exists, in any phase.
    ///
    /// Sends a release only if tracks were published; a share that never
    /// published never sent a claim.
    async fn teardown_local_share(&mut self) {
        let tracks = std::mem::take(&mut self.screen_tracks);
        let published = !tracks.is_empty();
        for track in &tracks {
            if let Err(e) = self.sdk.unpublish_track(track).await {
                debug!(target: "sync.screen", error = %e, "Unpublish failed");
            }
            track.stop();
        }

        self.screen.release();
        if published {
            self.publish_release().await;
            self.emit(ViewUpdate::LocalShare { active: false });
            info!(target: "sync.screen", "Screen share stopped");
        }
        self.restore_camera().await;
    }

    async fn hold_camera_for_share(&mut self) {
        self.camera_before_share = Some(self.camera_enabled);
        if !self.camera_enabled {
            return;
        }
        if let Err(e) = self.sdk.set_camera_enabled(false).await {
            debug!(target: "sync.screen", error = %e, "Failed to turn camera off for share");
        }
        self.camera_enabled = false;
        self.emit(ViewUpdate::Camera { enabled: false });
    }

    async fn restore_camera(&mut self) {
        if self.camera_before_share.take() != Some(true) {
            return;
        }
        match self.sdk.set_camera_enabled(true).await {
            Ok(()) => {
                self.camera_enabled = true;
                self.emit(ViewUpdate::Camera { enabled: true });
            }
            Err(e) => {
                warn!(target: "sync.screen", error = %e, "Failed to restore camera after share");
            }
        }
    }

    async fn publish_claim(&self, claimed_at: EpochMillis) {
        let message = BroadcastMessage::ScreenShareClaim(ScreenShareNotice {
            sid: self.local_sid.clone(),
            ts: claimed_at,
            sender: None,
        });
        self.channel.publish(&message).await;
    }

    async fn publish_release(&self) {
        let message = BroadcastMessage::ScreenShareRelease(ScreenShareNotice {
            sid: self.local_sid.clone(),
            ts: self.clock.now_ms(),
            sender: None,
        });
        self.channel.publish(&message).await;
    }

    /// Subscribe to the active remote share only, and tell the view when it
    /// changes.
    fn update_screen_view(&mut self) {
        for (sid, subscribed) in self.screen.subscription_plan() {
            self.sdk
                .set_subscribed(&sid, TrackSource::ScreenShare, subscribed);
        }
        let active = self.screen.active_share().cloned();
        if active != self.last_active_screen {
            debug!(
                target: "sync.screen",
                active = ?active,
                "Active remote share changed"
            );
            self.last_active_screen.clone_from(&active);
            self.emit(ViewUpdate::ActiveScreen { sid: active });
        }
    }

    // ------------------------------------------------------------------
    // Internal events
    // ------------------------------------------------------------------

    async fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Tick { burst, n } => self.handle_tick(burst, n).await,

            Internal::MediaWaitOver(after) => self.after_media(after).await,

            Internal::LocalMediaCaptured(result) => self.handle_local_media(result).await,

            Internal::ScreenCaptured {
                attempt,
                result,
                respond_to,
            } => {
                let result = self.finish_screen_share(attempt, result).await;
                let _ = respond_to.send(result);
            }

            Internal::ScreenTrackEnded { attempt } => {
                if self.screen.is_current(attempt) {
                    info!(target: "sync.screen", attempt, "Screen capture ended by platform");
                    self.teardown_local_share().await;
                }
            }
        }
    }

    async fn handle_tick(&mut self, burst: Burst, n: u32) {
        trace!(target: "sync.session", burst = burst.as_str(), n, "Burst tick");
        match burst {
            Burst::PeerHello => {
                let message = BroadcastMessage::PeerHello(PeerHello {
                    sid: self.local_sid.clone(),
                    ts: self.clock.now_ms(),
                    n: Some(n),
                });
                self.channel.publish(&message).await;
            }
            Burst::MicStateRequest => {
                let message = BroadcastMessage::MicStateReq(MicStateRequest {
                    from_sid: self.local_sid.clone(),
                    from_key: self.sdk.local_identity(),
                    ts: self.clock.now_ms(),
                    n: Some(n),
                });
                self.channel.publish(&message).await;
            }
            Burst::MicState(cause) => self.publish_mic_state(cause, Some(n)).await,
            Burst::MicResync => self.refresh_all_mics(),
        }
    }

    /// Run `after` once local media is ready, or after the timeout.
    fn wait_for_media(&self, after: AfterMedia) {
        let mut ready = self.media_ready.subscribe();
        let timeout = self.config.local_media_timeout;
        let cancel = self.cancel_token.child_token();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let wait = async move { ready.wait_for(|ready| *ready).await.is_ok() };
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = tokio::time::timeout(timeout, wait) => {}
            }
            metrics::record_local_media_wait(started.elapsed());
            let _ = tx.send(Internal::MediaWaitOver(after));
        });
    }

    async fn after_media(&mut self, after: AfterMedia) {
        match after {
            AfterMedia::RequestReply => {
                self.publish_mic_state(MicCause::RequestReply, None).await;
                self.schedule(
                    Burst::MicState(MicCause::RequestReply),
                    &self.config.mic_state_burst,
                );
            }
            AfterMedia::HelloReply => {
                self.schedule(
                    Burst::MicState(MicCause::PeerHello),
                    &self.config.mic_state_burst,
                );
            }
        }
    }

    async fn publish_mic_state(&self, cause: MicCause, n: Option<u32>) {
        let message = BroadcastMessage::MicState(MicStateReport {
            sid: self.local_sid.clone(),
            ts: self.clock.now_ms(),
            enabled: self.broadcast_mic_enabled(),
            cause: Some(cause.as_str().to_string()),
            n,
        });
        self.channel.publish(&message).await;
    }

    /// What to tell peers about our microphone: the SDK's participant flag,
    /// then our own publications' mute flags, then local intent.
    fn broadcast_mic_enabled(&self) -> bool {
        let local = self.sdk.local_participant();
        if let Some(enabled) = local.microphone_enabled {
            return enabled;
        }
        let publications = microphone_publications(&local);
        if publications.is_empty() {
            return false;
        }
        let flags: Vec<Option<bool>> = publications.into_iter().map(MuteProbe::is_muted).collect();
        if flags.contains(&Some(false)) {
            return true;
        }
        if !flags.is_empty() && flags.iter().all(|f| *f == Some(true)) {
            return false;
        }
        self.mic_enabled && self.has_local_audio()
    }

    fn media_ready_now(&self) -> bool {
        *self.media_ready.borrow()
    }

    fn has_local_audio(&self) -> bool {
        self.local_tracks
            .iter()
            .any(|t| t.kind == TrackKind::Audio && !t.is_ended())
            || !microphone_publications(&self.sdk.local_participant()).is_empty()
    }

    fn schedule(&self, burst: Burst, delays: &[Duration]) {
        self.bursts
            .schedule(burst.as_str(), delays, move |n| Internal::Tick { burst, n });
    }

    // ------------------------------------------------------------------
    // SDK events
    // ------------------------------------------------------------------

    async fn handle_sdk_event(&mut self, event: SdkEvent) -> Flow {
        let now = Instant::now();
        match event {
            SdkEvent::ParticipantConnected(participant) => {
                if participant.sid == self.local_sid {
                    return Flow::Continue;
                }
                info!(
                    target: "sync.session",
                    sid = %participant.sid,
                    name = %participant.display_name(),
                    "Participant connected"
                );
                let added = self.adopt_participant(&participant, now);
                self.update_screen_view();
                self.update_count();
                if added {
                    self.schedule(
                        Burst::MicState(MicCause::PeerJoined),
                        &self.config.mic_state_burst,
                    );
                }
                // The newcomer never saw our claim.
                if let LocalShareState::Active { claimed_at, .. } = self.screen.local_state() {
                    self.publish_claim(claimed_at).await;
                }
            }

            SdkEvent::ParticipantDisconnected { sid } => {
                info!(target: "sync.session", sid = %sid, "Participant disconnected");
                self.remove_participant(&sid, RemovalReason::Disconnected);
            }

            SdkEvent::TrackPublished { sid, publication } => {
                if sid == self.local_sid {
                    return Flow::Continue;
                }
                if !self.presence.contains(&sid) {
                    if let Some(participant) = self.sdk.participant(&sid) {
                        self.adopt_participant(&participant, now);
                        self.update_count();
                    }
                }
                if publication.source == TrackSource::ScreenShare {
                    if self.screen.add_share(&sid) {
                        self.update_screen_view();
                    }
                } else if is_audio_publication(&publication) {
                    self.refresh_mic(&sid);
                }
            }

            SdkEvent::TrackUnpublished { sid, kind, source } => {
                if source == TrackSource::ScreenShare {
                    if self.screen.remove_share(&sid) {
                        self.update_screen_view();
                    }
                } else if kind == TrackKind::Audio && !source.is_screen() {
                    self.refresh_mic(&sid);
                }
            }

            SdkEvent::TrackMuted { sid, kind, source }
            | SdkEvent::TrackUnmuted { sid, kind, source } => {
                if kind == TrackKind::Audio && !source.is_screen() {
                    self.refresh_mic(&sid);
                }
            }

            SdkEvent::DataReceived { payload, from } => {
                self.handle_data(&payload, from).await;
            }

            SdkEvent::ActiveSpeakersChanged { speakers } => {
                let speakers: BTreeSet<Sid> = speakers.into_iter().collect();
                if speakers != self.speakers {
                    self.speakers = speakers;
                    self.emit(ViewUpdate::Speaking {
                        speakers: self.speakers.iter().cloned().collect(),
                    });
                    let speaking: Vec<Sid> = self.speakers.iter().cloned().collect();
                    for sid in &speaking {
                        self.refresh_mic(sid);
                    }
                }
            }

            SdkEvent::ConnectionStateChanged(state) => {
                debug!(
                    target: "sync.session",
                    state = state.as_str(),
                    "Connection state changed"
                );
            }

            SdkEvent::Disconnected(reason) => {
                info!(
                    target: "sync.session",
                    reason = reason.as_str(),
                    "Room connection ended"
                );
                self.release_after_disconnect();
                self.emit(ViewUpdate::Disconnected {
                    reason,
                    notice: reason.user_notice(),
                });
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    async fn handle_data(&mut self, payload: &[u8], from: Option<Sid>) {
        let Some(InboundMessage { sender, message }) = self.channel.receive(payload, from) else {
            return;
        };

        if let BroadcastMessage::Chat(chat) = &message {
            self.handle_chat(chat, sender.as_ref());
            return;
        }

        let Some(sender) = sender else {
            trace!(
                target: "sync.session",
                message_type = message.message_type(),
                "Dropped message without sender"
            );
            return;
        };

        let now = Instant::now();
        match self.presence.observe_from_channel(&sender, now) {
            ChannelObservation::Tombstoned => return,
            ChannelObservation::Added => {
                if let Some(participant) = self.sdk.participant(&sender) {
                    self.presence
                        .observe_from_sdk(&sender, &participant.display_name(), now);
                }
                let display_name = self
                    .presence
                    .record(&sender)
                    .map_or_else(|| sender.to_string(), |r| r.display_name.clone());
                self.emit(ViewUpdate::TileAdded {
                    sid: sender.clone(),
                    display_name,
                    is_local: false,
                });
                self.update_count();
            }
            ChannelObservation::Known => {}
        }

        match message {
            BroadcastMessage::PeerHello(_) => {
                debug!(target: "sync.session", from = %sender, "Peer hello");
                self.wait_for_media(AfterMedia::HelloReply);
            }

            BroadcastMessage::MicStateReq(_) => {
                debug!(target: "sync.session", from = %sender, "Mic state requested");
                self.wait_for_media(AfterMedia::RequestReply);
            }

            BroadcastMessage::MicState(report) => {
                let ts = if report.ts > 0 {
                    report.ts
                } else {
                    self.clock.now_ms()
                };
                if self.mic.record_broadcast(&sender, report.enabled, ts) == BroadcastOutcome::Updated
                {
                    self.refresh_mic(&sender);
                }
            }

            BroadcastMessage::ScreenShareClaim(notice) => {
                match self.screen.observe_claim(&sender, notice.ts) {
                    ClaimDecision::Yield { .. } => self.teardown_local_share().await,
                    // The loser may not have seen our claim yet.
                    ClaimDecision::Hold => {
                        if let LocalShareState::Active { claimed_at, .. } =
                            self.screen.local_state()
                        {
                            self.publish_claim(claimed_at).await;
                        }
                    }
                    ClaimDecision::Recorded | ClaimDecision::Ignored => {}
                }
            }

            BroadcastMessage::ScreenShareRelease(notice) => {
                self.screen.observe_release(&sender, notice.ts);
            }

            BroadcastMessage::Chat(_) => {}
        }
    }

    fn handle_chat(&self, chat: &ChatMessage, sender: Option<&Sid>) {
        let text = chat.text.trim();
        if text.is_empty() {
            return;
        }
        let name = chat
            .sender
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| {
                sender
                    .and_then(|sid| self.sdk.participant(sid))
                    .map(|p| p.display_name())
            })
            .unwrap_or_else(|| UNKNOWN_CHAT_SENDER.to_string());
        self.emit(ViewUpdate::Chat {
            sender: name,
            text: text.to_string(),
            ts: chat.ts,
        });
    }

    // ------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------

    /// Track a participant the SDK lists. Returns `true` if it is new.
    fn adopt_participant(&mut self, participant: &ParticipantSnapshot, now: Instant) -> bool {
        let display_name = participant.display_name();
        let added = self
            .presence
            .observe_from_sdk(&participant.sid, &display_name, now);
        if added {
            self.emit(ViewUpdate::TileAdded {
                sid: participant.sid.clone(),
                display_name,
                is_local: false,
            });
        }
        if participant
            .publications
            .iter()
            .any(|p| p.source == TrackSource::ScreenShare)
        {
            self.screen.add_share(&participant.sid);
        }
        self.refresh_mic(&participant.sid);
        added
    }

    fn remove_participant(&mut self, sid: &Sid, reason: RemovalReason) {
        if self.presence.remove(sid).is_none() {
            return;
        }
        self.forget_participant(sid, reason);
    }

    /// Drop per-participant state once presence has let go of `sid`.
    fn forget_participant(&mut self, sid: &Sid, reason: RemovalReason) {
        self.mic.remove(sid);
        self.screen.remove_participant(sid);
        self.speakers.remove(sid);
        self.emit(ViewUpdate::TileRemoved {
            sid: sid.clone(),
            reason,
        });
        self.update_screen_view();
        self.update_count();
    }

    fn reconcile(&mut self) {
        let now = Instant::now();
        let membership = self.sdk.membership();
        match self.presence.sweep(&membership, now) {
            SweepOutcome::Suppressed(reason) => {
                trace!(
                    target: "sync.presence",
                    reason = reason.as_str(),
                    "Sweep suppressed"
                );
                metrics::record_sweep_suppressed(reason.as_str());
            }
            SweepOutcome::Completed {
                evicted,
                unknown_live,
            } => {
                for sid in &evicted {
                    metrics::record_presence_eviction();
                    self.forget_participant(sid, RemovalReason::Evicted);
                }
                for sid in &unknown_live {
                    if let Some(participant) = self.sdk.participant(sid) {
                        self.adopt_participant(&participant, now);
                    }
                }
                self.update_screen_view();
                self.update_count();
            }
        }
        self.refresh_all_mics();
    }

    fn update_count(&mut self) {
        let count = self.presence.len();
        metrics::set_participants_live(count);
        if count != self.last_count {
            self.last_count = count;
            self.emit(ViewUpdate::ParticipantCount(count));
        }
    }

    // ------------------------------------------------------------------
    // Mic state
    // ------------------------------------------------------------------

    fn refresh_mic(&mut self, sid: &Sid) {
        if *sid == self.local_sid {
            self.refresh_local_mic();
            return;
        }
        let Some(record) = self.presence.record(sid) else {
            return;
        };
        let now = Instant::now();
        let observed_for = now.duration_since(record.first_seen_at);
        let mut signals = match self.sdk.participant(sid) {
            Some(participant) => MicSignals::remote(&participant, observed_for),
            None => MicSignals {
                local: None,
                audio_level: 0.0,
                is_speaking: false,
                sdk_enabled: None,
                publication_muted: Vec::new(),
                observed_for,
            },
        };
        signals.is_speaking |= self.speakers.contains(sid);

        let outcome = self.mic.refresh(sid, &signals, now, self.clock.now_ms());
        if outcome.changed() {
            self.emit_mic_badge(sid);
        }
    }

    fn refresh_local_mic(&mut self) {
        let signals = MicSignals::local(self.mic_enabled, self.has_local_audio());
        let sid = self.local_sid.clone();
        let outcome = self
            .mic
            .refresh(&sid, &signals, Instant::now(), self.clock.now_ms());
        if outcome.changed() {
            self.emit_mic_badge(&sid);
        }
    }

    fn refresh_all_mics(&mut self) {
        let sids: Vec<Sid> = self.presence.records().map(|r| r.sid.clone()).collect();
        for sid in &sids {
            self.refresh_mic(sid);
        }
    }

    fn emit_mic_badge(&self, sid: &Sid) {
        if let Some(state) = self.mic.state(sid) {
            self.emit(ViewUpdate::MicBadge {
                sid: sid.clone(),
                muted: state.muted,
                confidence: state.confidence,
            });
        }
    }

    // ------------------------------------------------------------------
    // State and teardown
    // ------------------------------------------------------------------

    fn emit(&self, update: ViewUpdate) {
        // Err only means nobody is listening.
        let _ = self.updates.send(update);
    }

    fn local_display_name(&self) -> String {
        self.presence
            .record(&self.local_sid)
            .map_or_else(|| self.local_sid.to_string(), |r| r.display_name.clone())
    }

    fn snapshot(&self) -> SessionSnapshot {
        let participants = self
            .presence
            .records()
            .map(|record| {
                let state = self.mic.state(&record.sid);
                ParticipantView {
                    sid: record.sid.clone(),
                    display_name: record.display_name.clone(),
                    is_local: record.is_local,
                    muted: state.and_then(|s| s.muted),
                    confidence: state.map_or(Confidence::Unknown, |s| s.confidence),
                    speaking: self.speakers.contains(&record.sid),
                }
            })
            .collect();

        SessionSnapshot {
            local_sid: self.local_sid.clone(),
            connection: self.sdk.connection_state(),
            participants,
            mic_enabled: self.mic_enabled,
            camera_enabled: self.camera_enabled,
            local_media_ready: self.media_ready_now(),
            local_share: self.screen.local_state(),
            active_screen: self.screen.active_share().cloned(),
            screen_winner: self.screen.winner().map(|(sid, _)| sid),
        }
    }

    /// Leave cleanly: release the share, stop local media, disconnect.
    async fn shutdown(&mut self) {
        self.bursts.cancel_all();
        self.teardown_local_share().await;
        for track in self.local_tracks.drain(..) {
            track.stop();
        }
        self.sdk.disconnect().await;
    }

    /// The room is gone; stop local capture without talking to the SDK.
    fn release_after_disconnect(&mut self) {
        self.bursts.cancel_all();
        for track in self.screen_tracks.drain(..).chain(self.local_tracks.drain(..)) {
            track.stop();
        }
        self.screen.release();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::sdk::loopback::{CaptureTarget, FlagStyle, JoinOptions, LoopbackRoom};
    use crate::sdk::DisconnectReason;

    fn spawn_peer(
        room: &LoopbackRoom,
        sid: &str,
        options: JoinOptions,
    ) -> (SessionActorHandle, JoinHandle<()>) {
        let (session, events) = room.join_with(
            sid,
            JoinOptions {
                sid: Some(Sid::from(sid)),
                name: Some(format!("user-{sid}")),
                ..options
            },
        );
        SessionActor::spawn(
            session,
            events,
            SyncConfig::default(),
            Arc::new(TokioClock::starting_at(1_700_000_000_000)),
            CancellationToken::new(),
        )
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    fn drain(rx: &mut broadcast::Receiver<ViewUpdate>) -> Vec<ViewUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = rx.try_recv() {
            updates.push(update);
        }
        updates
    }

    #[tokio::test(start_paused = true)]
    async fn test_joiner_sees_existing_participant_and_mic_state() {
        let room = LoopbackRoom::new();
        let (a, _a_task) = spawn_peer(&room, "PA_a", JoinOptions::default());
        settle(10_000).await;

        let (b, _b_task) = spawn_peer(&room, "PA_b", JoinOptions::default());
        settle(4_000).await;

        let state = b.get_state().await.unwrap();
        assert_eq!(state.participants.len(), 2);
        let view_of_a = state.participant(&Sid::from("PA_a")).unwrap();
        assert_eq!(view_of_a.display_name, "user-PA_a");
        assert_eq!(view_of_a.muted, Some(false));
        assert_eq!(view_of_a.confidence, Confidence::Authoritative);

        let state = a.get_state().await.unwrap();
        assert!(state.participant(&Sid::from("PA_b")).is_some());
        assert!(state.local_media_ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mic_toggle_reaches_peer() {
        let room = LoopbackRoom::new();
        let (a, _a_task) = spawn_peer(&room, "PA_a", JoinOptions::default());
        let (b, _b_task) = spawn_peer(&room, "PA_b", JoinOptions::default());
        settle(5_000).await;

        assert!(!a.toggle_mic().await.unwrap());
        settle(4_000).await;

        let state = b.get_state().await.unwrap();
        let view_of_a = state.participant(&Sid::from("PA_a")).unwrap();
        assert_eq!(view_of_a.muted, Some(true));
        assert_eq!(view_of_a.confidence, Confidence::Authoritative);

        let local = a.get_state().await.unwrap();
        assert!(!local.mic_enabled);
        assert_eq!(local.participant(&Sid::from("PA_a")).unwrap().muted, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_flags_rely_on_broadcast() {
        let room = LoopbackRoom::new();
        let hidden = JoinOptions {
            flag_style: FlagStyle::Unreadable,
            hide_microphone_flag: true,
            ..JoinOptions::default()
        };
        let (_a, _a_task) = spawn_peer(&room, "PA_a", hidden);
        settle(10_000).await;
        let (b, _b_task) = spawn_peer(&room, "PA_b", JoinOptions::default());
        settle(3_000).await;

        let state = b.get_state().await.unwrap();
        let view_of_a = state.participant(&Sid::from("PA_a")).unwrap();
        assert_eq!(view_of_a.muted, Some(false));
        assert_eq!(view_of_a.confidence, Confidence::Authoritative);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_round_trip() {
        let room = LoopbackRoom::new();
        let (a, _a_task) = spawn_peer(&room, "PA_a", JoinOptions::default());
        let (b, _b_task) = spawn_peer(&room, "PA_b", JoinOptions::default());
        settle(500).await;

        let mut b_updates = b.subscribe();
        a.send_chat("  hello there  ").await.unwrap();
        a.send_chat("   ").await.unwrap();
        settle(50).await;

        let chats: Vec<_> = drain(&mut b_updates)
            .into_iter()
            .filter_map(|u| match u {
                ViewUpdate::Chat { sender, text, .. } => Some((sender, text)),
                _ => None,
            })
            .collect();
        assert_eq!(chats, vec![("user-PA_a".to_string(), "hello there".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_held_during_share_and_restored() {
        let room = LoopbackRoom::new();
        let (a, _a_task) = spawn_peer(&room, "PA_a", JoinOptions::default());
        settle(500).await;
        assert!(a.get_state().await.unwrap().camera_enabled);

        a.start_screen_share(false).await.unwrap();
        let state = a.get_state().await.unwrap();
        assert!(!state.camera_enabled);
        assert!(matches!(state.local_share, LocalShareState::Active { .. }));
        assert_eq!(
            a.set_camera_enabled(true).await,
            Err(SyncError::CameraHeldByScreenShare)
        );

        a.stop_screen_share().await.unwrap();
        let state = a.get_state().await.unwrap();
        assert!(state.camera_enabled);
        assert!(state.local_share.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_failure_leaves_no_claim() {
        let room = LoopbackRoom::new();
        let (a, _a_task) = spawn_peer(&room, "PA_a", JoinOptions::default());
        let (b, _b_task) = spawn_peer(&room, "PA_b", JoinOptions::default());
        settle(500).await;

        room.set_capture_failure(
            &Sid::from("PA_a"),
            CaptureTarget::Screen,
            Some(SdkError::CaptureDenied("user dismissed picker".to_string())),
        );
        let result = a.start_screen_share(false).await;
        assert!(matches!(result, Err(SyncError::MediaAcquisition(_))));
        settle(50).await;

        let state = a.get_state().await.unwrap();
        assert!(state.local_share.is_idle());
        assert!(state.camera_enabled);
        assert_eq!(b.get_state().await.unwrap().screen_winner, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_rolls_back() {
        let room = LoopbackRoom::new();
        let (a, _a_task) = spawn_peer(&room, "PA_a", JoinOptions::default());
        let (b, _b_task) = spawn_peer(&room, "PA_b", JoinOptions::default());
        settle(500).await;

        room.fail_next_publish(&Sid::from("PA_a"), TrackSource::ScreenShare);
        assert!(a.start_screen_share(false).await.is_err());
        settle(50).await;

        assert!(a.get_state().await.unwrap().local_share.is_idle());
        // The claim went out before publishing; the release cancels it.
        assert_eq!(b.get_state().await.unwrap().screen_winner, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_platform_end_stops_share() {
        let room = LoopbackRoom::new();
        let (a, _a_task) = spawn_peer(&room, "PA_a", JoinOptions::default());
        let (b, _b_task) = spawn_peer(&room, "PA_b", JoinOptions::default());
        settle(500).await;

        a.start_screen_share(true).await.unwrap();
        settle(50).await;
        assert_eq!(
            b.get_state().await.unwrap().active_screen,
            Some(Sid::from("PA_a"))
        );

        room.end_screen_capture(&Sid::from("PA_a"));
        settle(50).await;

        assert!(a.get_state().await.unwrap().local_share.is_idle());
        let state = b.get_state().await.unwrap();
        assert_eq!(state.active_screen, None);
        assert_eq!(state.screen_winner, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_claim_wins() {
        let room = LoopbackRoom::new();
        let (a, _a_task) = spawn_peer(&room, "PA_a", JoinOptions::default());
        let (b, _b_task) = spawn_peer(&room, "PA_b", JoinOptions::default());
        settle(500).await;

        a.start_screen_share(false).await.unwrap();
        settle(1_000).await;
        b.start_screen_share(false).await.unwrap();
        settle(100).await;

        let a_state = a.get_state().await.unwrap();
        let b_state = b.get_state().await.unwrap();
        assert!(a_state.local_share.is_idle());
        assert!(matches!(b_state.local_share, LocalShareState::Active { .. }));
        assert_eq!(a_state.screen_winner, Some(Sid::from("PA_b")));
        assert_eq!(b_state.screen_winner, Some(Sid::from("PA_b")));
        assert_eq!(a_state.active_screen, Some(Sid::from("PA_b")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_close_reports_notice_and_stops() {
        let room = LoopbackRoom::new();
        let (a, a_task) = spawn_peer(&room, "PA_a", JoinOptions::default());
        settle(100).await;
        let mut updates = a.subscribe();

        room.close(DisconnectReason::RoomDeleted);
        a_task.await.unwrap();

        let notice = drain(&mut updates).into_iter().find_map(|u| match u {
            ViewUpdate::Disconnected { notice, .. } => Some(notice),
            _ => None,
        });
        assert_eq!(notice, Some(Some("Host ended the room.")));
        assert_eq!(a.get_state().await, Err(SyncError::SessionClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_departed_participant_is_not_resurrected() {
        let room = LoopbackRoom::new();
        let (a, _a_task) = spawn_peer(&room, "PA_a", JoinOptions::default());
        let (b, b_task) = spawn_peer(&room, "PA_b", JoinOptions::default());
        settle(500).await;

        b.leave().await.unwrap();
        b_task.await.unwrap();
        settle(5_000).await;

        let state = a.get_state().await.unwrap();
        assert_eq!(state.participants.len(), 1);
        assert!(state.participant(&Sid::from("PA_b")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_drop_is_evicted_after_grace() {
        let room = LoopbackRoom::new();
        let (a, _a_task) = spawn_peer(&room, "PA_a", JoinOptions::default());
        let (_b, _b_task) = spawn_peer(&room, "PA_b", JoinOptions::default());
        let (_c, _c_task) = spawn_peer(&room, "PA_c", JoinOptions::default());
        settle(4_000).await;

        let mut updates = a.subscribe();
        room.drop_silently(&Sid::from("PA_c"));
        settle(12_000).await;

        let state = a.get_state().await.unwrap();
        assert!(state.participant(&Sid::from("PA_c")).is_none());
        assert!(state.participant(&Sid::from("PA_b")).is_some());
        assert!(drain(&mut updates).contains(&ViewUpdate::TileRemoved {
            sid: Sid::from("PA_c"),
            reason: RemovalReason::Evicted,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_disconnects() {
        let room = LoopbackRoom::new();
        let (a, a_task) = spawn_peer(&room, "PA_a", JoinOptions::default());
        settle(100).await;
        assert_eq!(room.participants(), vec![Sid::from("PA_a")]);

        a.cancel();
        a_task.await.unwrap();
        assert!(a.is_cancelled());
        assert!(room.participants().is_empty());
    }
}
