//! Message types for the session actor.
//!
//! `SessionMessage` is the command mailbox (request/reply via `oneshot`).
//! `Internal` carries events the actor schedules for itself: burst ticks and
//! the results of long-running SDK calls it spawned. `ViewUpdate` is what the
//! rendering layer consumes.

use crate::errors::SyncError;
use crate::mic::Confidence;
use crate::screen_share::LocalShareState;
use crate::sdk::{ConnectionState, DisconnectReason, LocalTrack, SdkError};
use sync_protocol::{EpochMillis, Sid};
use tokio::sync::oneshot;

/// Commands sent to `SessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    /// Enable or disable the local microphone.
    SetMicEnabled {
        enabled: bool,
        respond_to: oneshot::Sender<Result<(), SyncError>>,
    },

    /// Flip the local microphone. Replies with the new enabled state.
    ToggleMic {
        respond_to: oneshot::Sender<Result<bool, SyncError>>,
    },

    /// Enable or disable the local camera.
    SetCameraEnabled {
        enabled: bool,
        respond_to: oneshot::Sender<Result<(), SyncError>>,
    },

    /// Start sharing the screen. Replies once the share is active, lost
    /// arbitration, or failed.
    StartScreenShare {
        with_audio: bool,
        respond_to: oneshot::Sender<Result<(), SyncError>>,
    },

    /// Stop the local screen share (no-op when not sharing).
    StopScreenShare {
        respond_to: oneshot::Sender<Result<(), SyncError>>,
    },

    /// Send a chat line to every peer.
    SendChat {
        text: String,
        respond_to: oneshot::Sender<Result<(), SyncError>>,
    },

    /// Get a point-in-time snapshot of the session.
    GetState {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },

    /// Leave the room: release any share, stop bursts, disconnect.
    Leave { respond_to: oneshot::Sender<()> },
}

/// Why a mic-state broadcast was sent (carried as `cause` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicCause {
    /// Local media just came up.
    MediaReady,
    /// A participant joined.
    PeerJoined,
    /// Reply to a `peer_hello`.
    PeerHello,
    /// Reply to a `mic_state_req`.
    RequestReply,
    /// The local user toggled the microphone.
    Toggle,
}

impl MicCause {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MicCause::MediaReady => "media_ready",
            MicCause::PeerJoined => "peer_joined",
            MicCause::PeerHello => "peer_hello",
            MicCause::RequestReply => "mic_state_req_reply",
            MicCause::Toggle => "toggle",
        }
    }
}

/// Kinds of burst the actor runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Burst {
    PeerHello,
    MicStateRequest,
    MicState(MicCause),
    /// Re-run mic resolution for everyone (no send).
    MicResync,
}

impl Burst {
    /// Bounded label for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Burst::PeerHello => "peer_hello",
            Burst::MicStateRequest => "mic_state_req",
            Burst::MicState(_) => "mic_state",
            Burst::MicResync => "mic_resync",
        }
    }
}

/// What to do once local media is ready (or the wait timed out).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterMedia {
    /// Answer a `mic_state_req`: one immediate report, then a burst.
    RequestReply,
    /// Answer a `peer_hello` with a burst.
    HelloReply,
}

/// Events the actor posts to itself.
#[derive(Debug)]
pub enum Internal {
    Tick { burst: Burst, n: u32 },
    MediaWaitOver(AfterMedia),
    LocalMediaCaptured(Result<Vec<LocalTrack>, SdkError>),
    ScreenCaptured {
        attempt: u64,
        result: Result<Vec<LocalTrack>, SdkError>,
        respond_to: oneshot::Sender<Result<(), SyncError>>,
    },
    ScreenTrackEnded { attempt: u64 },
}

/// Why a tile went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The SDK reported the disconnect.
    Disconnected,
    /// The reconciliation sweep no longer found the participant.
    Evicted,
}

/// Changes for the rendering layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewUpdate {
    TileAdded {
        sid: Sid,
        display_name: String,
        is_local: bool,
    },
    TileRemoved {
        sid: Sid,
        reason: RemovalReason,
    },
    MicBadge {
        sid: Sid,
        muted: Option<bool>,
        confidence: Confidence,
    },
    Speaking {
        speakers: Vec<Sid>,
    },
    /// The remote share to render, if any.
    ActiveScreen {
        sid: Option<Sid>,
    },
    LocalShare {
        active: bool,
    },
    Camera {
        enabled: bool,
    },
    Chat {
        sender: String,
        text: String,
        ts: EpochMillis,
    },
    ParticipantCount(usize),
    Disconnected {
        reason: DisconnectReason,
        notice: Option<&'static str>,
    },
}

/// One tile in a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantView {
    pub sid: Sid,
    pub display_name: String,
    pub is_local: bool,
    pub muted: Option<bool>,
    pub confidence: Confidence,
    pub speaking: bool,
}

/// Point-in-time session state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub local_sid: Sid,
    pub connection: ConnectionState,
    /// Tiles in sid order.
    pub participants: Vec<ParticipantView>,
    pub mic_enabled: bool,
    pub camera_enabled: bool,
    pub local_media_ready: bool,
    pub local_share: LocalShareState,
    /// Remote share being rendered.
    pub active_screen: Option<Sid>,
    /// Winner of screen-share arbitration among all claims seen.
    pub screen_winner: Option<Sid>,
}

impl SessionSnapshot {
    /// Look up one tile.
    #[must_use]
    pub fn participant(&self, sid: &Sid) -> Option<&ParticipantView> {
        self.participants.iter().find(|p| &p.sid == sid)
    }
}
