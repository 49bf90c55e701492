//! Boundary to the external media-session SDK.
//!
//! The synchronization core never talks to a concrete SDK. It consumes the
//! [`MediaSession`] trait for queries and actions and a stream of
//! [`SdkEvent`]s for notifications. All SDK-version skew (membership maps,
//! mute flag shapes) is absorbed here and in [`probe`].

pub mod loopback;
pub mod probe;

use async_trait::async_trait;
use bytes::Bytes;
use sync_protocol::Sid;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use probe::{MuteFlags, MuteProbe, PublicationFlags, TrackFlags};

/// Receiving half of an SDK event stream.
pub type SdkEventReceiver = mpsc::UnboundedReceiver<SdkEvent>;

/// Errors reported by the media SDK.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SdkError {
    /// The session is not connected.
    #[error("Not connected")]
    NotConnected,

    /// Data or track publication failed.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// The user or platform refused capture.
    #[error("Capture denied: {0}")]
    CaptureDenied(String),

    /// No capture device is available.
    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// The track is not known to the session.
    #[error("Track not found: {0}")]
    TrackNotFound(String),
}

/// Connection state as reported by the SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    /// The SDK did not expose a recognizable state.
    Unknown,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Unknown => "unknown",
        }
    }
}

/// Why the room connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The host ended or disbanded the room.
    RoomDeleted,
    /// The same identity joined from elsewhere.
    DuplicateIdentity,
    /// The join could not complete.
    JoinFailure,
    /// This client called `disconnect`.
    ClientInitiated,
    Other,
}

impl DisconnectReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::RoomDeleted => "room_deleted",
            DisconnectReason::DuplicateIdentity => "duplicate_identity",
            DisconnectReason::JoinFailure => "join_failure",
            DisconnectReason::ClientInitiated => "client_initiated",
            DisconnectReason::Other => "other",
        }
    }

    /// Notice for the user-facing layer, if the reason warrants one.
    #[must_use]
    pub const fn user_notice(&self) -> Option<&'static str> {
        match self {
            DisconnectReason::RoomDeleted => Some("Host ended the room."),
            DisconnectReason::DuplicateIdentity => {
                Some("You were disconnected because your identity is used elsewhere.")
            }
            DisconnectReason::JoinFailure => Some("Cannot join this room. Please try again."),
            DisconnectReason::ClientInitiated | DisconnectReason::Other => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Microphone,
    Camera,
    ScreenShare,
    ScreenShareAudio,
    Unknown,
}

impl TrackSource {
    #[must_use]
    pub const fn is_screen(&self) -> bool {
        matches!(self, TrackSource::ScreenShare | TrackSource::ScreenShareAudio)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TrackSource::Microphone => "microphone",
            TrackSource::Camera => "camera",
            TrackSource::ScreenShare => "screen_share",
            TrackSource::ScreenShareAudio => "screen_share_audio",
            TrackSource::Unknown => "unknown",
        }
    }
}

/// A published track as seen by any participant.
#[derive(Debug, Clone, PartialEq)]
pub struct PublicationSnapshot {
    pub track_sid: String,
    pub kind: TrackKind,
    pub source: TrackSource,
    pub flags: MuteFlags,
}

/// Point-in-time view of one participant.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantSnapshot {
    pub sid: Sid,
    pub identity: String,
    pub name: Option<String>,
    /// Current audio level, 0.0..=1.0.
    pub audio_level: f32,
    pub is_speaking: bool,
    /// Participant-level microphone flag, on SDKs that expose one.
    pub microphone_enabled: Option<bool>,
    pub publications: Vec<PublicationSnapshot>,
}

impl ParticipantSnapshot {
    /// Name to show on the tile: display name, then identity, then sid.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .or_else(|| Some(self.identity.trim()).filter(|i| !i.is_empty()))
            .map_or_else(|| self.sid.to_string(), str::to_string)
    }
}

/// One membership map exposed by the SDK.
///
/// SDK generations disagree on where remote participants live, so a snapshot
/// carries every map the SDK has. `keys` are the map keys and
/// `participant_sids` the sids of the values; they normally coincide.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipView {
    pub keys: Vec<Sid>,
    pub participant_sids: Vec<Sid>,
}

/// Everything the presence sweep needs from one SDK read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipSnapshot {
    pub state: ConnectionState,
    pub local_sid: Option<Sid>,
    pub views: Vec<MembershipView>,
}

/// What to capture for local media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub audio: bool,
    pub video: bool,
}

/// A locally captured track.
///
/// `ended` is cancelled when the capture stops, either because this process
/// stopped it or because the platform ended it (e.g. the user closed the
/// screen picker's "stop sharing" bar).
#[derive(Debug, Clone)]
pub struct LocalTrack {
    pub id: String,
    pub kind: TrackKind,
    pub source: TrackSource,
    pub ended: CancellationToken,
}

impl LocalTrack {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: TrackKind, source: TrackSource) -> Self {
        Self {
            id: id.into(),
            kind,
            source,
            ended: CancellationToken::new(),
        }
    }

    /// Stop capturing.
    pub fn stop(&self) {
        self.ended.cancel();
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended.is_cancelled()
    }
}

/// Notifications from the SDK.
#[derive(Debug, Clone)]
pub enum SdkEvent {
    ParticipantConnected(ParticipantSnapshot),
    ParticipantDisconnected {
        sid: Sid,
    },
    TrackPublished {
        sid: Sid,
        publication: PublicationSnapshot,
    },
    TrackUnpublished {
        sid: Sid,
        kind: TrackKind,
        source: TrackSource,
    },
    TrackMuted {
        sid: Sid,
        kind: TrackKind,
        source: TrackSource,
    },
    TrackUnmuted {
        sid: Sid,
        kind: TrackKind,
        source: TrackSource,
    },
    /// Data-channel payload. `from` is the transport-level sender, when known.
    DataReceived {
        payload: Bytes,
        from: Option<Sid>,
    },
    ActiveSpeakersChanged {
        speakers: Vec<Sid>,
    },
    ConnectionStateChanged(ConnectionState),
    Disconnected(DisconnectReason),
}

/// Queries and actions on a connected media session.
///
/// Queries are synchronous reads of SDK state; actions are async because the
/// SDK may suspend on them (capture prompts, signalling round trips).
#[async_trait]
pub trait MediaSession: Send + Sync {
    fn local_sid(&self) -> Sid;

    fn local_identity(&self) -> String;

    fn connection_state(&self) -> ConnectionState;

    fn membership(&self) -> MembershipSnapshot;

    /// Remote participants currently known to the SDK.
    fn remote_participants(&self) -> Vec<ParticipantSnapshot>;

    /// Look up one participant (remote or local).
    fn participant(&self, sid: &Sid) -> Option<ParticipantSnapshot>;

    fn local_participant(&self) -> ParticipantSnapshot;

    /// Send on the reliable data channel to every connected peer.
    async fn publish_data(&self, payload: Bytes) -> Result<(), SdkError>;

    async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), SdkError>;

    async fn set_camera_enabled(&self, enabled: bool) -> Result<(), SdkError>;

    /// Capture microphone and/or camera tracks (not yet published).
    async fn create_local_tracks(&self, request: CaptureRequest)
        -> Result<Vec<LocalTrack>, SdkError>;

    /// Capture the screen: one video track plus, optionally, an audio track.
    async fn create_screen_tracks(&self, with_audio: bool) -> Result<Vec<LocalTrack>, SdkError>;

    async fn publish_track(&self, track: &LocalTrack) -> Result<(), SdkError>;

    async fn unpublish_track(&self, track: &LocalTrack) -> Result<(), SdkError>;

    /// Subscribe to or drop a remote participant's track from `source`.
    fn set_subscribed(&self, sid: &Sid, source: TrackSource, subscribed: bool);

    async fn disconnect(&self);
}
