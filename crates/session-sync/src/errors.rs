//! Session synchronization error types.
//!
//! Three kinds of fault exist in this core and they are handled differently:
//!
//! - Transport faults (data publish failures, malformed payloads) are logged,
//!   counted and swallowed. The bursts and the reconciliation sweep make up for
//!   the lost message. They only reach a caller when an explicit user action
//!   could not be carried out at all.
//! - State conflicts (concurrent screen-share claims, stale mic reports) are
//!   resolved deterministically and are never errors.
//! - Media-acquisition failures (capture denied or unavailable) are returned
//!   to the caller after any partial state has been rolled back.

use crate::sdk::SdkError;
use sync_protocol::Sid;
use thiserror::Error;

/// Session synchronization error type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The media session rejected or could not carry an operation.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Camera, microphone or screen capture failed.
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// A local screen share is already starting or active.
    #[error("Screen share already in progress")]
    AlreadySharing,

    /// Another peer's claim won while this share was starting.
    #[error("Screen share superseded by {winner}")]
    ScreenShareSuperseded { winner: Sid },

    /// The camera is held off while the screen is being shared.
    #[error("Camera is disabled while screen sharing")]
    CameraHeldByScreenShare,

    /// The session actor is gone (left, disconnected or cancelled).
    #[error("Session closed")]
    SessionClosed,
}

impl SyncError {
    /// Whether this is a transport fault, which callers may safely ignore.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::SessionClosed)
    }

    /// Text suitable for the user-facing layer.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Transport(_) => "Connection problem. Please try again.".to_string(),
            SyncError::MediaAcquisition(reason) => {
                format!("Could not access your camera, microphone or screen: {reason}")
            }
            SyncError::AlreadySharing => "You are already sharing your screen.".to_string(),
            SyncError::ScreenShareSuperseded { .. } => {
                "Someone else started sharing their screen.".to_string()
            }
            SyncError::CameraHeldByScreenShare => {
                "Stop screen sharing to turn the camera back on.".to_string()
            }
            SyncError::SessionClosed => "You have left the room.".to_string(),
        }
    }
}

impl From<SdkError> for SyncError {
    fn from(err: SdkError) -> Self {
        match err {
            SdkError::CaptureDenied(reason) | SdkError::CaptureUnavailable(reason) => {
                SyncError::MediaAcquisition(reason)
            }
            SdkError::NotConnected => SyncError::Transport("not connected".to_string()),
            SdkError::PublishFailed(reason) => SyncError::Transport(reason),
            SdkError::TrackNotFound(id) => SyncError::Transport(format!("unknown track {id}")),
        }
    }
}
