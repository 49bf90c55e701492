//! Message types carried on the broadcast channel.

use crate::sid::Sid;
use crate::EpochMillis;
use serde::{Deserialize, Deserializer, Serialize};

/// Tagged union of every object published on the channel.
///
/// The `type` field selects the variant. Receivers must treat every variant as
/// idempotent and timestamp-aware: duplicates and reordering are normal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastMessage {
    /// A new joiner announcing itself.
    PeerHello(PeerHello),
    /// A peer reporting its own microphone state.
    MicState(MicStateReport),
    /// A new joiner asking everyone for their microphone state.
    MicStateReq(MicStateRequest),
    /// Claim of the single screen-share slot.
    ScreenShareClaim(ScreenShareNotice),
    /// Best-effort release of the screen-share slot.
    ScreenShareRelease(ScreenShareNotice),
    /// Ephemeral chat line.
    Chat(ChatMessage),
}

impl BroadcastMessage {
    /// Wire name of the variant, used for bounded metric labels.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            BroadcastMessage::PeerHello(_) => "peer_hello",
            BroadcastMessage::MicState(_) => "mic_state",
            BroadcastMessage::MicStateReq(_) => "mic_state_req",
            BroadcastMessage::ScreenShareClaim(_) => "screen_share_claim",
            BroadcastMessage::ScreenShareRelease(_) => "screen_share_release",
            BroadcastMessage::Chat(_) => "chat",
        }
    }

    /// Sender timestamp (0 when the sender omitted it).
    #[must_use]
    pub const fn ts(&self) -> EpochMillis {
        match self {
            BroadcastMessage::PeerHello(m) => m.ts,
            BroadcastMessage::MicState(m) => m.ts,
            BroadcastMessage::MicStateReq(m) => m.ts,
            BroadcastMessage::ScreenShareClaim(m) | BroadcastMessage::ScreenShareRelease(m) => m.ts,
            BroadcastMessage::Chat(m) => m.ts,
        }
    }

    /// Sender sid as stated in the payload, if any.
    ///
    /// Chat lines carry a display name rather than a sid.
    #[must_use]
    pub fn payload_sid(&self) -> Option<&Sid> {
        let sid = match self {
            BroadcastMessage::PeerHello(m) => &m.sid,
            BroadcastMessage::MicState(m) => &m.sid,
            BroadcastMessage::MicStateReq(m) => &m.from_sid,
            BroadcastMessage::ScreenShareClaim(m) | BroadcastMessage::ScreenShareRelease(m) => {
                &m.sid
            }
            BroadcastMessage::Chat(_) => return None,
        };
        if sid.is_empty() {
            None
        } else {
            Some(sid)
        }
    }
}

/// `peer_hello`: announce arrival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerHello {
    #[serde(default)]
    pub sid: Sid,
    #[serde(default)]
    pub ts: EpochMillis,
    /// Position within the sender's burst (1-based, diagnostic only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
}

/// `mic_state`: the sender's microphone state (`muted = !enabled`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicStateReport {
    #[serde(default)]
    pub sid: Sid,
    #[serde(default)]
    pub ts: EpochMillis,
    #[serde(deserialize_with = "deserialize_flag")]
    pub enabled: bool,
    /// Why the sender published (join, toggle, reply, ...), diagnostic only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
}

/// `mic_state_req`: ask every other peer to report its microphone state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicStateRequest {
    #[serde(default, alias = "from")]
    pub from_sid: Sid,
    #[serde(default)]
    pub from_key: String,
    #[serde(default)]
    pub ts: EpochMillis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
}

/// `screen_share_claim` / `screen_share_release`.
///
/// For a claim, `ts` is the moment the sender decided to share, not the
/// moment the message was sent; every resend of a claim carries the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenShareNotice {
    #[serde(default)]
    pub sid: Sid,
    #[serde(default)]
    pub ts: EpochMillis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

/// `chat`: ephemeral chat line, outside the state protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ts: EpochMillis,
}

/// Accepts `true`/`false` as well as the integers `0`/`1`.
///
/// Anything else (strings, null, other numbers) is rejected so that a sloppy
/// sender can never be read as "enabled".
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Int(0) => Ok(false),
        Flag::Int(1) => Ok(true),
        Flag::Int(other) => Err(serde::de::Error::custom(format!(
            "flag must be 0 or 1, got {other}"
        ))),
    }
}
