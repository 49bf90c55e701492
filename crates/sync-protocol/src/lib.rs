//! Broadcast channel protocol for peer session-state synchronization.
//!
//! Every peer in a conference publishes small UTF-8 JSON objects on the media
//! session's reliable data channel. This crate owns the shape of those objects
//! and their encoding; it does not know about timers, presence, or the SDK.
//!
//! The channel gives no ordering guarantee and no replay for late joiners, so
//! every message carries the sender's connection id and an epoch-millisecond
//! timestamp that receivers use for last-writer-wins decisions.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod message;
pub mod sid;

pub use codec::{decode, encode, CodecError};
pub use message::{
    BroadcastMessage, ChatMessage, MicStateReport, MicStateRequest, PeerHello, ScreenShareNotice,
};
pub use sid::Sid;

/// Epoch milliseconds, as carried in the `ts` field of every message.
pub type EpochMillis = i64;
