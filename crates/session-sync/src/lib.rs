//! Session Sync Library
//!
//! Peer-to-peer session-state synchronization for a conferencing client. Each
//! participant runs one `SessionActor` on top of a media SDK and keeps a
//! consistent picture of the room without any server-side coordinator:
//!
//! - Who is present (SDK events, channel traffic, periodic reconciliation)
//! - Whether each participant's microphone is muted, with a confidence level
//! - Which single participant owns the screen-share slot
//!
//! # Architecture
//!
//! ```text
//! SessionActor (one per joined room)
//! ├── PresenceTracker      - tiles, tombstones, grace-based eviction
//! ├── MicReconciler        - multi-source mute resolution, anti-flap
//! ├── ScreenShareArbiter   - last-claim-wins with sid tie-break
//! ├── BroadcastChannel     - JSON messages over the SDK data channel
//! └── BurstScheduler       - redundant sends on fixed schedules
//! ```
//!
//! All peer communication is best-effort broadcast. Convergence comes from
//! redundancy (bursts), idempotent handling, timestamps with a deterministic
//! tie-break, and the reconciliation sweep.
//!
//! # Modules
//!
//! - [`actors`] - Session actor, its handle and messages
//! - [`sdk`] - Media SDK boundary and the in-memory loopback room
//! - [`config`] - Timing configuration from environment
//! - [`errors`] - Error types surfaced to callers

#![warn(clippy::pedantic)]

pub mod actors;
pub mod burst;
pub mod channel;
pub mod clock;
pub mod config;
pub mod errors;
pub mod mic;
pub mod observability;
pub mod presence;
pub mod screen_share;
pub mod sdk;

pub use actors::{SessionActor, SessionActorHandle, SessionSnapshot, ViewUpdate};
pub use config::SyncConfig;
pub use errors::SyncError;
