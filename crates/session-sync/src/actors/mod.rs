//! Session actor.
//!
//! One `SessionActor` per joined room owns all synchronization state
//! (presence, mic states, screen-share arbitration) and is the only writer of
//! it. It consumes three inputs:
//!
//! ```text
//! SdkEvent stream ───┐
//! burst / media ticks ├──> SessionActor ──> ViewUpdate broadcast
//! SessionMessage ────┘        │
//!                             └──> BroadcastChannel / MediaSession
//! ```
//!
//! Commands from the user-facing layer go through `SessionActorHandle`, with
//! request/reply over `tokio::sync::oneshot`. Teardown is driven by a
//! `CancellationToken` that also stops every pending burst.
//!
//! # Modules
//!
//! - [`session`] - `SessionActor` and its handle
//! - [`messages`] - commands, internal events and view updates
//! - [`metrics`] - mailbox monitoring

pub mod messages;
pub mod metrics;
pub mod session;

pub use messages::*;
pub use metrics::MailboxMonitor;
pub use session::{SessionActor, SessionActorHandle};
