//! # Sync Test Utilities
//!
//! Shared test utilities for session synchronization.
//!
//! ## Modules
//!
//! - `fixtures` - Participant, publication and membership builders
//! - `mock_session` - Scriptable `MediaSession` that records every call
//! - `collectors` - Helpers for reading `ViewUpdate` streams
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sync_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let (session, events) = MockSession::builder("PA_local")
//!         .with_remote(TestParticipant::new("PA_bob").with_mic(false).build())
//!         .build();
//!
//!     // Spawn a SessionActor on `session`, inject events through
//!     // `session.inject(..)`, inspect `session.sent_messages()`.
//! }
//! ```

pub mod collectors;
pub mod fixtures;
pub mod mock_session;

pub use collectors::ViewCollector;
pub use fixtures::{membership, TestParticipant, TestPublication};
pub use mock_session::{MockSession, MockSessionBuilder, RecordedCall};
