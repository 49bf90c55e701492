//! Wall-clock source for message timestamps.
//!
//! Wire timestamps are epoch milliseconds, but all local timing uses
//! `tokio::time::Instant`. `TokioClock` derives epoch time from the tokio
//! clock so both move together under `tokio::time::pause`.

use std::fmt;
use sync_protocol::EpochMillis;
use tokio::time::Instant;

/// Source of epoch-millisecond timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_ms(&self) -> EpochMillis;
}

/// Epoch clock anchored at construction and advanced by the tokio clock.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin_ms: EpochMillis,
    origin: Instant,
}

impl TokioClock {
    /// Anchor at the current wall-clock time.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(chrono::Utc::now().timestamp_millis())
    }

    /// Anchor at a fixed epoch time (deterministic tests and simulations).
    #[must_use]
    pub fn starting_at(origin_ms: EpochMillis) -> Self {
        Self {
            origin_ms,
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> EpochMillis {
        let elapsed = i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.origin_ms.saturating_add(elapsed)
    }
}
