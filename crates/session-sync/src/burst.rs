//! Burst scheduling.
//!
//! The channel has no acknowledgements, so anything that must arrive is sent
//! several times on a fixed schedule. A burst is one spawned task that sleeps
//! until each offset (measured from when the burst was scheduled) and then
//! posts a tick back to the owning actor, which does the actual send. Ticks
//! carry their 1-based position in the burst.
//!
//! All bursts of a scheduler stop when its cancellation token fires, which is
//! tied to session teardown.

use crate::observability::metrics;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Spawns delayed ticks into an actor's internal channel.
#[derive(Debug, Clone)]
pub struct BurstScheduler<M> {
    tx: mpsc::UnboundedSender<M>,
    cancel: CancellationToken,
}

impl<M: Send + 'static> BurstScheduler<M> {
    /// Ticks go to `tx`; every burst stops when `cancel` fires.
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<M>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Post `make(n)` at each offset in `delays`.
    ///
    /// Returns a token that stops this burst alone.
    pub fn schedule<F>(&self, kind: &'static str, delays: &[Duration], make: F) -> CancellationToken
    where
        F: Fn(u32) -> M + Send + 'static,
    {
        metrics::record_burst_scheduled(kind);
        let token = self.cancel.child_token();
        let cancel = token.clone();
        let tx = self.tx.clone();
        let delays = delays.to_vec();
        let start = Instant::now();

        tokio::spawn(async move {
            for (n, delay) in (1u32..).zip(delays) {
                tokio::select! {
                    () = cancel.cancelled() => {
                        trace!(target: "sync.burst", kind, n, "Burst cancelled");
                        return;
                    }
                    () = sleep_until(start + delay) => {}
                }
                if tx.send(make(n)).is_err() {
                    return;
                }
            }
        });

        token
    }

    /// Stop every burst of this scheduler.
    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }
}
