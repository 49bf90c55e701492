//! View-update collectors.
//!
//! Wraps a `ViewUpdate` receiver and keeps everything seen so far, so a test
//! can drain once and then ask several questions about the history.

use session_sync::actors::RemovalReason;
use session_sync::mic::Confidence;
use session_sync::ViewUpdate;
use std::time::Duration;
use sync_protocol::Sid;
use tokio::sync::broadcast;

/// Records every `ViewUpdate` from one session.
#[derive(Debug)]
pub struct ViewCollector {
    rx: broadcast::Receiver<ViewUpdate>,
    seen: Vec<ViewUpdate>,
}

impl ViewCollector {
    #[must_use]
    pub fn new(rx: broadcast::Receiver<ViewUpdate>) -> Self {
        Self {
            rx,
            seen: Vec::new(),
        }
    }

    /// Pull whatever is queued without waiting.
    pub fn drain(&mut self) -> &[ViewUpdate] {
        loop {
            match self.rx.try_recv() {
                Ok(update) => self.seen.push(update),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    panic!("view collector lagged by {skipped} updates");
                }
                Err(_) => break,
            }
        }
        &self.seen
    }

    /// Wait until an update matching `predicate` arrives, up to `timeout`.
    ///
    /// Earlier matching updates count. Panics on timeout.
    pub async fn wait_for<F>(&mut self, timeout: Duration, predicate: F) -> ViewUpdate
    where
        F: Fn(&ViewUpdate) -> bool,
    {
        if let Some(found) = self.drain().iter().find(|u| predicate(u)) {
            return found.clone();
        }
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Ok(update)) => {
                    self.seen.push(update.clone());
                    if predicate(&update) {
                        return update;
                    }
                }
                Ok(Err(e)) => panic!("view update stream ended: {e}"),
                Err(_) => panic!("no matching view update within {timeout:?}"),
            }
        }
    }

    /// Everything seen so far.
    #[must_use]
    pub fn seen(&self) -> &[ViewUpdate] {
        &self.seen
    }

    /// `(sender, text)` of every chat line seen.
    pub fn chats(&mut self) -> Vec<(String, String)> {
        self.drain()
            .iter()
            .filter_map(|u| match u {
                ViewUpdate::Chat { sender, text, .. } => Some((sender.clone(), text.clone())),
                _ => None,
            })
            .collect()
    }

    /// Sids of tiles added, in order.
    pub fn tiles_added(&mut self) -> Vec<Sid> {
        self.drain()
            .iter()
            .filter_map(|u| match u {
                ViewUpdate::TileAdded { sid, .. } => Some(sid.clone()),
                _ => None,
            })
            .collect()
    }

    /// Tiles removed, in order.
    pub fn tiles_removed(&mut self) -> Vec<(Sid, RemovalReason)> {
        self.drain()
            .iter()
            .filter_map(|u| match u {
                ViewUpdate::TileRemoved { sid, reason } => Some((sid.clone(), *reason)),
                _ => None,
            })
            .collect()
    }

    /// Mic badges shown for `sid`, in order.
    pub fn mic_badges(&mut self, sid: &Sid) -> Vec<(Option<bool>, Confidence)> {
        self.drain()
            .iter()
            .filter_map(|u| match u {
                ViewUpdate::MicBadge {
                    sid: badge_sid,
                    muted,
                    confidence,
                } if badge_sid == sid => Some((*muted, *confidence)),
                _ => None,
            })
            .collect()
    }

    /// Values the active remote screen took, in order.
    pub fn active_screens(&mut self) -> Vec<Option<Sid>> {
        self.drain()
            .iter()
            .filter_map(|u| match u {
                ViewUpdate::ActiveScreen { sid } => Some(sid.clone()),
                _ => None,
            })
            .collect()
    }
}
