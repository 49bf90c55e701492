//! Session actor mailbox monitoring.
//!
//! | Level    | Depth    |
//! |----------|----------|
//! | Normal   | <= 32    |
//! | Warning  | 33-128   |
//! | Critical | > 128    |

use crate::observability::metrics;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

pub const SESSION_MAILBOX_NORMAL: usize = 32;
pub const SESSION_MAILBOX_WARNING: usize = 128;

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks the session actor's backlog and emits the depth gauge.
#[derive(Debug)]
pub struct MailboxMonitor {
    local_sid: String,
    peak_depth: AtomicUsize,
    last_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(local_sid: impl Into<String>) -> Self {
        Self {
            local_sid: local_sid.into(),
            peak_depth: AtomicUsize::new(0),
            last_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record the backlog observed when a message is taken off the mailbox.
    pub fn record_depth(&self, depth: usize) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        let previous = self.last_depth.swap(depth, Ordering::Relaxed);
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);
        metrics::set_actor_mailbox_depth(depth);

        match level_for_depth(depth) {
            MailboxLevel::Critical => warn!(
                target: "sync.session.mailbox",
                local_sid = %self.local_sid,
                depth,
                threshold = SESSION_MAILBOX_WARNING,
                "Mailbox depth critical"
            ),
            // Log once when crossing into warning
            MailboxLevel::Warning if level_for_depth(previous) == MailboxLevel::Normal => debug!(
                target: "sync.session.mailbox",
                local_sid = %self.local_sid,
                depth,
                "Mailbox depth elevated"
            ),
            _ => {}
        }
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        level_for_depth(self.last_depth.load(Ordering::Relaxed))
    }
}

fn level_for_depth(depth: usize) -> MailboxLevel {
    if depth > SESSION_MAILBOX_WARNING {
        MailboxLevel::Critical
    } else if depth > SESSION_MAILBOX_NORMAL {
        MailboxLevel::Warning
    } else {
        MailboxLevel::Normal
    }
}
