//! Presence tracking.
//!
//! One record per participant that should have a tile. Records are created
//! by SDK connect events, by the initial membership enumeration, or by a
//! channel message from an unseen sid, and destroyed by SDK disconnect events
//! or by the reconciliation sweep.
//!
//! The sweep compares tracked sids with the SDK's membership. SDK reads are
//! unreliable right after joining and during reconnects, so a sweep may be
//! suppressed, and a participant is only evicted after missing several
//! consecutive sweeps and outliving a per-record grace period.

use crate::config::SyncConfig;
use crate::sdk::probe::{collect_live_sids, remote_count};
use crate::sdk::{ConnectionState, MembershipSnapshot};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use sync_protocol::Sid;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Presence state of one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub sid: Sid,
    pub display_name: String,
    pub is_local: bool,
    pub first_seen_at: Instant,
    /// Last time the SDK listed this sid (or first sight, if never listed).
    pub last_confirmed_live_at: Instant,
    /// Consecutive completed sweeps that did not list this sid.
    pub missed_sweeps: u32,
}

/// Result of observing a sid on the broadcast channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelObservation {
    /// First sight; a record was created.
    Added,
    Known,
    /// The sid left or was evicted; late messages must not resurrect it.
    Tombstoned,
}

/// Why a sweep evicted nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Still inside the warm-up window after start.
    WarmUp,
    /// The SDK is not connected.
    NotConnected,
    /// Zero remotes reported while tiles exist, and a non-empty read was seen
    /// too recently for the zero to be trusted.
    EmptyRead,
    /// Membership could not be enumerated.
    Unenumerable,
}

impl SuppressReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SuppressReason::WarmUp => "warm_up",
            SuppressReason::NotConnected => "not_connected",
            SuppressReason::EmptyRead => "empty_read",
            SuppressReason::Unenumerable => "unenumerable",
        }
    }
}

/// Result of one reconciliation sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    Suppressed(SuppressReason),
    Completed {
        /// Sids whose records were removed by this sweep.
        evicted: Vec<Sid>,
        /// Sids the SDK lists that have no record yet.
        unknown_live: Vec<Sid>,
    },
}

/// Tracks which participants are present.
#[derive(Debug)]
pub struct PresenceTracker {
    local_sid: Sid,
    records: BTreeMap<Sid, PresenceRecord>,
    tombstones: HashSet<Sid>,
    prune_enabled_at: Instant,
    last_nonempty_at: Option<Instant>,
    empty_read_guard: Duration,
    presence_grace: Duration,
    missed_sweeps_before_eviction: u32,
}

impl PresenceTracker {
    /// Start tracking with the local participant already present.
    #[must_use]
    pub fn new(local_sid: Sid, local_name: String, now: Instant, config: &SyncConfig) -> Self {
        let mut records = BTreeMap::new();
        records.insert(
            local_sid.clone(),
            PresenceRecord {
                sid: local_sid.clone(),
                display_name: local_name,
                is_local: true,
                first_seen_at: now,
                last_confirmed_live_at: now,
                missed_sweeps: 0,
            },
        );
        Self {
            local_sid,
            records,
            tombstones: HashSet::new(),
            prune_enabled_at: now + config.prune_warmup,
            last_nonempty_at: None,
            empty_read_guard: config.empty_read_guard,
            presence_grace: config.presence_grace,
            missed_sweeps_before_eviction: config.missed_sweeps_before_eviction,
        }
    }

    /// Record a participant the SDK reports as connected.
    ///
    /// The SDK is authoritative, so this clears any tombstone. Returns `true`
    /// if the record is new.
    pub fn observe_from_sdk(&mut self, sid: &Sid, display_name: &str, now: Instant) -> bool {
        if sid.is_empty() {
            return false;
        }
        self.tombstones.remove(sid);
        if let Some(record) = self.records.get_mut(sid) {
            if !display_name.is_empty() {
                record.display_name = display_name.to_string();
            }
            record.last_confirmed_live_at = now;
            record.missed_sweeps = 0;
            return false;
        }
        debug!(target: "sync.presence", sid = %sid, "Participant present");
        self.records.insert(
            sid.clone(),
            PresenceRecord {
                sid: sid.clone(),
                display_name: if display_name.is_empty() {
                    sid.to_string()
                } else {
                    display_name.to_string()
                },
                is_local: false,
                first_seen_at: now,
                last_confirmed_live_at: now,
                missed_sweeps: 0,
            },
        );
        true
    }

    /// Record a sid seen as the sender of a channel message.
    pub fn observe_from_channel(&mut self, sid: &Sid, now: Instant) -> ChannelObservation {
        if self.tombstones.contains(sid) {
            trace!(target: "sync.presence", sid = %sid, "Ignoring message from departed participant");
            return ChannelObservation::Tombstoned;
        }
        if self.records.contains_key(sid) {
            return ChannelObservation::Known;
        }
        debug!(target: "sync.presence", sid = %sid, "Participant discovered from channel");
        self.records.insert(
            sid.clone(),
            PresenceRecord {
                sid: sid.clone(),
                display_name: sid.to_string(),
                is_local: false,
                first_seen_at: now,
                last_confirmed_live_at: now,
                missed_sweeps: 0,
            },
        );
        ChannelObservation::Added
    }

    /// Remove a participant and tombstone its sid. The local record is never
    /// removed.
    pub fn remove(&mut self, sid: &Sid) -> Option<PresenceRecord> {
        if *sid == self.local_sid {
            return None;
        }
        self.tombstones.insert(sid.clone());
        self.records.remove(sid)
    }

    /// Compare tracked participants with the SDK's membership and evict the
    /// ones that have been gone long enough.
    pub fn sweep(&mut self, membership: &MembershipSnapshot, now: Instant) -> SweepOutcome {
        if now < self.prune_enabled_at {
            return SweepOutcome::Suppressed(SuppressReason::WarmUp);
        }
        if membership.state != ConnectionState::Connected {
            return SweepOutcome::Suppressed(SuppressReason::NotConnected);
        }
        if membership.views.is_empty() {
            return SweepOutcome::Suppressed(SuppressReason::Unenumerable);
        }

        let remote = remote_count(membership);
        if remote > 0 {
            self.last_nonempty_at = Some(now);
        }

        let tiles = self.records.len();
        if remote == 0 && tiles > 1 {
            let recent = self
                .last_nonempty_at
                .is_none_or(|at| now.duration_since(at) < self.empty_read_guard);
            if recent {
                return SweepOutcome::Suppressed(SuppressReason::EmptyRead);
            }
        }

        let mut live = collect_live_sids(membership);
        live.insert(self.local_sid.clone());
        if remote > 0 && live.len() <= 1 && tiles > 1 {
            return SweepOutcome::Suppressed(SuppressReason::Unenumerable);
        }

        let mut evicted = Vec::new();
        for record in self.records.values_mut().filter(|r| !r.is_local) {
            if live.contains(&record.sid) {
                record.missed_sweeps = 0;
                record.last_confirmed_live_at = now;
                continue;
            }
            record.missed_sweeps = record.missed_sweeps.saturating_add(1);
            let absent_for = now.duration_since(record.last_confirmed_live_at);
            if record.missed_sweeps >= self.missed_sweeps_before_eviction
                && absent_for >= self.presence_grace
            {
                evicted.push(record.sid.clone());
            }
        }

        for sid in &evicted {
            self.remove(sid);
            info!(target: "sync.presence", sid = %sid, "Evicted participant missing from membership");
        }

        let mut unknown_live: Vec<Sid> = live
            .into_iter()
            .filter(|sid| !self.records.contains_key(sid))
            .collect();
        unknown_live.sort();

        SweepOutcome::Completed {
            evicted,
            unknown_live,
        }
    }

    #[must_use]
    pub fn contains(&self, sid: &Sid) -> bool {
        self.records.contains_key(sid)
    }

    #[must_use]
    pub fn is_tombstoned(&self, sid: &Sid) -> bool {
        self.tombstones.contains(sid)
    }

    #[must_use]
    pub fn record(&self, sid: &Sid) -> Option<&PresenceRecord> {
        self.records.get(sid)
    }

    /// All records, in sid order.
    pub fn records(&self) -> impl Iterator<Item = &PresenceRecord> {
        self.records.values()
    }

    /// Number of tiles, local included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
