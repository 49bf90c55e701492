//! Screen-share arbitration.
//!
//! There is one screen-share slot per room and no coordinator. Each peer
//! that starts sharing broadcasts a claim stamped with the moment it decided
//! to share. A sharing peer that sees a claim from someone else compares the
//! two: the later claim wins, equal timestamps go to the larger sid. Every
//! peer applies the same total order, so once both claims are seen everyone
//! agrees on the winner and exactly one side yields.
//!
//! Separately, each peer keeps the list of remote screen publications it can
//! see and renders (and subscribes to) only the most recently added one.

use crate::errors::SyncError;
use crate::observability::metrics;
use std::collections::HashMap;
use sync_protocol::{EpochMillis, Sid};
use tracing::{debug, info};

/// Local share lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalShareState {
    #[default]
    Idle,
    /// Capturing; the claim has been decided but tracks are not published.
    Starting { attempt: u64, claimed_at: EpochMillis },
    Active { attempt: u64, claimed_at: EpochMillis },
}

impl LocalShareState {
    #[must_use]
    pub const fn claimed_at(&self) -> Option<EpochMillis> {
        match self {
            LocalShareState::Idle => None,
            LocalShareState::Starting { claimed_at, .. }
            | LocalShareState::Active { claimed_at, .. } => Some(*claimed_at),
        }
    }

    #[must_use]
    pub const fn attempt(&self) -> Option<u64> {
        match self {
            LocalShareState::Idle => None,
            LocalShareState::Starting { attempt, .. } | LocalShareState::Active { attempt, .. } => {
                Some(*attempt)
            }
        }
    }

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self, LocalShareState::Idle)
    }
}

/// What to do about a remote claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimDecision {
    /// The remote claim wins: stop the local share. The state is already idle.
    Yield { winner: Sid, attempt: u64 },
    /// The local claim wins.
    Hold,
    /// Not sharing locally; the claim was only recorded.
    Recorded,
    /// The claim was ours or older than one already stored.
    Ignored,
}

/// Whether a local claim `(mine_ts, mine)` loses to `(other_ts, other)`.
#[must_use]
pub fn should_yield(mine_ts: EpochMillis, mine: &Sid, other_ts: EpochMillis, other: &Sid) -> bool {
    other_ts > mine_ts || (other_ts == mine_ts && other > mine)
}

/// Arbitrates the screen-share slot as seen by one peer.
#[derive(Debug)]
pub struct ScreenShareArbiter {
    local_sid: Sid,
    local: LocalShareState,
    next_attempt: u64,
    claims: HashMap<Sid, EpochMillis>,
    /// The last local attempt that yielded, and to whom.
    superseded: Option<(u64, Sid)>,
    /// Remote sids with a published screen track, oldest first.
    shares: Vec<Sid>,
}

impl ScreenShareArbiter {
    #[must_use]
    pub fn new(local_sid: Sid) -> Self {
        Self {
            local_sid,
            local: LocalShareState::Idle,
            next_attempt: 0,
            claims: HashMap::new(),
            superseded: None,
            shares: Vec::new(),
        }
    }

    #[must_use]
    pub const fn local_state(&self) -> LocalShareState {
        self.local
    }

    /// Decide to share now. Returns the attempt number and the claim time.
    ///
    /// # Errors
    ///
    /// `AlreadySharing` if a share is starting or active.
    /// `ScreenShareSuperseded` if a claim already seen beats one stamped
    /// `now_ms` (a skewed local clock).
    pub fn begin(&mut self, now_ms: EpochMillis) -> Result<(u64, EpochMillis), SyncError> {
        if !self.local.is_idle() {
            return Err(SyncError::AlreadySharing);
        }
        if let Some((winner, winner_ts)) = self.winner() {
            if should_yield(now_ms, &self.local_sid, winner_ts, &winner) {
                info!(
                    target: "sync.screen",
                    winner = %winner,
                    winner_ts,
                    claimed_at = now_ms,
                    "Refusing screen share behind a newer known claim"
                );
                return Err(SyncError::ScreenShareSuperseded { winner });
            }
        }
        self.next_attempt += 1;
        let attempt = self.next_attempt;
        self.local = LocalShareState::Starting {
            attempt,
            claimed_at: now_ms,
        };
        debug!(target: "sync.screen", attempt, claimed_at = now_ms, "Screen share starting");
        Ok((attempt, now_ms))
    }

    /// Whether `attempt` is still the current local share.
    #[must_use]
    pub fn is_current(&self, attempt: u64) -> bool {
        self.local.attempt() == Some(attempt)
    }

    /// Mark `attempt` as published. Returns `false` if it was superseded.
    pub fn activate(&mut self, attempt: u64) -> bool {
        match self.local {
            LocalShareState::Starting {
                attempt: current,
                claimed_at,
            } if current == attempt => {
                self.local = LocalShareState::Active {
                    attempt,
                    claimed_at,
                };
                true
            }
            _ => false,
        }
    }

    /// The claim `attempt` yielded to, if it was superseded rather than
    /// cancelled.
    #[must_use]
    pub fn superseded_by(&self, attempt: u64) -> Option<&Sid> {
        self.superseded
            .as_ref()
            .filter(|(yielded, _)| *yielded == attempt)
            .map(|(_, winner)| winner)
    }

    /// Stop the local share. Returns the released claim time, if any.
    pub fn release(&mut self) -> Option<EpochMillis> {
        let claimed_at = self.local.claimed_at();
        self.local = LocalShareState::Idle;
        claimed_at
    }

    /// Handle a `screen_share_claim` from `from` stamped `ts`.
    pub fn observe_claim(&mut self, from: &Sid, ts: EpochMillis) -> ClaimDecision {
        if *from == self.local_sid || from.is_empty() {
            return ClaimDecision::Ignored;
        }
        if self.claims.get(from).is_some_and(|stored| *stored > ts) {
            return ClaimDecision::Ignored;
        }
        self.claims.insert(from.clone(), ts);

        let (Some(mine_ts), Some(attempt)) = (self.local.claimed_at(), self.local.attempt()) else {
            return ClaimDecision::Recorded;
        };
        if should_yield(mine_ts, &self.local_sid, ts, from) {
            self.local = LocalShareState::Idle;
            self.superseded = Some((attempt, from.clone()));
            metrics::record_screen_share_yield();
            info!(
                target: "sync.screen",
                winner = %from,
                winner_ts = ts,
                claimed_at = mine_ts,
                "Yielding screen share to newer claim"
            );
            ClaimDecision::Yield {
                winner: from.clone(),
                attempt,
            }
        } else {
            debug!(target: "sync.screen", loser = %from, "Holding screen share against older claim");
            ClaimDecision::Hold
        }
    }

    /// Handle a `screen_share_release`. Drops the stored claim unless a newer
    /// one replaced it.
    pub fn observe_release(&mut self, from: &Sid, ts: EpochMillis) {
        if self.claims.get(from).is_some_and(|stored| *stored <= ts) {
            self.claims.remove(from);
        }
    }

    /// Winning claim among every claim seen, the local one included.
    #[must_use]
    pub fn winner(&self) -> Option<(Sid, EpochMillis)> {
        let local = self
            .local
            .claimed_at()
            .map(|ts| (self.local_sid.clone(), ts));
        self.claims
            .iter()
            .map(|(sid, ts)| (sid.clone(), *ts))
            .chain(local)
            .max_by(|(a_sid, a_ts), (b_sid, b_ts)| a_ts.cmp(b_ts).then_with(|| a_sid.cmp(b_sid)))
    }

    /// Note a remote screen publication. Returns `true` if it is new.
    pub fn add_share(&mut self, sid: &Sid) -> bool {
        if self.shares.contains(sid) {
            return false;
        }
        self.shares.push(sid.clone());
        true
    }

    /// Forget a remote screen publication. Returns `true` if it was known.
    pub fn remove_share(&mut self, sid: &Sid) -> bool {
        let before = self.shares.len();
        self.shares.retain(|s| s != sid);
        self.shares.len() != before
    }

    /// The remote share to render: the most recently added.
    #[must_use]
    pub fn active_share(&self) -> Option<&Sid> {
        self.shares.last()
    }

    /// Subscription state for every known remote share: only the active one
    /// is subscribed.
    #[must_use]
    pub fn subscription_plan(&self) -> Vec<(Sid, bool)> {
        let active = self.active_share();
        self.shares
            .iter()
            .map(|sid| (sid.clone(), Some(sid) == active))
            .collect()
    }

    /// Drop everything owned by a departed participant. Returns `true` if it
    /// held the active share.
    pub fn remove_participant(&mut self, sid: &Sid) -> bool {
        let was_active = self.active_share() == Some(sid);
        self.claims.remove(sid);
        self.remove_share(sid);
        was_active
    }
}
