//! Mic-state reconciliation.
//!
//! Every participant's mute badge is resolved from whatever signals are
//! available, strongest first, and each answer carries a confidence. Writes
//! are gated so that a weak signal cannot flip a recently established strong
//! one.
//!
//! Resolution order (first signal that answers wins):
//!
//! 1. Local participant: the local toggle and whether an audio track exists.
//! 2. A fresh `mic_state` broadcast from the participant (authoritative).
//! 3. Audio activity: speaking or a level above threshold means live (heuristic).
//! 4. The participant-level SDK microphone flag. Enabled is authoritative at
//!    once; disabled only after a short grace, heuristic before that.
//! 5. Mute flags on microphone publications (authoritative when readable).
//!    Unreadable flags fall back to muted (heuristic) after a grace.
//! 6. No microphone publication: muted (heuristic) after a grace.
//!
//! Anything else is unknown.

use crate::config::SyncConfig;
use crate::observability::metrics;
use crate::sdk::probe::microphone_publications;
use crate::sdk::{MuteProbe, ParticipantSnapshot};
use std::collections::HashMap;
use std::time::Duration;
use sync_protocol::{EpochMillis, Sid};
use tokio::time::Instant;
use tracing::{debug, trace};

/// How much a mic-state observation can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Confidence {
    Unknown = 0,
    Heuristic = 1,
    Authoritative = 2,
}

/// Stored mic state of one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicState {
    /// `None` while unknown.
    pub muted: Option<bool>,
    pub confidence: Confidence,
    pub updated_at: Instant,
}

/// One resolved answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicObservation {
    pub muted: bool,
    pub confidence: Confidence,
}

impl MicObservation {
    #[must_use]
    pub const fn authoritative(muted: bool) -> Self {
        Self {
            muted,
            confidence: Confidence::Authoritative,
        }
    }

    #[must_use]
    pub const fn heuristic(muted: bool) -> Self {
        Self {
            muted,
            confidence: Confidence::Heuristic,
        }
    }
}

/// What a write did to the stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Stored. `changed` is whether the displayed value changed.
    Written { changed: bool },
    /// Same value at no better confidence; only the timestamp moved.
    Refreshed,
    /// A weaker, different value arrived inside the anti-flap window.
    Rejected,
    /// Unknown never overwrites a known state.
    IgnoredUnknown,
}

impl WriteOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            WriteOutcome::Written { .. } => "written",
            WriteOutcome::Refreshed => "refreshed",
            WriteOutcome::Rejected => "rejected",
            WriteOutcome::IgnoredUnknown => "ignored_unknown",
        }
    }

    #[must_use]
    pub const fn changed(&self) -> bool {
        matches!(self, WriteOutcome::Written { changed: true })
    }
}

/// Result of recording a `mic_state` broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOutcome {
    Updated,
    /// Same timestamp and value as the stored one.
    Duplicate,
    /// Older than the stored one.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BroadcastRecord {
    enabled: bool,
    ts: EpochMillis,
}

/// Inputs to resolution for one participant.
#[derive(Debug, Clone, PartialEq)]
pub struct MicSignals {
    /// Set only for the local participant.
    pub local: Option<LocalMic>,
    pub audio_level: f32,
    pub is_speaking: bool,
    /// Participant-level "microphone enabled" flag, if the SDK exposes one.
    pub sdk_enabled: Option<bool>,
    /// Probed mute flag of each microphone publication.
    pub publication_muted: Vec<Option<bool>>,
    /// Time since the participant was first seen.
    pub observed_for: Duration,
}

/// Local microphone intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalMic {
    pub enabled: bool,
    pub has_audio: bool,
}

impl MicSignals {
    /// Signals for the local participant.
    #[must_use]
    pub fn local(enabled: bool, has_audio: bool) -> Self {
        Self {
            local: Some(LocalMic { enabled, has_audio }),
            audio_level: 0.0,
            is_speaking: false,
            sdk_enabled: None,
            publication_muted: Vec::new(),
            observed_for: Duration::ZERO,
        }
    }

    /// Signals read from a remote participant snapshot.
    #[must_use]
    pub fn remote(participant: &ParticipantSnapshot, observed_for: Duration) -> Self {
        Self {
            local: None,
            audio_level: participant.audio_level,
            is_speaking: participant.is_speaking,
            sdk_enabled: participant.microphone_enabled,
            publication_muted: microphone_publications(participant)
                .into_iter()
                .map(MuteProbe::is_muted)
                .collect(),
            observed_for,
        }
    }
}

/// Owns every participant's mic state and the broadcasts received.
#[derive(Debug)]
pub struct MicReconciler {
    states: HashMap<Sid, MicState>,
    broadcasts: HashMap<Sid, BroadcastRecord>,
    anti_flap_window: Duration,
    broadcast_ttl: Duration,
    sdk_mute_grace: Duration,
    unreadable_flags_grace: Duration,
    no_publication_grace: Duration,
    audio_level_threshold: f32,
}

impl MicReconciler {
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            states: HashMap::new(),
            broadcasts: HashMap::new(),
            anti_flap_window: config.anti_flap_window,
            broadcast_ttl: config.mic_broadcast_ttl,
            sdk_mute_grace: config.sdk_mute_grace,
            unreadable_flags_grace: config.unreadable_flags_grace,
            no_publication_grace: config.no_publication_grace,
            audio_level_threshold: config.audio_level_threshold,
        }
    }

    /// Store a `mic_state` broadcast, last writer wins by timestamp.
    ///
    /// Equal timestamps with a different value are taken in arrival order.
    pub fn record_broadcast(&mut self, sid: &Sid, enabled: bool, ts: EpochMillis) -> BroadcastOutcome {
        if let Some(previous) = self.broadcasts.get(sid) {
            if ts < previous.ts {
                trace!(target: "sync.mic", sid = %sid, ts, stored_ts = previous.ts, "Stale mic_state ignored");
                return BroadcastOutcome::Stale;
            }
            if ts == previous.ts && enabled == previous.enabled {
                return BroadcastOutcome::Duplicate;
            }
        }
        self.broadcasts
            .insert(sid.clone(), BroadcastRecord { enabled, ts });
        BroadcastOutcome::Updated
    }

    /// Last broadcast value from `sid` as `(enabled, ts)`.
    #[must_use]
    pub fn broadcast(&self, sid: &Sid) -> Option<(bool, EpochMillis)> {
        self.broadcasts.get(sid).map(|b| (b.enabled, b.ts))
    }

    /// Resolve the current mic state of `sid`. `None` means unknown.
    #[must_use]
    pub fn resolve(&self, sid: &Sid, signals: &MicSignals, now_ms: EpochMillis) -> Option<MicObservation> {
        if let Some(local) = signals.local {
            return Some(MicObservation::authoritative(!local.has_audio || !local.enabled));
        }

        if let Some(broadcast) = self.broadcasts.get(sid) {
            let age = u64::try_from(now_ms.saturating_sub(broadcast.ts)).unwrap_or(0);
            if Duration::from_millis(age) < self.broadcast_ttl {
                return Some(MicObservation::authoritative(!broadcast.enabled));
            }
        }

        if signals.is_speaking || signals.audio_level > self.audio_level_threshold {
            return Some(MicObservation::heuristic(false));
        }

        match signals.sdk_enabled {
            Some(true) => return Some(MicObservation::authoritative(false)),
            Some(false) => {
                return Some(if signals.observed_for > self.sdk_mute_grace {
                    MicObservation::authoritative(true)
                } else {
                    MicObservation::heuristic(true)
                });
            }
            None => {}
        }

        if !signals.publication_muted.is_empty() {
            if signals.publication_muted.contains(&Some(false)) {
                return Some(MicObservation::authoritative(false));
            }
            if signals.publication_muted.contains(&Some(true)) {
                return Some(MicObservation::authoritative(true));
            }
            return (signals.observed_for >= self.unreadable_flags_grace)
                .then(|| MicObservation::heuristic(true));
        }

        (signals.observed_for >= self.no_publication_grace).then(|| MicObservation::heuristic(true))
    }

    /// Apply an observation through the anti-flap gate.
    pub fn apply(&mut self, sid: &Sid, observation: Option<MicObservation>, now: Instant) -> WriteOutcome {
        let previous = self.states.get(sid).copied();
        let outcome = match observation {
            None => self.apply_unknown(sid, previous, now),
            Some(observation) => self.apply_known(sid, previous, observation, now),
        };
        metrics::record_mic_write(outcome.as_str());
        if outcome.changed() {
            debug!(
                target: "sync.mic",
                sid = %sid,
                muted = ?self.states.get(sid).and_then(|s| s.muted),
                confidence = ?self.states.get(sid).map(|s| s.confidence),
                "Mic state changed"
            );
        }
        outcome
    }

    fn apply_unknown(&mut self, sid: &Sid, previous: Option<MicState>, now: Instant) -> WriteOutcome {
        if previous.is_some_and(|p| p.confidence >= Confidence::Heuristic) {
            return WriteOutcome::IgnoredUnknown;
        }
        self.states.insert(
            sid.clone(),
            MicState {
                muted: None,
                confidence: Confidence::Unknown,
                updated_at: now,
            },
        );
        WriteOutcome::Written {
            changed: previous.and_then(|p| p.muted).is_some(),
        }
    }

    fn apply_known(
        &mut self,
        sid: &Sid,
        previous: Option<MicState>,
        observation: MicObservation,
        now: Instant,
    ) -> WriteOutcome {
        if let Some(previous) = previous {
            let same_value = previous.muted == Some(observation.muted);
            if same_value && previous.confidence >= observation.confidence {
                if let Some(state) = self.states.get_mut(sid) {
                    state.updated_at = now;
                }
                return WriteOutcome::Refreshed;
            }
            let age = now.duration_since(previous.updated_at);
            if !same_value
                && previous.confidence > observation.confidence
                && age < self.anti_flap_window
            {
                trace!(
                    target: "sync.mic",
                    sid = %sid,
                    muted = observation.muted,
                    "Weaker mic observation rejected"
                );
                return WriteOutcome::Rejected;
            }
        }
        self.states.insert(
            sid.clone(),
            MicState {
                muted: Some(observation.muted),
                confidence: observation.confidence,
                updated_at: now,
            },
        );
        WriteOutcome::Written {
            changed: previous.and_then(|p| p.muted) != Some(observation.muted),
        }
    }

    /// Resolve and apply in one step.
    pub fn refresh(
        &mut self,
        sid: &Sid,
        signals: &MicSignals,
        now: Instant,
        now_ms: EpochMillis,
    ) -> WriteOutcome {
        let observation = self.resolve(sid, signals, now_ms);
        self.apply(sid, observation, now)
    }

    #[must_use]
    pub fn state(&self, sid: &Sid) -> Option<&MicState> {
        self.states.get(sid)
    }

    /// Forget everything about `sid`.
    pub fn remove(&mut self, sid: &Sid) {
        self.states.remove(sid);
        self.broadcasts.remove(sid);
    }
}
