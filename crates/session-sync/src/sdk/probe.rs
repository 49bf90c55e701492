//! Mute-flag probing across SDK generations.
//!
//! Different SDK versions expose a publication's mute state in different
//! places: `isMuted`, `muted`, an inverted `enabled`, or only on the attached
//! track (including the raw media-stream track's `enabled`). Each shape is a
//! [`MuteProbe`]; [`MuteFlags`] tries them in a fixed order and the rest of
//! the crate only ever asks "muted, not muted, or unknown?".

use super::{MembershipSnapshot, ParticipantSnapshot, PublicationSnapshot, TrackKind, TrackSource};
use std::collections::HashSet;
use sync_protocol::Sid;

/// Anything that may know whether a track is muted.
pub trait MuteProbe {
    /// `Some(true)` muted, `Some(false)` live, `None` if unreadable.
    fn is_muted(&self) -> Option<bool>;
}

/// Publication-level flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublicationFlags {
    pub is_muted: Option<bool>,
    pub muted: Option<bool>,
    pub enabled: Option<bool>,
}

impl MuteProbe for PublicationFlags {
    fn is_muted(&self) -> Option<bool> {
        self.is_muted
            .or(self.muted)
            .or_else(|| self.enabled.map(|enabled| !enabled))
    }
}

/// Track-level flags, only present while the track is attached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackFlags {
    pub is_muted: Option<bool>,
    pub muted: Option<bool>,
    pub enabled: Option<bool>,
    /// `enabled` of the underlying media-stream track.
    pub media_enabled: Option<bool>,
}

impl MuteProbe for TrackFlags {
    fn is_muted(&self) -> Option<bool> {
        self.is_muted
            .or(self.muted)
            .or_else(|| self.enabled.map(|enabled| !enabled))
            .or_else(|| self.media_enabled.map(|enabled| !enabled))
    }
}

/// All mute flags a publication exposes; publication flags win over track flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuteFlags {
    pub publication: PublicationFlags,
    pub track: Option<TrackFlags>,
}

impl MuteFlags {
    /// Flags of an SDK that reports `isMuted` on the publication.
    #[must_use]
    pub fn reported(muted: bool) -> Self {
        Self {
            publication: PublicationFlags {
                is_muted: Some(muted),
                ..PublicationFlags::default()
            },
            track: None,
        }
    }

    /// Flags that cannot be read at all.
    #[must_use]
    pub fn unreadable() -> Self {
        Self::default()
    }
}

impl MuteProbe for MuteFlags {
    fn is_muted(&self) -> Option<bool> {
        self.publication
            .is_muted()
            .or_else(|| self.track.as_ref().and_then(MuteProbe::is_muted))
    }
}

impl MuteProbe for PublicationSnapshot {
    fn is_muted(&self) -> Option<bool> {
        self.flags.is_muted()
    }
}

/// Whether a publication can carry microphone audio (screen audio never does).
#[must_use]
pub fn is_audio_publication(publication: &PublicationSnapshot) -> bool {
    if publication.source.is_screen() {
        return false;
    }
    publication.source == TrackSource::Microphone || publication.kind == TrackKind::Audio
}

/// A participant's microphone publications.
///
/// Publications that explicitly declare the microphone source are preferred;
/// failing that, any non-screen audio publication counts.
#[must_use]
pub fn microphone_publications(participant: &ParticipantSnapshot) -> Vec<&PublicationSnapshot> {
    let explicit: Vec<_> = participant
        .publications
        .iter()
        .filter(|p| p.source == TrackSource::Microphone)
        .collect();
    if !explicit.is_empty() {
        return explicit;
    }
    participant
        .publications
        .iter()
        .filter(|p| is_audio_publication(p))
        .collect()
}

/// Union of every membership view's keys and sids, plus the local sid.
#[must_use]
pub fn collect_live_sids(snapshot: &MembershipSnapshot) -> HashSet<Sid> {
    let mut live: HashSet<Sid> = snapshot
        .views
        .iter()
        .flat_map(|view| view.keys.iter().chain(view.participant_sids.iter()))
        .filter(|sid| !sid.is_empty())
        .cloned()
        .collect();
    if let Some(local) = snapshot.local_sid.as_ref().filter(|s| !s.is_empty()) {
        live.insert(local.clone());
    }
    live
}

/// Remote participant count as the SDK reports it: the size of the first
/// exposed view, or zero if none is exposed.
#[must_use]
pub fn remote_count(snapshot: &MembershipSnapshot) -> usize {
    snapshot.views.first().map_or(0, |view| {
        view.keys.len().max(view.participant_sids.len())
    })
}
