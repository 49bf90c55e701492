//! Test data fixtures.
//!
//! Provides builders for:
//! - Participant snapshots with various mute-flag shapes
//! - Publications (microphone, camera, screen share)
//! - Membership snapshots

use session_sync::sdk::{
    ConnectionState, MembershipSnapshot, MembershipView, MuteFlags, ParticipantSnapshot,
    PublicationSnapshot, TrackKind, TrackSource,
};
use sync_protocol::Sid;
use uuid::Uuid;

/// Test publication fixture.
#[derive(Debug, Clone)]
pub struct TestPublication {
    snapshot: PublicationSnapshot,
}

impl TestPublication {
    fn new(kind: TrackKind, source: TrackSource) -> Self {
        Self {
            snapshot: PublicationSnapshot {
                track_sid: format!("TR_{}", Uuid::new_v4().simple()),
                kind,
                source,
                flags: MuteFlags::reported(false),
            },
        }
    }

    /// Microphone publication reporting `muted` via `isMuted`.
    #[must_use]
    pub fn microphone(muted: bool) -> Self {
        Self::new(TrackKind::Audio, TrackSource::Microphone).with_flags(MuteFlags::reported(muted))
    }

    #[must_use]
    pub fn camera() -> Self {
        Self::new(TrackKind::Video, TrackSource::Camera)
    }

    #[must_use]
    pub fn screen_share() -> Self {
        Self::new(TrackKind::Video, TrackSource::ScreenShare)
    }

    #[must_use]
    pub fn screen_share_audio() -> Self {
        Self::new(TrackKind::Audio, TrackSource::ScreenShareAudio)
    }

    /// Replace the mute flags (e.g. `MuteFlags::unreadable()`).
    #[must_use]
    pub fn with_flags(mut self, flags: MuteFlags) -> Self {
        self.snapshot.flags = flags;
        self
    }

    #[must_use]
    pub fn build(self) -> PublicationSnapshot {
        self.snapshot
    }
}

/// Test participant fixture.
#[derive(Debug, Clone)]
pub struct TestParticipant {
    snapshot: ParticipantSnapshot,
}

impl TestParticipant {
    /// A connected participant with no publications.
    #[must_use]
    pub fn new(sid: impl Into<Sid>) -> Self {
        let sid = sid.into();
        Self {
            snapshot: ParticipantSnapshot {
                identity: format!("user-{sid}"),
                sid,
                name: None,
                audio_level: 0.0,
                is_speaking: false,
                microphone_enabled: None,
                publications: Vec::new(),
            },
        }
    }

    /// Participant with a random `PA_` sid.
    #[must_use]
    pub fn random() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self::new(format!("PA_{}", id.get(..12).unwrap_or(&id)))
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.snapshot.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.snapshot.identity = identity.into();
        self
    }

    /// Add a microphone publication reporting `muted`.
    #[must_use]
    pub fn with_mic(self, muted: bool) -> Self {
        self.with_publication(TestPublication::microphone(muted))
    }

    /// Add a microphone publication whose flags cannot be read.
    #[must_use]
    pub fn with_unreadable_mic(self) -> Self {
        self.with_publication(TestPublication::microphone(false).with_flags(MuteFlags::unreadable()))
    }

    #[must_use]
    pub fn with_publication(mut self, publication: TestPublication) -> Self {
        self.snapshot.publications.push(publication.build());
        self
    }

    /// Set the participant-level microphone flag.
    #[must_use]
    pub fn with_microphone_enabled(mut self, enabled: bool) -> Self {
        self.snapshot.microphone_enabled = Some(enabled);
        self
    }

    #[must_use]
    pub fn speaking(mut self, level: f32) -> Self {
        self.snapshot.audio_level = level;
        self.snapshot.is_speaking = level > 0.0;
        self
    }

    #[must_use]
    pub fn build(self) -> ParticipantSnapshot {
        self.snapshot
    }
}

/// A connected membership snapshot with one view listing `remotes`.
#[must_use]
pub fn membership(local: &str, remotes: &[&str]) -> MembershipSnapshot {
    let sids: Vec<Sid> = remotes.iter().copied().map(Sid::from).collect();
    MembershipSnapshot {
        state: ConnectionState::Connected,
        local_sid: Some(Sid::from(local)),
        views: vec![MembershipView {
            keys: sids.clone(),
            participant_sids: sids,
        }],
    }
}
