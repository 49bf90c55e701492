//! In-process media session.
//!
//! A [`LoopbackRoom`] connects any number of [`LoopbackSession`]s in one
//! process. It behaves like a media server as far as the synchronization core
//! can tell: participants join and leave, data fans out to everyone but the
//! sender (optionally with loss), tracks publish and mute. The room also
//! exposes hooks to reproduce SDK misbehaviour: silent drops, empty or
//! unreadable membership reads, mute flags in older shapes, failed captures.
//!
//! Used by the simulator binary and by integration tests.

use super::{
    CaptureRequest, ConnectionState, DisconnectReason, LocalTrack, MediaSession,
    MembershipSnapshot, MembershipView, MuteFlags, ParticipantSnapshot, PublicationFlags,
    PublicationSnapshot, SdkError, SdkEvent, SdkEventReceiver, TrackFlags, TrackKind,
    TrackSource,
};
use async_trait::async_trait;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use sync_protocol::Sid;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Where a participant's SDK reports mute state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagStyle {
    /// `isMuted` on the publication.
    #[default]
    IsMuted,
    /// `muted` on the publication.
    Muted,
    /// Inverted `enabled` on the publication.
    Enabled,
    /// Only the media-stream track's `enabled`.
    TrackOnly,
    /// No readable flag anywhere.
    Unreadable,
}

impl FlagStyle {
    /// Mute flags as this SDK shape would expose them.
    #[must_use]
    pub fn flags(self, muted: bool) -> MuteFlags {
        match self {
            FlagStyle::IsMuted => MuteFlags::reported(muted),
            FlagStyle::Muted => MuteFlags {
                publication: PublicationFlags {
                    muted: Some(muted),
                    ..PublicationFlags::default()
                },
                track: None,
            },
            FlagStyle::Enabled => MuteFlags {
                publication: PublicationFlags {
                    enabled: Some(!muted),
                    ..PublicationFlags::default()
                },
                track: None,
            },
            FlagStyle::TrackOnly => MuteFlags {
                publication: PublicationFlags::default(),
                track: Some(TrackFlags {
                    media_enabled: Some(!muted),
                    ..TrackFlags::default()
                }),
            },
            FlagStyle::Unreadable => MuteFlags::unreadable(),
        }
    }
}

/// How a participant's membership reads misbehave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MembershipFault {
    #[default]
    None,
    /// Every map reads as empty while connected.
    EmptyRead,
    /// No membership map is exposed at all.
    Unenumerable,
}

/// Which capture to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureTarget {
    Microphone,
    Camera,
    Screen,
}

/// Per-participant options for [`LoopbackRoom::join_with`].
#[derive(Debug, Clone, Default)]
pub struct JoinOptions {
    /// Fixed sid; a random `PA_` sid is generated when absent.
    pub sid: Option<Sid>,
    pub name: Option<String>,
    pub flag_style: FlagStyle,
    /// Do not expose the participant-level microphone flag.
    pub hide_microphone_flag: bool,
}

#[derive(Debug)]
struct Member {
    sid: Sid,
    identity: String,
    name: Option<String>,
    state: ConnectionState,
    events: mpsc::UnboundedSender<SdkEvent>,
    publications: Vec<PublicationSnapshot>,
    audio_level: f32,
    is_speaking: bool,
    mic_enabled: bool,
    camera_enabled: bool,
    flag_style: FlagStyle,
    hide_microphone_flag: bool,
    fault: MembershipFault,
    capture_failures: HashMap<CaptureTarget, SdkError>,
    publish_failures: Vec<TrackSource>,
    screen_tracks: Vec<LocalTrack>,
    subscriptions: HashMap<(Sid, TrackSource), bool>,
}

impl Member {
    fn snapshot(&self) -> ParticipantSnapshot {
        ParticipantSnapshot {
            sid: self.sid.clone(),
            identity: self.identity.clone(),
            name: self.name.clone(),
            audio_level: self.audio_level,
            is_speaking: self.is_speaking,
            microphone_enabled: if self.hide_microphone_flag {
                None
            } else {
                Some(self.mic_enabled && self.has_source(TrackSource::Microphone))
            },
            publications: self.publications.clone(),
        }
    }

    fn has_source(&self, source: TrackSource) -> bool {
        self.publications.iter().any(|p| p.source == source)
    }

    fn emit(&self, event: SdkEvent) {
        // A closed receiver means the session was dropped; nothing to do.
        let _ = self.events.send(event);
    }
}

#[derive(Debug)]
struct RoomState {
    members: Vec<Member>,
    rng: StdRng,
    loss: f64,
    next_track: u64,
}

impl RoomState {
    fn member(&self, sid: &Sid) -> Option<&Member> {
        self.members.iter().find(|m| &m.sid == sid)
    }

    fn member_mut(&mut self, sid: &Sid) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| &m.sid == sid)
    }

    fn connected(&self, sid: &Sid) -> Result<&Member, SdkError> {
        self.member(sid)
            .filter(|m| m.state == ConnectionState::Connected)
            .ok_or(SdkError::NotConnected)
    }

    fn emit_to_others(&self, from: &Sid, event: &SdkEvent) {
        for member in self.members.iter().filter(|m| &m.sid != from) {
            member.emit(event.clone());
        }
    }

    fn track_id(&mut self) -> String {
        self.next_track += 1;
        format!("TR_{}", self.next_track)
    }

    /// Add or update the publication for `source` and tell the other members.
    fn publish(&mut self, sid: &Sid, track_sid: String, kind: TrackKind, source: TrackSource) {
        let Some(member) = self.member_mut(sid) else {
            return;
        };
        let muted = match source {
            TrackSource::Microphone => !member.mic_enabled,
            TrackSource::Camera => !member.camera_enabled,
            _ => false,
        };
        let publication = PublicationSnapshot {
            track_sid,
            kind,
            source,
            flags: member.flag_style.flags(muted),
        };
        member.publications.retain(|p| p.source != source);
        member.publications.push(publication.clone());
        self.emit_to_others(
            sid,
            &SdkEvent::TrackPublished {
                sid: sid.clone(),
                publication,
            },
        );
    }

    fn set_muted(&mut self, sid: &Sid, source: TrackSource, muted: bool) {
        let Some(member) = self.member_mut(sid) else {
            return;
        };
        let flags = member.flag_style.flags(muted);
        let mut kind = None;
        for publication in member.publications.iter_mut().filter(|p| p.source == source) {
            publication.flags = flags;
            kind = Some(publication.kind);
        }
        let Some(kind) = kind else {
            return;
        };
        let sid = sid.clone();
        let event = if muted {
            SdkEvent::TrackMuted {
                sid: sid.clone(),
                kind,
                source,
            }
        } else {
            SdkEvent::TrackUnmuted {
                sid: sid.clone(),
                kind,
                source,
            }
        };
        self.emit_to_others(&sid, &event);
    }
}

/// One simulated room.
#[derive(Debug, Clone)]
pub struct LoopbackRoom {
    state: Arc<Mutex<RoomState>>,
}

impl Default for LoopbackRoom {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackRoom {
    /// A lossless room.
    #[must_use]
    pub fn new() -> Self {
        Self::with_loss(0.0, 0)
    }

    /// A room that drops each data delivery with probability `loss`.
    ///
    /// Deliveries are dropped independently per receiver, from a generator
    /// seeded with `seed` so runs are reproducible.
    #[must_use]
    pub fn with_loss(loss: f64, seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(RoomState {
                members: Vec::new(),
                rng: StdRng::seed_from_u64(seed),
                loss: loss.clamp(0.0, 1.0),
                next_track: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join with default options.
    #[must_use]
    pub fn join(&self, identity: &str) -> (Arc<LoopbackSession>, SdkEventReceiver) {
        self.join_with(identity, JoinOptions::default())
    }

    /// Join as `identity`.
    ///
    /// Everyone already connected sees `ParticipantConnected`; the joiner sees
    /// its own connection become `Connected`.
    #[must_use]
    pub fn join_with(
        &self,
        identity: &str,
        options: JoinOptions,
    ) -> (Arc<LoopbackSession>, SdkEventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sid = options.sid.unwrap_or_else(|| {
            let short: String = uuid::Uuid::new_v4().simple().to_string().chars().take(12).collect();
            Sid::from(format!("PA_{short}"))
        });
        let member = Member {
            sid: sid.clone(),
            identity: identity.to_string(),
            name: options.name,
            state: ConnectionState::Connected,
            events: tx,
            publications: Vec::new(),
            audio_level: 0.0,
            is_speaking: false,
            mic_enabled: false,
            camera_enabled: false,
            flag_style: options.flag_style,
            hide_microphone_flag: options.hide_microphone_flag,
            fault: MembershipFault::None,
            capture_failures: HashMap::new(),
            publish_failures: Vec::new(),
            screen_tracks: Vec::new(),
            subscriptions: HashMap::new(),
        };

        {
            let mut state = self.lock();
            let snapshot = member.snapshot();
            state.emit_to_others(&sid, &SdkEvent::ParticipantConnected(snapshot));
            member.emit(SdkEvent::ConnectionStateChanged(ConnectionState::Connected));
            state.members.retain(|m| m.sid != sid);
            state.members.push(member);
        }
        debug!(target: "sync.loopback", sid = %sid, identity = %identity, "Participant joined");

        let session = Arc::new(LoopbackSession {
            room: self.clone(),
            sid,
            identity: identity.to_string(),
        });
        (session, rx)
    }

    /// Sids of every participant still in the room.
    #[must_use]
    pub fn participants(&self) -> Vec<Sid> {
        self.lock().members.iter().map(|m| m.sid.clone()).collect()
    }

    /// End the room for everyone with `reason`.
    pub fn close(&self, reason: DisconnectReason) {
        let mut state = self.lock();
        for member in state.members.drain(..) {
            member.emit(SdkEvent::ConnectionStateChanged(ConnectionState::Disconnected));
            member.emit(SdkEvent::Disconnected(reason));
        }
    }

    /// Remove `sid` without telling anyone, as when a disconnect event is lost.
    pub fn drop_silently(&self, sid: &Sid) {
        self.lock().members.retain(|m| &m.sid != sid);
        debug!(target: "sync.loopback", sid = %sid, "Participant dropped silently");
    }

    /// Change the connection state `sid` observes.
    pub fn set_connection_state(&self, sid: &Sid, connection: ConnectionState) {
        let mut state = self.lock();
        if let Some(member) = state.member_mut(sid) {
            member.state = connection;
            member.emit(SdkEvent::ConnectionStateChanged(connection));
        }
    }

    /// Set the audio level of `sid` and announce the active-speaker set.
    pub fn set_speaking(&self, sid: &Sid, level: f32) {
        let mut state = self.lock();
        if let Some(member) = state.member_mut(sid) {
            member.audio_level = level;
            member.is_speaking = level > 0.0;
        }
        let speakers: Vec<Sid> = state
            .members
            .iter()
            .filter(|m| m.is_speaking)
            .map(|m| m.sid.clone())
            .collect();
        for member in &state.members {
            member.emit(SdkEvent::ActiveSpeakersChanged {
                speakers: speakers.clone(),
            });
        }
    }

    /// End the screen capture of `sid` as the platform would.
    pub fn end_screen_capture(&self, sid: &Sid) {
        let state = self.lock();
        if let Some(member) = state.member(sid) {
            for track in &member.screen_tracks {
                track.stop();
            }
        }
    }

    pub fn set_membership_fault(&self, sid: &Sid, fault: MembershipFault) {
        if let Some(member) = self.lock().member_mut(sid) {
            member.fault = fault;
        }
    }

    /// Make captures of `target` by `sid` fail with `error` (or succeed again
    /// with `None`).
    pub fn set_capture_failure(&self, sid: &Sid, target: CaptureTarget, error: Option<SdkError>) {
        if let Some(member) = self.lock().member_mut(sid) {
            match error {
                Some(error) => {
                    member.capture_failures.insert(target, error);
                }
                None => {
                    member.capture_failures.remove(&target);
                }
            }
        }
    }

    /// Make the next publish of a `source` track by `sid` fail.
    pub fn fail_next_publish(&self, sid: &Sid, source: TrackSource) {
        if let Some(member) = self.lock().member_mut(sid) {
            member.publish_failures.push(source);
        }
    }

    /// Last subscription decision `viewer` made for `target`'s `source` track.
    #[must_use]
    pub fn subscription(&self, viewer: &Sid, target: &Sid, source: TrackSource) -> Option<bool> {
        self.lock()
            .member(viewer)
            .and_then(|m| m.subscriptions.get(&(target.clone(), source)).copied())
    }

    /// Current snapshot of `sid`, as any participant would see it.
    #[must_use]
    pub fn snapshot(&self, sid: &Sid) -> Option<ParticipantSnapshot> {
        self.lock().member(sid).map(Member::snapshot)
    }
}

/// One participant's connection to a [`LoopbackRoom`].
#[derive(Debug)]
pub struct LoopbackSession {
    room: LoopbackRoom,
    sid: Sid,
    identity: String,
}

impl LoopbackSession {
    fn capture_failure(&self, target: CaptureTarget) -> Option<SdkError> {
        self.room
            .lock()
            .member(&self.sid)
            .and_then(|m| m.capture_failures.get(&target).cloned())
    }
}

#[async_trait]
impl MediaSession for LoopbackSession {
    fn local_sid(&self) -> Sid {
        self.sid.clone()
    }

    fn local_identity(&self) -> String {
        self.identity.clone()
    }

    fn connection_state(&self) -> ConnectionState {
        self.room
            .lock()
            .member(&self.sid)
            .map_or(ConnectionState::Disconnected, |m| m.state)
    }

    fn membership(&self) -> MembershipSnapshot {
        let state = self.room.lock();
        let Some(me) = state.member(&self.sid) else {
            return MembershipSnapshot {
                state: ConnectionState::Disconnected,
                local_sid: Some(self.sid.clone()),
                views: vec![MembershipView::default()],
            };
        };
        let others: Vec<Sid> = state
            .members
            .iter()
            .filter(|m| m.sid != self.sid)
            .map(|m| m.sid.clone())
            .collect();
        let views = match me.fault {
            MembershipFault::None => vec![MembershipView {
                keys: others.clone(),
                participant_sids: others,
            }],
            MembershipFault::EmptyRead => vec![MembershipView::default()],
            MembershipFault::Unenumerable => Vec::new(),
        };
        MembershipSnapshot {
            state: me.state,
            local_sid: Some(self.sid.clone()),
            views,
        }
    }

    fn remote_participants(&self) -> Vec<ParticipantSnapshot> {
        self.room
            .lock()
            .members
            .iter()
            .filter(|m| m.sid != self.sid)
            .map(Member::snapshot)
            .collect()
    }

    fn participant(&self, sid: &Sid) -> Option<ParticipantSnapshot> {
        self.room.snapshot(sid)
    }

    fn local_participant(&self) -> ParticipantSnapshot {
        self.room.snapshot(&self.sid).unwrap_or_else(|| ParticipantSnapshot {
            sid: self.sid.clone(),
            identity: self.identity.clone(),
            name: None,
            audio_level: 0.0,
            is_speaking: false,
            microphone_enabled: None,
            publications: Vec::new(),
        })
    }

    async fn publish_data(&self, payload: Bytes) -> Result<(), SdkError> {
        let mut guard = self.room.lock();
        guard.connected(&self.sid)?;
        let state = &mut *guard;
        for member in state
            .members
            .iter()
            .filter(|m| m.sid != self.sid && m.state == ConnectionState::Connected)
        {
            if state.loss > 0.0 && state.rng.gen_bool(state.loss) {
                trace!(target: "sync.loopback", to = %member.sid, "Dropped data delivery");
                continue;
            }
            member.emit(SdkEvent::DataReceived {
                payload: payload.clone(),
                from: Some(self.sid.clone()),
            });
        }
        Ok(())
    }

    async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), SdkError> {
        if enabled {
            if let Some(error) = self.capture_failure(CaptureTarget::Microphone) {
                return Err(error);
            }
        }
        let mut state = self.room.lock();
        state.connected(&self.sid)?;
        let has_publication = state
            .member(&self.sid)
            .is_some_and(|m| m.has_source(TrackSource::Microphone));
        if let Some(member) = state.member_mut(&self.sid) {
            member.mic_enabled = enabled;
        }
        if has_publication {
            state.set_muted(&self.sid, TrackSource::Microphone, !enabled);
        } else if enabled {
            let id = state.track_id();
            state.publish(&self.sid, id, TrackKind::Audio, TrackSource::Microphone);
        }
        Ok(())
    }

    async fn set_camera_enabled(&self, enabled: bool) -> Result<(), SdkError> {
        if enabled {
            if let Some(error) = self.capture_failure(CaptureTarget::Camera) {
                return Err(error);
            }
        }
        let mut state = self.room.lock();
        state.connected(&self.sid)?;
        let has_publication = state
            .member(&self.sid)
            .is_some_and(|m| m.has_source(TrackSource::Camera));
        if let Some(member) = state.member_mut(&self.sid) {
            member.camera_enabled = enabled;
        }
        if has_publication {
            state.set_muted(&self.sid, TrackSource::Camera, !enabled);
        } else if enabled {
            let id = state.track_id();
            state.publish(&self.sid, id, TrackKind::Video, TrackSource::Camera);
        }
        Ok(())
    }

    async fn create_local_tracks(
        &self,
        request: CaptureRequest,
    ) -> Result<Vec<LocalTrack>, SdkError> {
        if request.video {
            if let Some(error) = self.capture_failure(CaptureTarget::Camera) {
                return Err(error);
            }
        }
        if request.audio {
            if let Some(error) = self.capture_failure(CaptureTarget::Microphone) {
                return Err(error);
            }
        }
        let mut state = self.room.lock();
        let mut tracks = Vec::new();
        if request.audio {
            let id = state.track_id();
            tracks.push(LocalTrack::new(id, TrackKind::Audio, TrackSource::Microphone));
        }
        if request.video {
            let id = state.track_id();
            tracks.push(LocalTrack::new(id, TrackKind::Video, TrackSource::Camera));
        }
        Ok(tracks)
    }

    async fn create_screen_tracks(&self, with_audio: bool) -> Result<Vec<LocalTrack>, SdkError> {
        if let Some(error) = self.capture_failure(CaptureTarget::Screen) {
            return Err(error);
        }
        let mut state = self.room.lock();
        let mut tracks = vec![LocalTrack::new(
            state.track_id(),
            TrackKind::Video,
            TrackSource::ScreenShare,
        )];
        if with_audio {
            tracks.push(LocalTrack::new(
                state.track_id(),
                TrackKind::Audio,
                TrackSource::ScreenShareAudio,
            ));
        }
        if let Some(member) = state.member_mut(&self.sid) {
            member.screen_tracks.retain(|t| !t.is_ended());
            member.screen_tracks.extend(tracks.iter().cloned());
        }
        Ok(tracks)
    }

    async fn publish_track(&self, track: &LocalTrack) -> Result<(), SdkError> {
        let mut state = self.room.lock();
        state.connected(&self.sid)?;
        if let Some(member) = state.member_mut(&self.sid) {
            if let Some(pos) = member.publish_failures.iter().position(|s| *s == track.source) {
                member.publish_failures.remove(pos);
                return Err(SdkError::PublishFailed(format!(
                    "{} publish rejected",
                    track.source.as_str()
                )));
            }
            match track.source {
                TrackSource::Microphone => member.mic_enabled = true,
                TrackSource::Camera => member.camera_enabled = true,
                _ => {}
            }
        }
        state.publish(&self.sid, track.id.clone(), track.kind, track.source);
        Ok(())
    }

    async fn unpublish_track(&self, track: &LocalTrack) -> Result<(), SdkError> {
        let mut state = self.room.lock();
        let Some(member) = state.member_mut(&self.sid) else {
            return Err(SdkError::NotConnected);
        };
        let before = member.publications.len();
        member.publications.retain(|p| p.track_sid != track.id);
        if member.publications.len() == before {
            return Err(SdkError::TrackNotFound(track.id.clone()));
        }
        state.emit_to_others(
            &self.sid,
            &SdkEvent::TrackUnpublished {
                sid: self.sid.clone(),
                kind: track.kind,
                source: track.source,
            },
        );
        Ok(())
    }

    fn set_subscribed(&self, sid: &Sid, source: TrackSource, subscribed: bool) {
        if let Some(member) = self.room.lock().member_mut(&self.sid) {
            member.subscriptions.insert((sid.clone(), source), subscribed);
        }
    }

    async fn disconnect(&self) {
        let mut state = self.room.lock();
        let Some(pos) = state.members.iter().position(|m| m.sid == self.sid) else {
            return;
        };
        let member = state.members.remove(pos);
        for track in &member.screen_tracks {
            track.stop();
        }
        state.emit_to_others(
            &self.sid,
            &SdkEvent::ParticipantDisconnected {
                sid: self.sid.clone(),
            },
        );
        member.emit(SdkEvent::ConnectionStateChanged(ConnectionState::Disconnected));
        member.emit(SdkEvent::Disconnected(DisconnectReason::ClientInitiated));
        debug!(target: "sync.loopback", sid = %self.sid, "Participant left");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::sdk::MuteProbe;

    fn fixed(sid: &str) -> JoinOptions {
        JoinOptions {
            sid: Some(Sid::from(sid)),
            ..JoinOptions::default()
        }
    }

    fn drain(rx: &mut SdkEventReceiver) -> Vec<SdkEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_flag_styles_round_trip_through_probe() {
        for style in [
            FlagStyle::IsMuted,
            FlagStyle::Muted,
            FlagStyle::Enabled,
            FlagStyle::TrackOnly,
        ] {
            assert_eq!(style.flags(true).is_muted(), Some(true), "{style:?}");
            assert_eq!(style.flags(false).is_muted(), Some(false), "{style:?}");
        }
        assert_eq!(FlagStyle::Unreadable.flags(true).is_muted(), None);
    }

    #[tokio::test]
    async fn test_join_announces_to_existing_members() {
        let room = LoopbackRoom::new();
        let (_a, mut rx_a) = room.join_with("alice", fixed("PA_a"));
        let (_b, mut rx_b) = room.join_with("bob", fixed("PA_b"));

        let events = drain(&mut rx_a);
        assert!(events.iter().any(
            |e| matches!(e, SdkEvent::ParticipantConnected(p) if p.sid.as_str() == "PA_b")
        ));
        let own = drain(&mut rx_b);
        assert!(matches!(
            own.first(),
            Some(SdkEvent::ConnectionStateChanged(ConnectionState::Connected))
        ));
    }

    #[tokio::test]
    async fn test_data_reaches_everyone_but_sender() {
        let room = LoopbackRoom::new();
        let (a, mut rx_a) = room.join_with("alice", fixed("PA_a"));
        let (_b, mut rx_b) = room.join_with("bob", fixed("PA_b"));
        drain(&mut rx_a);
        drain(&mut rx_b);

        a.publish_data(Bytes::from_static(b"{}")).await.unwrap();

        assert!(drain(&mut rx_a).is_empty());
        let received = drain(&mut rx_b);
        assert!(matches!(
            received.as_slice(),
            [SdkEvent::DataReceived { from: Some(from), .. }] if from.as_str() == "PA_a"
        ));
    }

    #[tokio::test]
    async fn test_full_loss_drops_every_delivery() {
        let room = LoopbackRoom::with_loss(1.0, 7);
        let (a, _rx_a) = room.join_with("alice", fixed("PA_a"));
        let (_b, mut rx_b) = room.join_with("bob", fixed("PA_b"));
        drain(&mut rx_b);

        a.publish_data(Bytes::from_static(b"{}")).await.unwrap();
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_mic_toggle_updates_flags_and_emits() {
        let room = LoopbackRoom::new();
        let (a, _rx_a) = room.join_with("alice", fixed("PA_a"));
        let (_b, mut rx_b) = room.join_with("bob", fixed("PA_b"));

        a.set_microphone_enabled(true).await.unwrap();
        a.set_microphone_enabled(false).await.unwrap();

        let events = drain(&mut rx_b);
        assert!(events
            .iter()
            .any(|e| matches!(e, SdkEvent::TrackPublished { publication, .. } if publication.source == TrackSource::Microphone)));
        assert!(events
            .iter()
            .any(|e| matches!(e, SdkEvent::TrackMuted { source: TrackSource::Microphone, .. })));

        let snapshot = room.snapshot(&Sid::from("PA_a")).unwrap();
        assert_eq!(snapshot.microphone_enabled, Some(false));
        assert_eq!(
            snapshot.publications.first().and_then(MuteProbe::is_muted),
            Some(true)
        );
    }

    #[tokio::test]
    async fn test_membership_faults() {
        let room = LoopbackRoom::new();
        let (a, _rx_a) = room.join_with("alice", fixed("PA_a"));
        let (_b, _rx_b) = room.join_with("bob", fixed("PA_b"));

        let snapshot = a.membership();
        assert_eq!(snapshot.views.len(), 1);
        assert_eq!(
            snapshot.views.first().map(|v| v.keys.clone()),
            Some(vec![Sid::from("PA_b")])
        );

        room.set_membership_fault(&Sid::from("PA_a"), MembershipFault::EmptyRead);
        assert!(a.membership().views.iter().all(|v| v.keys.is_empty()));

        room.set_membership_fault(&Sid::from("PA_a"), MembershipFault::Unenumerable);
        assert!(a.membership().views.is_empty());
    }

    #[tokio::test]
    async fn test_drop_silently_emits_nothing() {
        let room = LoopbackRoom::new();
        let (a, mut rx_a) = room.join_with("alice", fixed("PA_a"));
        let (_b, _rx_b) = room.join_with("bob", fixed("PA_b"));
        drain(&mut rx_a);

        room.drop_silently(&Sid::from("PA_b"));
        assert!(drain(&mut rx_a).is_empty());
        assert!(a.remote_participants().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_notifies_both_sides() {
        let room = LoopbackRoom::new();
        let (a, mut rx_a) = room.join_with("alice", fixed("PA_a"));
        let (_b, mut rx_b) = room.join_with("bob", fixed("PA_b"));
        drain(&mut rx_a);
        drain(&mut rx_b);

        a.disconnect().await;

        assert!(drain(&mut rx_a)
            .iter()
            .any(|e| matches!(e, SdkEvent::Disconnected(DisconnectReason::ClientInitiated))));
        assert!(drain(&mut rx_b)
            .iter()
            .any(|e| matches!(e, SdkEvent::ParticipantDisconnected { sid } if sid.as_str() == "PA_a")));
        assert_eq!(
            a.publish_data(Bytes::new()).await,
            Err(SdkError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_capture_and_publish_failures() {
        let room = LoopbackRoom::new();
        let (a, _rx_a) = room.join_with("alice", fixed("PA_a"));
        let sid = Sid::from("PA_a");

        room.set_capture_failure(
            &sid,
            CaptureTarget::Screen,
            Some(SdkError::CaptureDenied("denied".to_string())),
        );
        assert!(matches!(
            a.create_screen_tracks(false).await,
            Err(SdkError::CaptureDenied(_))
        ));
        room.set_capture_failure(&sid, CaptureTarget::Screen, None);

        let tracks = a.create_screen_tracks(true).await.unwrap();
        assert_eq!(tracks.len(), 2);

        room.fail_next_publish(&sid, TrackSource::ScreenShare);
        let video = tracks.first().unwrap();
        assert!(a.publish_track(video).await.is_err());
        assert!(a.publish_track(video).await.is_ok());

        room.end_screen_capture(&sid);
        assert!(tracks.iter().all(LocalTrack::is_ended));
    }

    #[tokio::test]
    async fn test_subscriptions_are_recorded() {
        let room = LoopbackRoom::new();
        let (a, _rx_a) = room.join_with("alice", fixed("PA_a"));
        let target = Sid::from("PA_b");

        a.set_subscribed(&target, TrackSource::ScreenShare, false);
        assert_eq!(
            room.subscription(&Sid::from("PA_a"), &target, TrackSource::ScreenShare),
            Some(false)
        );
        assert_eq!(
            room.subscription(&Sid::from("PA_a"), &target, TrackSource::Camera),
            None
        );
    }
}
