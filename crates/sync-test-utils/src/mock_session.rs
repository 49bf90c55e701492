//! Scriptable `MediaSession` for single-actor tests.
//!
//! Unlike the loopback room, nothing here reacts on its own: the test decides
//! which remote participants exist, what membership reads return, and which
//! events arrive. Every call the actor makes is recorded, and data published
//! on the channel is decoded so tests can assert on messages directly.
//!
//! # Example
//!
//! ```rust,ignore
//! let (session, events) = MockSession::builder("PA_me")
//!     .with_remote(TestParticipant::new("PA_bob").with_mic(false).build())
//!     .build();
//!
//! session.connect(TestParticipant::new("PA_carol").build());
//! session.deliver(&claim("PA_carol", 2_000), "PA_carol");
//! assert!(session.sent_messages().iter().any(|m| m.message_type() == "peer_hello"));
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use session_sync::sdk::{
    CaptureRequest, ConnectionState, LocalTrack, MediaSession, MembershipSnapshot,
    MembershipView, MuteFlags, ParticipantSnapshot, PublicationSnapshot, SdkError, SdkEvent,
    SdkEventReceiver, TrackKind, TrackSource,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use sync_protocol::{BroadcastMessage, Sid};
use tokio::sync::mpsc;

/// A call made by the code under test.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    PublishData(BroadcastMessage),
    SetMicrophoneEnabled(bool),
    SetCameraEnabled(bool),
    CreateLocalTracks(CaptureRequest),
    CreateScreenTracks { with_audio: bool },
    PublishTrack(TrackSource),
    UnpublishTrack(TrackSource),
    SetSubscribed {
        sid: Sid,
        source: TrackSource,
        subscribed: bool,
    },
    Disconnect,
}

#[derive(Debug)]
struct Inner {
    local: ParticipantSnapshot,
    remotes: Vec<ParticipantSnapshot>,
    connection: ConnectionState,
    membership: Option<MembershipSnapshot>,
    calls: Vec<RecordedCall>,
    fail_data: bool,
    local_capture_failure: Option<SdkError>,
    screen_capture_failure: Option<SdkError>,
    local_capture_delay: Duration,
    screen_capture_delay: Duration,
    screen_tracks: Vec<LocalTrack>,
}

/// Builder for [`MockSession`].
#[derive(Debug)]
pub struct MockSessionBuilder {
    local: ParticipantSnapshot,
    remotes: Vec<ParticipantSnapshot>,
    connection: ConnectionState,
}

impl MockSessionBuilder {
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.local.name = Some(name.into());
        self
    }

    /// A remote participant present before the actor starts.
    #[must_use]
    pub fn with_remote(mut self, participant: ParticipantSnapshot) -> Self {
        self.remotes.push(participant);
        self
    }

    #[must_use]
    pub fn with_connection_state(mut self, connection: ConnectionState) -> Self {
        self.connection = connection;
        self
    }

    #[must_use]
    pub fn build(self) -> (Arc<MockSession>, SdkEventReceiver) {
        let (events, rx) = mpsc::unbounded_channel();
        let session = MockSession {
            local_sid: self.local.sid.clone(),
            events,
            inner: Mutex::new(Inner {
                local: self.local,
                remotes: self.remotes,
                connection: self.connection,
                membership: None,
                calls: Vec::new(),
                fail_data: false,
                local_capture_failure: None,
                screen_capture_failure: None,
                local_capture_delay: Duration::ZERO,
                screen_capture_delay: Duration::ZERO,
                screen_tracks: Vec::new(),
            }),
        };
        (Arc::new(session), rx)
    }
}

/// Mock media session.
#[derive(Debug)]
pub struct MockSession {
    local_sid: Sid,
    events: mpsc::UnboundedSender<SdkEvent>,
    inner: Mutex<Inner>,
}

impl MockSession {
    /// Start building a session for `local_sid`.
    #[must_use]
    pub fn builder(local_sid: &str) -> MockSessionBuilder {
        let sid = Sid::from(local_sid);
        MockSessionBuilder {
            local: ParticipantSnapshot {
                identity: format!("user-{sid}"),
                sid,
                name: None,
                audio_level: 0.0,
                is_speaking: false,
                microphone_enabled: None,
                publications: Vec::new(),
            },
            remotes: Vec::new(),
            connection: ConnectionState::Connected,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Push an event to the code under test.
    pub fn inject(&self, event: SdkEvent) {
        let _ = self.events.send(event);
    }

    /// Add a remote participant and announce it.
    pub fn connect(&self, participant: ParticipantSnapshot) {
        {
            let mut inner = self.lock();
            inner.remotes.retain(|p| p.sid != participant.sid);
            inner.remotes.push(participant.clone());
        }
        self.inject(SdkEvent::ParticipantConnected(participant));
    }

    /// Remove a remote participant and announce it.
    pub fn disconnect_remote(&self, sid: &str) {
        let sid = Sid::from(sid);
        self.lock().remotes.retain(|p| p.sid != sid);
        self.inject(SdkEvent::ParticipantDisconnected { sid });
    }

    /// Remove a remote participant without any event.
    pub fn drop_remote(&self, sid: &str) {
        let sid = Sid::from(sid);
        self.lock().remotes.retain(|p| p.sid != sid);
    }

    /// Replace a remote participant's snapshot without any event.
    pub fn update_remote(&self, participant: ParticipantSnapshot) {
        let mut inner = self.lock();
        inner.remotes.retain(|p| p.sid != participant.sid);
        inner.remotes.push(participant);
    }

    /// Deliver `message` on the data channel as if sent by `from`.
    pub fn deliver(&self, message: &BroadcastMessage, from: &str) {
        let payload = sync_protocol::encode(message).unwrap();
        self.deliver_raw(payload, Some(Sid::from(from)));
    }

    /// Deliver raw bytes (malformed payloads, missing sender).
    pub fn deliver_raw(&self, payload: impl Into<Bytes>, from: Option<Sid>) {
        self.inject(SdkEvent::DataReceived {
            payload: payload.into(),
            from,
        });
    }

    /// Override what membership reads return (`None` derives it from the
    /// remote list).
    pub fn set_membership(&self, membership: Option<MembershipSnapshot>) {
        self.lock().membership = membership;
    }

    pub fn set_connection_state(&self, connection: ConnectionState) {
        self.lock().connection = connection;
        self.inject(SdkEvent::ConnectionStateChanged(connection));
    }

    /// Make `publish_data` fail.
    pub fn fail_data(&self, fail: bool) {
        self.lock().fail_data = fail;
    }

    pub fn fail_local_capture(&self, error: Option<SdkError>) {
        self.lock().local_capture_failure = error;
    }

    pub fn fail_screen_capture(&self, error: Option<SdkError>) {
        self.lock().screen_capture_failure = error;
    }

    /// Hold local capture for `delay`, as a slow device prompt would.
    pub fn delay_local_capture(&self, delay: Duration) {
        self.lock().local_capture_delay = delay;
    }

    /// Hold the screen picker open for `delay`.
    pub fn delay_screen_capture(&self, delay: Duration) {
        self.lock().screen_capture_delay = delay;
    }

    /// End the current screen capture as the platform would.
    pub fn end_screen_capture(&self) {
        for track in &self.lock().screen_tracks {
            track.stop();
        }
    }

    /// Every recorded call, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Every message published on the data channel, oldest first.
    #[must_use]
    pub fn sent_messages(&self) -> Vec<BroadcastMessage> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                RecordedCall::PublishData(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Published messages of one wire type.
    #[must_use]
    pub fn sent_of_type(&self, message_type: &str) -> Vec<BroadcastMessage> {
        self.sent_messages()
            .into_iter()
            .filter(|m| m.message_type() == message_type)
            .collect()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn record(&self, call: RecordedCall) {
        self.lock().calls.push(call);
    }

    fn set_local_mic(inner: &mut Inner, enabled: bool) {
        inner.local.microphone_enabled = Some(enabled);
        for publication in inner
            .local
            .publications
            .iter_mut()
            .filter(|p| p.source == TrackSource::Microphone)
        {
            publication.flags = MuteFlags::reported(!enabled);
        }
    }
}

#[async_trait]
impl MediaSession for MockSession {
    fn local_sid(&self) -> Sid {
        self.local_sid.clone()
    }

    fn local_identity(&self) -> String {
        self.lock().local.identity.clone()
    }

    fn connection_state(&self) -> ConnectionState {
        self.lock().connection
    }

    fn membership(&self) -> MembershipSnapshot {
        let inner = self.lock();
        if let Some(membership) = &inner.membership {
            return membership.clone();
        }
        let sids: Vec<Sid> = inner.remotes.iter().map(|p| p.sid.clone()).collect();
        MembershipSnapshot {
            state: inner.connection,
            local_sid: Some(self.local_sid.clone()),
            views: vec![MembershipView {
                keys: sids.clone(),
                participant_sids: sids,
            }],
        }
    }

    fn remote_participants(&self) -> Vec<ParticipantSnapshot> {
        self.lock().remotes.clone()
    }

    fn participant(&self, sid: &Sid) -> Option<ParticipantSnapshot> {
        let inner = self.lock();
        if *sid == self.local_sid {
            return Some(inner.local.clone());
        }
        inner.remotes.iter().find(|p| &p.sid == sid).cloned()
    }

    fn local_participant(&self) -> ParticipantSnapshot {
        self.lock().local.clone()
    }

    async fn publish_data(&self, payload: Bytes) -> Result<(), SdkError> {
        let message = sync_protocol::decode(&payload).unwrap();
        self.record(RecordedCall::PublishData(message));
        if self.lock().fail_data {
            return Err(SdkError::PublishFailed("data channel closed".to_string()));
        }
        Ok(())
    }

    async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), SdkError> {
        self.record(RecordedCall::SetMicrophoneEnabled(enabled));
        Self::set_local_mic(&mut self.lock(), enabled);
        Ok(())
    }

    async fn set_camera_enabled(&self, enabled: bool) -> Result<(), SdkError> {
        self.record(RecordedCall::SetCameraEnabled(enabled));
        Ok(())
    }

    async fn create_local_tracks(
        &self,
        request: CaptureRequest,
    ) -> Result<Vec<LocalTrack>, SdkError> {
        self.record(RecordedCall::CreateLocalTracks(request));
        let delay = self.lock().local_capture_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.lock().local_capture_failure.clone() {
            return Err(error);
        }
        let mut tracks = Vec::new();
        if request.audio {
            tracks.push(LocalTrack::new("mic", TrackKind::Audio, TrackSource::Microphone));
        }
        if request.video {
            tracks.push(LocalTrack::new("cam", TrackKind::Video, TrackSource::Camera));
        }
        Ok(tracks)
    }

    async fn create_screen_tracks(&self, with_audio: bool) -> Result<Vec<LocalTrack>, SdkError> {
        self.record(RecordedCall::CreateScreenTracks { with_audio });
        let delay = self.lock().screen_capture_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.lock();
        if let Some(error) = inner.screen_capture_failure.clone() {
            return Err(error);
        }
        let mut tracks = vec![LocalTrack::new(
            "screen",
            TrackKind::Video,
            TrackSource::ScreenShare,
        )];
        if with_audio {
            tracks.push(LocalTrack::new(
                "screen-audio",
                TrackKind::Audio,
                TrackSource::ScreenShareAudio,
            ));
        }
        inner.screen_tracks.clone_from(&tracks);
        Ok(tracks)
    }

    async fn publish_track(&self, track: &LocalTrack) -> Result<(), SdkError> {
        self.record(RecordedCall::PublishTrack(track.source));
        let mut inner = self.lock();
        inner.local.publications.push(PublicationSnapshot {
            track_sid: format!("TR_{}", track.id),
            kind: track.kind,
            source: track.source,
            flags: MuteFlags::reported(false),
        });
        if track.source == TrackSource::Microphone {
            Self::set_local_mic(&mut inner, true);
        }
        Ok(())
    }

    async fn unpublish_track(&self, track: &LocalTrack) -> Result<(), SdkError> {
        self.record(RecordedCall::UnpublishTrack(track.source));
        let track_sid = format!("TR_{}", track.id);
        self.lock()
            .local
            .publications
            .retain(|p| p.track_sid != track_sid);
        Ok(())
    }

    fn set_subscribed(&self, sid: &Sid, source: TrackSource, subscribed: bool) {
        self.record(RecordedCall::SetSubscribed {
            sid: sid.clone(),
            source,
            subscribed,
        });
    }

    async fn disconnect(&self) {
        self.record(RecordedCall::Disconnect);
        self.lock().connection = ConnectionState::Disconnected;
    }
}
