//! Broadcast channel adapter.
//!
//! Thin layer over the SDK's reliable data channel. Publishing never fails
//! from the caller's point of view: a send error is logged, counted and
//! forgotten, and the bursts and the reconciliation sweep make up for it.
//! Receiving decodes, drops anything malformed, and works out who sent it.

use crate::observability::metrics;
use crate::sdk::MediaSession;
use std::sync::Arc;
use sync_protocol::{BroadcastMessage, Sid};
use tracing::{debug, trace};

/// A decoded inbound message and its resolved sender.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Transport-level sender if the SDK reported one, else the sid stated in
    /// the payload. `None` when neither is known.
    pub sender: Option<Sid>,
    pub message: BroadcastMessage,
}

/// Publish/receive adapter bound to one media session.
#[derive(Clone)]
pub struct BroadcastChannel {
    sdk: Arc<dyn MediaSession>,
    local_sid: Sid,
}

impl std::fmt::Debug for BroadcastChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastChannel")
            .field("local_sid", &self.local_sid)
            .finish_non_exhaustive()
    }
}

impl BroadcastChannel {
    #[must_use]
    pub fn new(sdk: Arc<dyn MediaSession>) -> Self {
        let local_sid = sdk.local_sid();
        Self { sdk, local_sid }
    }

    /// Encode and send `message` to every connected peer.
    ///
    /// Returns whether the transport accepted it. Callers are free to ignore
    /// the result.
    pub async fn publish(&self, message: &BroadcastMessage) -> bool {
        let payload = match sync_protocol::encode(message) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(
                    target: "sync.channel",
                    message_type = message.message_type(),
                    error = %e,
                    "Failed to encode outbound message"
                );
                metrics::record_channel_publish_failure();
                return false;
            }
        };

        match self.sdk.publish_data(payload).await {
            Ok(()) => {
                trace!(
                    target: "sync.channel",
                    message_type = message.message_type(),
                    "Published"
                );
                true
            }
            Err(e) => {
                debug!(
                    target: "sync.channel",
                    message_type = message.message_type(),
                    error = %e,
                    "Publish failed, relying on resends"
                );
                metrics::record_channel_publish_failure();
                false
            }
        }
    }

    /// Decode an inbound payload.
    ///
    /// Returns `None` for malformed payloads and for our own messages echoed
    /// back by the transport.
    #[must_use]
    pub fn receive(&self, payload: &[u8], from: Option<Sid>) -> Option<InboundMessage> {
        let message = match sync_protocol::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                debug!(
                    target: "sync.channel",
                    reason = e.reason(),
                    error = %e,
                    "Dropped inbound payload"
                );
                metrics::record_channel_dropped(e.reason());
                return None;
            }
        };

        let sender = from
            .and_then(Sid::non_empty)
            .or_else(|| message.payload_sid().cloned());

        if sender.as_ref() == Some(&self.local_sid) {
            metrics::record_channel_dropped("self");
            return None;
        }

        metrics::record_channel_message(message.message_type());
        Some(InboundMessage { sender, message })
    }
}
