//! Metric definitions for session synchronization.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sync_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return its handle.
///
/// Must be called before any metric is recorded for the values to be kept.
///
/// # Errors
///
/// Returns an error if a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Local media normally comes up well inside the 1.5 s reply bound
        .set_buckets_for_metric(
            Matcher::Prefix("sync_local_media_wait".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 1.500, 2.000],
        )
        .map_err(|e| format!("Failed to set local media wait buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Broadcast Channel
// ============================================================================

/// Record an accepted inbound message.
///
/// Metric: `sync_channel_messages_total`
/// Labels: `type` (6 message types)
pub fn record_channel_message(message_type: &'static str) {
    counter!("sync_channel_messages_total", "type" => message_type).increment(1);
}

/// Record a dropped inbound payload.
///
/// Metric: `sync_channel_dropped_total`
/// Labels: `reason` (malformed, missing_type, unknown_type, invalid_fields, self)
pub fn record_channel_dropped(reason: &'static str) {
    counter!("sync_channel_dropped_total", "reason" => reason).increment(1);
}

/// Record a publish failure that was swallowed.
///
/// Metric: `sync_channel_publish_failures_total`
pub fn record_channel_publish_failure() {
    counter!("sync_channel_publish_failures_total").increment(1);
}

// ============================================================================
// Presence
// ============================================================================

/// Metric: `sync_presence_evictions_total`
pub fn record_presence_eviction() {
    counter!("sync_presence_evictions_total").increment(1);
}

/// Record a sweep that was not allowed to evict.
///
/// Metric: `sync_presence_sweeps_suppressed_total`
/// Labels: `reason` (warm_up, not_connected, empty_read, unenumerable)
pub fn record_sweep_suppressed(reason: &'static str) {
    counter!("sync_presence_sweeps_suppressed_total", "reason" => reason).increment(1);
}

/// Set the number of tracked participants, local included.
///
/// Metric: `sync_participants_live`
pub fn set_participants_live(count: usize) {
    // usize to f64 conversion is safe for realistic room sizes
    #[allow(clippy::cast_precision_loss)]
    gauge!("sync_participants_live").set(count as f64);
}

// ============================================================================
// Mic State
// ============================================================================

/// Record a mic-state write decision.
///
/// Metric: `sync_mic_writes_total`
/// Labels: `outcome` (written, refreshed, rejected, ignored_unknown)
pub fn record_mic_write(outcome: &'static str) {
    counter!("sync_mic_writes_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// Screen Share
// ============================================================================

/// Metric: `sync_screen_share_yields_total`
pub fn record_screen_share_yield() {
    counter!("sync_screen_share_yields_total").increment(1);
}

// ============================================================================
// Session Actor
// ============================================================================

/// Record a started burst.
///
/// Metric: `sync_bursts_scheduled_total`
/// Labels: `kind` (peer_hello, mic_state_req, mic_state, mic_resync)
pub fn record_burst_scheduled(kind: &'static str) {
    counter!("sync_bursts_scheduled_total", "kind" => kind).increment(1);
}

/// Metric: `sync_actor_mailbox_depth`
pub fn set_actor_mailbox_depth(depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sync_actor_mailbox_depth").set(depth as f64);
}

/// Record how long a reply waited for local media.
///
/// Metric: `sync_local_media_wait_seconds`
pub fn record_local_media_wait(duration: Duration) {
    histogram!("sync_local_media_wait_seconds").record(duration.as_secs_f64());
}
