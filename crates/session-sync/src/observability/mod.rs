//! Observability for the session synchronization core.
//!
//! Every component logs under a stable `sync.*` tracing target and records
//! `sync_`-prefixed metrics through the `metrics` facade. Labels are bounded:
//!
//! - `type`: the six broadcast message types
//! - `reason`: codec drop reasons and sweep suppression reasons
//! - `outcome`: mic-state write outcomes
//! - `kind`: burst kinds
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `sync_channel_messages_total` | Counter | `type` | Accepted inbound messages |
//! | `sync_channel_dropped_total` | Counter | `reason` | Dropped inbound payloads |
//! | `sync_channel_publish_failures_total` | Counter | none | Swallowed publish failures |
//! | `sync_presence_evictions_total` | Counter | none | Grace evictions |
//! | `sync_presence_sweeps_suppressed_total` | Counter | `reason` | Sweeps that evicted nothing by rule |
//! | `sync_mic_writes_total` | Counter | `outcome` | Mic-state write decisions |
//! | `sync_screen_share_yields_total` | Counter | none | Local shares that lost arbitration |
//! | `sync_bursts_scheduled_total` | Counter | `kind` | Bursts started |
//! | `sync_participants_live` | Gauge | none | Tracked participants |
//! | `sync_actor_mailbox_depth` | Gauge | none | Session actor backlog |
//! | `sync_local_media_wait_seconds` | Histogram | none | Wait for local media before replying |

pub mod metrics;
