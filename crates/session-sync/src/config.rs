//! Session synchronization configuration.
//!
//! Every timing constant of the protocol is loaded from `SYNC_*` environment
//! variables with the defaults below. Nothing is required, but a value that is
//! present and unparseable is an error rather than a silent fallback.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default reconciliation sweep interval.
pub const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 2_500;

/// Default warm-up after start during which sweeps never evict.
pub const DEFAULT_PRUNE_WARMUP_MS: u64 = 3_500;

/// Default per-participant grace after first observation.
pub const DEFAULT_PRESENCE_GRACE_MS: u64 = 3_500;

/// Default window after the last non-empty membership read during which an
/// empty read is treated as transient.
pub const DEFAULT_EMPTY_READ_GUARD_MS: u64 = 5_000;

/// Default number of consecutive missed sweeps before eviction.
pub const DEFAULT_MISSED_SWEEPS: u32 = 2;

/// Default anti-flap window for mic-state writes.
pub const DEFAULT_ANTI_FLAP_WINDOW_MS: u64 = 1_200;

/// Default freshness ceiling for received `mic_state` broadcasts (24 h).
pub const DEFAULT_MIC_BROADCAST_TTL_MS: u64 = 24 * 60 * 60 * 1_000;

/// Default grace before an SDK "mic disabled" flag is trusted.
pub const DEFAULT_SDK_MUTE_GRACE_MS: u64 = 200;

/// Default grace before unreadable publication flags default to muted.
pub const DEFAULT_UNREADABLE_FLAGS_GRACE_MS: u64 = 1_200;

/// Default grace before "no audio publication" defaults to muted.
pub const DEFAULT_NO_PUBLICATION_GRACE_MS: u64 = 800;

/// Default bounded wait for local media before replying with mic state.
pub const DEFAULT_LOCAL_MEDIA_TIMEOUT_MS: u64 = 1_500;

/// Default audio level above which a participant is considered audible.
pub const DEFAULT_AUDIO_LEVEL_THRESHOLD: f32 = 0.02;

/// Default capacity of the view-update broadcast channel.
pub const DEFAULT_VIEW_UPDATE_BUFFER: usize = 256;

/// Default mic-state burst schedule.
pub const DEFAULT_MIC_STATE_BURST_MS: [u64; 5] = [0, 240, 850, 1_900, 3_600];

/// Default `peer_hello` burst schedule.
pub const DEFAULT_PEER_HELLO_BURST_MS: [u64; 3] = [120, 520, 1_400];

/// Default `mic_state_req` burst schedule.
pub const DEFAULT_MIC_REQUEST_BURST_MS: [u64; 5] = [60, 260, 820, 1_650, 3_200];

/// Default mic re-resolution schedule after connect.
pub const DEFAULT_MIC_RESYNC_MS: [u64; 3] = [350, 900, 1_700];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Session synchronization configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Reconciliation sweep interval (`SYNC_RECONCILE_INTERVAL_MS`).
    pub reconcile_interval: Duration,

    /// Sweep warm-up after start (`SYNC_PRUNE_WARMUP_MS`).
    pub prune_warmup: Duration,

    /// Per-participant eviction grace (`SYNC_PRESENCE_GRACE_MS`).
    pub presence_grace: Duration,

    /// Empty-read guard window (`SYNC_EMPTY_READ_GUARD_MS`).
    pub empty_read_guard: Duration,

    /// Consecutive missed sweeps before eviction (`SYNC_MISSED_SWEEPS`).
    pub missed_sweeps_before_eviction: u32,

    /// Mic-state anti-flap window (`SYNC_ANTI_FLAP_WINDOW_MS`).
    pub anti_flap_window: Duration,

    /// Broadcast freshness ceiling (`SYNC_MIC_BROADCAST_TTL_MS`).
    pub mic_broadcast_ttl: Duration,

    /// SDK mute flag grace (`SYNC_SDK_MUTE_GRACE_MS`).
    pub sdk_mute_grace: Duration,

    /// Unreadable flags grace (`SYNC_UNREADABLE_FLAGS_GRACE_MS`).
    pub unreadable_flags_grace: Duration,

    /// No-publication grace (`SYNC_NO_PUBLICATION_GRACE_MS`).
    pub no_publication_grace: Duration,

    /// Local media ready wait (`SYNC_LOCAL_MEDIA_TIMEOUT_MS`).
    pub local_media_timeout: Duration,

    /// Audible threshold for the audio-level heuristic (`SYNC_AUDIO_LEVEL_THRESHOLD`).
    pub audio_level_threshold: f32,

    /// Mic-state burst (`SYNC_MIC_STATE_BURST_MS`, comma-separated).
    pub mic_state_burst: Vec<Duration>,

    /// Peer hello burst (`SYNC_PEER_HELLO_BURST_MS`).
    pub peer_hello_burst: Vec<Duration>,

    /// Mic request burst (`SYNC_MIC_REQUEST_BURST_MS`).
    pub mic_request_burst: Vec<Duration>,

    /// Mic re-sync schedule (`SYNC_MIC_RESYNC_MS`).
    pub mic_resync_schedule: Vec<Duration>,

    /// View-update channel capacity (`SYNC_VIEW_UPDATE_BUFFER`).
    pub view_update_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_millis(DEFAULT_RECONCILE_INTERVAL_MS),
            prune_warmup: Duration::from_millis(DEFAULT_PRUNE_WARMUP_MS),
            presence_grace: Duration::from_millis(DEFAULT_PRESENCE_GRACE_MS),
            empty_read_guard: Duration::from_millis(DEFAULT_EMPTY_READ_GUARD_MS),
            missed_sweeps_before_eviction: DEFAULT_MISSED_SWEEPS,
            anti_flap_window: Duration::from_millis(DEFAULT_ANTI_FLAP_WINDOW_MS),
            mic_broadcast_ttl: Duration::from_millis(DEFAULT_MIC_BROADCAST_TTL_MS),
            sdk_mute_grace: Duration::from_millis(DEFAULT_SDK_MUTE_GRACE_MS),
            unreadable_flags_grace: Duration::from_millis(DEFAULT_UNREADABLE_FLAGS_GRACE_MS),
            no_publication_grace: Duration::from_millis(DEFAULT_NO_PUBLICATION_GRACE_MS),
            local_media_timeout: Duration::from_millis(DEFAULT_LOCAL_MEDIA_TIMEOUT_MS),
            audio_level_threshold: DEFAULT_AUDIO_LEVEL_THRESHOLD,
            mic_state_burst: millis(&DEFAULT_MIC_STATE_BURST_MS),
            peer_hello_burst: millis(&DEFAULT_PEER_HELLO_BURST_MS),
            mic_request_burst: millis(&DEFAULT_MIC_REQUEST_BURST_MS),
            mic_resync_schedule: millis(&DEFAULT_MIC_RESYNC_MS),
            view_update_buffer: DEFAULT_VIEW_UPDATE_BUFFER,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            reconcile_interval: duration_var(
                vars,
                "SYNC_RECONCILE_INTERVAL_MS",
                defaults.reconcile_interval,
            )?,
            prune_warmup: duration_var(vars, "SYNC_PRUNE_WARMUP_MS", defaults.prune_warmup)?,
            presence_grace: duration_var(vars, "SYNC_PRESENCE_GRACE_MS", defaults.presence_grace)?,
            empty_read_guard: duration_var(
                vars,
                "SYNC_EMPTY_READ_GUARD_MS",
                defaults.empty_read_guard,
            )?,
            missed_sweeps_before_eviction: parsed_var(
                vars,
                "SYNC_MISSED_SWEEPS",
                defaults.missed_sweeps_before_eviction,
            )?,
            anti_flap_window: duration_var(
                vars,
                "SYNC_ANTI_FLAP_WINDOW_MS",
                defaults.anti_flap_window,
            )?,
            mic_broadcast_ttl: duration_var(
                vars,
                "SYNC_MIC_BROADCAST_TTL_MS",
                defaults.mic_broadcast_ttl,
            )?,
            sdk_mute_grace: duration_var(vars, "SYNC_SDK_MUTE_GRACE_MS", defaults.sdk_mute_grace)?,
            unreadable_flags_grace: duration_var(
                vars,
                "SYNC_UNREADABLE_FLAGS_GRACE_MS",
                defaults.unreadable_flags_grace,
            )?,
            no_publication_grace: duration_var(
                vars,
                "SYNC_NO_PUBLICATION_GRACE_MS",
                defaults.no_publication_grace,
            )?,
            local_media_timeout: duration_var(
                vars,
                "SYNC_LOCAL_MEDIA_TIMEOUT_MS",
                defaults.local_media_timeout,
            )?,
            audio_level_threshold: parsed_var(
                vars,
                "SYNC_AUDIO_LEVEL_THRESHOLD",
                defaults.audio_level_threshold,
            )?,
            mic_state_burst: schedule_var(vars, "SYNC_MIC_STATE_BURST_MS", defaults.mic_state_burst)?,
            peer_hello_burst: schedule_var(
                vars,
                "SYNC_PEER_HELLO_BURST_MS",
                defaults.peer_hello_burst,
            )?,
            mic_request_burst: schedule_var(
                vars,
                "SYNC_MIC_REQUEST_BURST_MS",
                defaults.mic_request_burst,
            )?,
            mic_resync_schedule: schedule_var(
                vars,
                "SYNC_MIC_RESYNC_MS",
                defaults.mic_resync_schedule,
            )?,
            view_update_buffer: parsed_var(
                vars,
                "SYNC_VIEW_UPDATE_BUFFER",
                defaults.view_update_buffer,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.reconcile_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "SYNC_RECONCILE_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }
        if self.missed_sweeps_before_eviction == 0 {
            return Err(ConfigError::InvalidValue(
                "SYNC_MISSED_SWEEPS must be at least 1".to_string(),
            ));
        }
        if self.view_update_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "SYNC_VIEW_UPDATE_BUFFER must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.audio_level_threshold) {
            return Err(ConfigError::InvalidValue(format!(
                "SYNC_AUDIO_LEVEL_THRESHOLD must be within 0..=1, got {}",
                self.audio_level_threshold
            )));
        }
        Ok(())
    }
}

fn millis(values: &[u64]) -> Vec<Duration> {
    values.iter().copied().map(Duration::from_millis).collect()
}

fn parsed_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
        None => Ok(default),
    }
}

fn duration_var(
    vars: &HashMap<String, String>,
    name: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match vars.get(name) {
        Some(_) => parsed_var(vars, name, 0u64).map(Duration::from_millis),
        None => Ok(default),
    }
}

/// Parse a comma-separated list of millisecond delays, e.g. `"0, 240,850"`.
///
/// The result is sorted so that burst positions (`n`) follow send order.
fn schedule_var(
    vars: &HashMap<String, String>,
    name: &str,
    default: Vec<Duration>,
) -> Result<Vec<Duration>, ConfigError> {
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };

    let mut delays = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidValue(format!("{name}: '{part}' is not a delay")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if delays.is_empty() {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must list at least one delay"
        )));
    }
    delays.sort();
    Ok(delays)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = SyncConfig::from_vars(&HashMap::new()).expect("defaults should load");

        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.reconcile_interval, Duration::from_millis(2_500));
        assert_eq!(config.prune_warmup, Duration::from_millis(3_500));
        assert_eq!(config.empty_read_guard, Duration::from_millis(5_000));
        assert_eq!(config.missed_sweeps_before_eviction, 2);
        assert_eq!(config.anti_flap_window, Duration::from_millis(1_200));
        assert_eq!(config.mic_broadcast_ttl, Duration::from_secs(86_400));
        assert_eq!(config.local_media_timeout, Duration::from_millis(1_500));
        assert_eq!(
            config.mic_state_burst,
            millis(&[0, 240, 850, 1_900, 3_600])
        );
        assert_eq!(config.peer_hello_burst, millis(&[120, 520, 1_400]));
        assert_eq!(
            config.mic_request_burst,
            millis(&[60, 260, 820, 1_650, 3_200])
        );
        assert_eq!(config.mic_resync_schedule, millis(&[350, 900, 1_700]));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let config = SyncConfig::from_vars(&vars(&[
            ("SYNC_RECONCILE_INTERVAL_MS", "1000"),
            ("SYNC_MISSED_SWEEPS", "3"),
            ("SYNC_ANTI_FLAP_WINDOW_MS", "900"),
            ("SYNC_PEER_HELLO_BURST_MS", "500, 100 ,300"),
            ("SYNC_VIEW_UPDATE_BUFFER", "32"),
        ]))
        .expect("custom values should load");

        assert_eq!(config.reconcile_interval, Duration::from_secs(1));
        assert_eq!(config.missed_sweeps_before_eviction, 3);
        assert_eq!(config.anti_flap_window, Duration::from_millis(900));
        assert_eq!(config.peer_hello_burst, millis(&[100, 300, 500]));
        assert_eq!(config.view_update_buffer, 32);
    }

    #[test]
    fn test_invalid_burst_entry_is_rejected() {
        let result = SyncConfig::from_vars(&vars(&[("SYNC_MIC_STATE_BURST_MS", "0,abc,850")]));
        assert!(
            matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("SYNC_MIC_STATE_BURST_MS"))
        );
    }

    #[test]
    fn test_empty_burst_is_rejected() {
        let result = SyncConfig::from_vars(&vars(&[("SYNC_MIC_RESYNC_MS", " , ")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let result = SyncConfig::from_vars(&vars(&[("SYNC_PRUNE_WARMUP_MS", "soon")]));
        assert!(
            matches!(result, Err(ConfigError::InvalidValue(msg)) if msg == "SYNC_PRUNE_WARMUP_MS=soon")
        );
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let result = SyncConfig::from_vars(&vars(&[("SYNC_RECONCILE_INTERVAL_MS", "0")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_zero_missed_sweeps_is_rejected() {
        let result = SyncConfig::from_vars(&vars(&[("SYNC_MISSED_SWEEPS", "0")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }
}
