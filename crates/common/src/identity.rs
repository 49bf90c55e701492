//! Device and session identity.
//!
//! The media server requires every participant identity to be unique, yet one
//! user may join the same room from several devices or several processes on
//! one device. Join requests therefore carry two extra ids:
//!
//! - `device_id`: stable per device, persisted to a small file on first use
//! - `session_id`: fresh for every process
//!
//! Both are `prefix_<random>_<time>` strings in lowercase base 36.

use rand::Rng;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const DEVICE_PREFIX: &str = "dev";
const SESSION_PREFIX: &str = "sess";
const RANDOM_LEN: usize = 11;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a `prefix_<random>_<time>` identifier.
#[must_use]
pub fn make_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let random: String = (0..RANDOM_LEN)
        .map(|_| char::from(BASE36.get(rng.gen_range(0..BASE36.len())).copied().unwrap_or(b'0')))
        .collect();
    let millis = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
    format!("{prefix}_{random}_{}", to_base36(millis))
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        #[allow(clippy::cast_possible_truncation)]
        let d = (n % 36) as usize;
        digits.push(BASE36.get(d).copied().unwrap_or(b'0'));
        n /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// Identity sent with every join request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub session_id: String,
}

impl DeviceIdentity {
    /// Load the device id from `path`, creating and persisting one if the file
    /// is missing or empty, and pair it with a fresh session id.
    ///
    /// Persisting is best effort: if the file cannot be written the generated
    /// id is still used for this process.
    ///
    /// # Errors
    ///
    /// Returns an error only if an existing file cannot be read.
    pub fn load_or_create(path: &Path) -> io::Result<Self> {
        let stored = match fs::read_to_string(path) {
            Ok(contents) => contents.trim().to_string(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };

        let device_id = if stored.is_empty() {
            let id = make_id(DEVICE_PREFIX);
            if let Err(e) = persist(path, &id) {
                warn!(
                    target: "common.identity",
                    path = %path.display(),
                    error = %e,
                    "Could not persist device id, using it for this process only"
                );
            } else {
                debug!(target: "common.identity", path = %path.display(), "Created device id");
            }
            id
        } else {
            stored
        };

        Ok(Self {
            device_id,
            session_id: make_id(SESSION_PREFIX),
        })
    }

    /// Identity that is not persisted anywhere (simulated peers, tests).
    #[must_use]
    pub fn ephemeral() -> Self {
        Self {
            device_id: make_id(DEVICE_PREFIX),
            session_id: make_id(SESSION_PREFIX),
        }
    }
}

fn persist(path: &Path, id: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, id)
}

/// Default location of the device id file: `$SYNC_DEVICE_ID_FILE`, or
/// `.session-sync/device_id` under the current directory.
#[must_use]
pub fn default_device_id_path() -> PathBuf {
    std::env::var_os("SYNC_DEVICE_ID_FILE")
        .map_or_else(|| PathBuf::from(".session-sync").join("device_id"), PathBuf::from)
}
