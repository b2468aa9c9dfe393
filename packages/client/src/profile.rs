//! Display-name persistence.
//!
//! A peripheral convenience, not part of the sync contract: the user's
//! display name is remembered across sessions in a small JSON file with a
//! 24-hour expiry. Expired or corrupt entries are discarded and removed.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use banstage_shared::time::Clock;

const EXPIRATION_MILLIS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to write profile: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode profile: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredProfile {
    name: String,
    stored_at: i64,
}

/// Persist the display name with the current timestamp
pub fn save_display_name(path: &Path, name: &str, clock: &dyn Clock) -> Result<(), ProfileError> {
    let profile = StoredProfile {
        name: name.to_string(),
        stored_at: clock.now_utc_millis(),
    };
    std::fs::write(path, serde_json::to_string(&profile)?)?;
    Ok(())
}

/// Load the persisted display name, if present and fresh.
///
/// Expired or unreadable entries are removed and `None` is returned.
pub fn load_display_name(path: &Path, clock: &dyn Clock) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let profile: StoredProfile = match serde_json::from_str(&raw) {
        Ok(profile) => profile,
        Err(e) => {
            tracing::debug!("Discarding corrupt profile: {}", e);
            let _ = std::fs::remove_file(path);
            return None;
        }
    };

    if clock.now_utc_millis() > profile.stored_at + EXPIRATION_MILLIS {
        let _ = std::fs::remove_file(path);
        return None;
    }
    Some(profile.name)
}

/// Remove the persisted display name
pub fn clear_display_name(path: &Path) {
    let _ = std::fs::remove_file(path);
}
