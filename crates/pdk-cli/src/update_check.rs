// Best-effort update-check stamp. Hosted CI environments suppress it
// entirely; failures never surface to the user.

use chrono::{DateTime, Duration, Utc};
use pdk_core::constants::{pdk_home, running_under_ci, PDK_VERSION, UPDATE_CHECK_FILE};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct UpdateStamp {
    #[serde(rename = "lastCheck")]
    last_check: DateTime<Utc>,
    version: String,
}

/// Record that this version ran recently. At most once per day; skipped
/// under CI.
pub fn maybe_check() {
    if running_under_ci() {
        tracing::debug!("hosted CI detected, skipping update check");
        return;
    }

    let path = pdk_home().join(UPDATE_CHECK_FILE);

    if let Ok(text) = std::fs::read_to_string(&path) {
        if let Ok(stamp) = serde_json::from_str::<UpdateStamp>(&text) {
            if Utc::now() - stamp.last_check < Duration::hours(24) {
                return;
            }
        }
    }

    let stamp = UpdateStamp {
        last_check: Utc::now(),
        version: PDK_VERSION.to_string(),
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Ok(json) = serde_json::to_string_pretty(&stamp) {
        let _ = std::fs::write(&path, json);
    }
    tracing::debug!("update stamp refreshed at {}", path.display());
}
