//! Device records and presence derivation

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Derived online/offline status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
        }
    }
}

/// Canonical device record
///
/// `id` and `token` are immutable for the device lifetime; `alias` is
/// admin-editable. Presence fields are only written by the heartbeat
/// path. Deletion is a tombstone so historical installation records stay
/// attributable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Stable device ID
    pub id: String,

    /// Opaque bearer token identifying the device
    pub token: String,

    /// Human-readable alias (mutable)
    pub alias: String,

    /// Registration timestamp
    pub created_at: DateTime<Utc>,

    /// Receipt time of the last accepted heartbeat
    pub last_seen_at: Option<DateTime<Utc>>,

    /// Battery level in percent (0-100)
    pub battery: Option<u8>,

    /// Installed app version fingerprint
    pub app_version: Option<String>,

    /// Push notification address, if the device has one
    pub push_address: Option<String>,

    /// Tombstone flag; the token stops resolving once set
    pub deleted: bool,

    /// Last status published to observers, for flip detection
    pub last_published_status: DeviceStatus,

    /// Number of consecutive heartbeats arriving faster than the minimum
    /// interval; resets on a properly spaced beat
    pub fast_beats: u32,
}

impl Device {
    pub fn new(
        id: String,
        token: String,
        alias: String,
        push_address: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            token,
            alias,
            created_at: now,
            last_seen_at: None,
            battery: None,
            app_version: None,
            push_address,
            deleted: false,
            last_published_status: DeviceStatus::Offline,
            fast_beats: 0,
        }
    }

    /// Merge heartbeat metrics last-write-wins.
    ///
    /// Returns true when the change is material (battery moved by at
    /// least one percent or the app version changed), which is what
    /// gates `device.updated` emission against metric churn.
    pub fn apply_metrics(&mut self, battery: Option<u8>, app_version: Option<String>) -> bool {
        let mut material = false;

        if let Some(level) = battery {
            match self.battery {
                Some(prev) if prev.abs_diff(level) < 1 => {}
                Some(_) | None => material = true,
            }
            self.battery = Some(level);
        }

        if let Some(version) = app_version {
            if self.app_version.as_deref() != Some(version.as_str()) {
                material = true;
            }
            self.app_version = Some(version);
        }

        material
    }
}

/// Derive presence from the last-seen timestamp and the timeout policy.
///
/// Pure over its inputs so that reads, the periodic sweep, and tests all
/// agree on the same derivation.
pub fn presence_status(
    now: DateTime<Utc>,
    last_seen_at: Option<DateTime<Utc>>,
    timeout: Duration,
) -> DeviceStatus {
    match last_seen_at {
        Some(seen) if now - seen <= timeout => DeviceStatus::Online,
        _ => DeviceStatus::Offline,
    }
}
