//! Device registry
//!
//! Canonical device records with per-device locks. Presence is derived
//! lazily at read time and by the periodic sweep; heartbeats only write
//! `last_seen_at` and metrics.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::errors::CoreError;
use crate::events::hub::{Event, EventHub};
use crate::registry::device::{presence_status, Device, DeviceStatus};
use crate::utils::generate_uuid;

/// Presence and heartbeat-rate policy
#[derive(Debug, Clone)]
pub struct PresencePolicy {
    /// Gap after which a device is considered offline. Policy default is
    /// twice the expected heartbeat interval, tolerating one missed beat.
    pub presence_timeout: Duration,

    /// Minimum expected spacing between heartbeats from one device
    pub min_beat_interval: Duration,

    /// Consecutive fast beats tolerated before rejecting with RateLimited
    pub burst_allowance: u32,
}

impl Default for PresencePolicy {
    fn default() -> Self {
        Self {
            presence_timeout: Duration::seconds(240),
            min_beat_interval: Duration::seconds(10),
            burst_allowance: 10,
        }
    }
}

/// Metrics carried by a heartbeat
#[derive(Debug, Clone, Default)]
pub struct HeartbeatMetrics {
    pub battery: Option<u8>,
    pub app_version: Option<String>,
}

/// Heartbeat acknowledgement
#[derive(Debug, Clone)]
pub struct HeartbeatAck {
    pub ok: bool,
    pub server_time_utc: DateTime<Utc>,

    /// The beat flipped the device from offline to online; listing
    /// caches must be invalidated
    pub status_flipped: bool,
}

/// One row of a device listing, with the lazily derived status
#[derive(Debug, Clone)]
pub struct DeviceRow {
    pub device: Device,
    pub status: DeviceStatus,
}

/// A page of the device listing
#[derive(Debug, Clone)]
pub struct DevicePage {
    pub devices: Vec<DeviceRow>,
    pub page: u64,
    pub limit: u64,
    pub total_count: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

/// In-memory device registry with a token index
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Arc<RwLock<Device>>>>,
    token_index: RwLock<HashMap<String, String>>,
    policy: PresencePolicy,
    hub: Arc<EventHub>,
}

impl DeviceRegistry {
    pub fn new(policy: PresencePolicy, hub: Arc<EventHub>) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            token_index: RwLock::new(HashMap::new()),
            policy,
            hub,
        }
    }

    pub fn policy(&self) -> &PresencePolicy {
        &self.policy
    }

    /// Register a new device, minting its id and opaque bearer token
    pub fn register(
        &self,
        alias: String,
        push_address: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Device, CoreError> {
        if alias.trim().is_empty() {
            return Err(CoreError::Validation("device alias must not be empty".to_string()));
        }

        let device = Device::new(generate_uuid(), generate_uuid(), alias, push_address, now);

        let snapshot = device.clone();
        {
            let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
            let mut tokens = self.token_index.write().unwrap_or_else(|e| e.into_inner());
            tokens.insert(device.token.clone(), device.id.clone());
            devices.insert(device.id.clone(), Arc::new(RwLock::new(device)));
        }

        info!("Registered device {} ({})", snapshot.id, snapshot.alias);
        Ok(snapshot)
    }

    /// Snapshot a device record by id (tombstoned records included)
    pub fn get(&self, device_id: &str) -> Option<Device> {
        let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
        devices
            .get(device_id)
            .map(|entry| entry.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    /// Snapshot a live (non-tombstoned) device by id
    pub fn get_active(&self, device_id: &str) -> Option<Device> {
        self.get(device_id).filter(|d| !d.deleted)
    }

    /// Resolve a bearer token to a live device
    pub fn resolve_token(&self, token: &str) -> Result<Device, CoreError> {
        let device_id = {
            let tokens = self.token_index.read().unwrap_or_else(|e| e.into_inner());
            tokens.get(token).cloned()
        };

        device_id
            .and_then(|id| self.get_active(&id))
            .ok_or_else(|| CoreError::Unauthenticated("unknown or revoked device token".to_string()))
    }

    /// Update a device's alias (admin edit; id and token are immutable)
    pub fn rename(&self, device_id: &str, alias: String) -> Result<Device, CoreError> {
        if alias.trim().is_empty() {
            return Err(CoreError::Validation("device alias must not be empty".to_string()));
        }

        let entry = self.entry(device_id)?;
        let mut device = entry.write().unwrap_or_else(|e| e.into_inner());
        if device.deleted {
            return Err(CoreError::NotFound(format!("device {} not found", device_id)));
        }
        device.alias = alias;
        Ok(device.clone())
    }

    /// Tombstone a device; historical jobs keep referencing its id
    pub fn remove(&self, device_id: &str) -> Result<(), CoreError> {
        let entry = self.entry(device_id)?;
        let token = {
            let mut device = entry.write().unwrap_or_else(|e| e.into_inner());
            if device.deleted {
                return Err(CoreError::NotFound(format!("device {} not found", device_id)));
            }
            device.deleted = true;
            device.token.clone()
        };

        let mut tokens = self.token_index.write().unwrap_or_else(|e| e.into_inner());
        tokens.remove(&token);
        info!("Tombstoned device {}", device_id);
        Ok(())
    }

    /// Process a device heartbeat.
    ///
    /// `now` is the server receipt time; client-reported time is never
    /// trusted for freshness. Emits `device.updated` only on a status
    /// flip or a material metric change.
    pub fn record_heartbeat(
        &self,
        token: &str,
        metrics: HeartbeatMetrics,
        now: DateTime<Utc>,
    ) -> Result<HeartbeatAck, CoreError> {
        let device_id = self.resolve_token(token)?.id;
        let entry = self.entry(&device_id)?;

        let mut device = entry.write().unwrap_or_else(|e| e.into_inner());

        // Rate policy: fast beats are tolerated up to the burst
        // allowance; a properly spaced beat resets the counter.
        if let Some(last) = device.last_seen_at {
            if now - last < self.policy.min_beat_interval {
                device.fast_beats += 1;
                if device.fast_beats > self.policy.burst_allowance {
                    return Err(CoreError::RateLimited(format!(
                        "device {} is heartbeating faster than the minimum interval",
                        device.id
                    )));
                }
            } else {
                device.fast_beats = 0;
            }
        }

        device.last_seen_at = Some(now);
        let material = device.apply_metrics(metrics.battery, metrics.app_version);

        let flipped = device.last_published_status != DeviceStatus::Online;
        if flipped {
            device.last_published_status = DeviceStatus::Online;
        }

        if flipped || material {
            self.hub.publish(Self::device_event(&device, DeviceStatus::Online));
        }

        Ok(HeartbeatAck {
            ok: true,
            server_time_utc: now,
            status_flipped: flipped,
        })
    }

    /// List live devices, paginated, with lazily derived status
    pub fn list(&self, page: u64, limit: u64, now: DateTime<Utc>) -> Result<DevicePage, CoreError> {
        if limit == 0 {
            return Err(CoreError::Validation("limit must be at least 1".to_string()));
        }
        let page = page.max(1);

        let entries: Vec<Arc<RwLock<Device>>> = {
            let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
            devices.values().cloned().collect()
        };

        let mut rows: Vec<DeviceRow> = entries
            .iter()
            .filter_map(|entry| {
                let device = entry.read().unwrap_or_else(|e| e.into_inner()).clone();
                if device.deleted {
                    return None;
                }
                let status = presence_status(now, device.last_seen_at, self.policy.presence_timeout);
                Some(DeviceRow { device, status })
            })
            .collect();

        rows.sort_by(|a, b| {
            a.device
                .created_at
                .cmp(&b.device.created_at)
                .then_with(|| a.device.id.cmp(&b.device.id))
        });

        let total_count = rows.len() as u64;
        let total_pages = total_count.div_ceil(limit).max(1);
        let start = usize::try_from((page - 1).saturating_mul(limit)).unwrap_or(usize::MAX);
        let devices: Vec<DeviceRow> = rows.into_iter().skip(start).take(limit as usize).collect();

        Ok(DevicePage {
            devices,
            page,
            limit,
            total_count,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        })
    }

    /// Derived status of a single live device
    pub fn status_of(&self, device_id: &str, now: DateTime<Utc>) -> Option<DeviceStatus> {
        self.get_active(device_id)
            .map(|d| presence_status(now, d.last_seen_at, self.policy.presence_timeout))
    }

    /// Periodic presence sweep.
    ///
    /// Re-derives status for every live device purely from time passing
    /// and publishes `device.updated` for actual flips only. Idempotent:
    /// running it twice back to back publishes nothing the second time.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let entries: Vec<Arc<RwLock<Device>>> = {
            let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
            devices.values().cloned().collect()
        };

        let mut flips = 0;
        for entry in entries {
            let mut device = entry.write().unwrap_or_else(|e| e.into_inner());
            if device.deleted {
                continue;
            }

            let status = presence_status(now, device.last_seen_at, self.policy.presence_timeout);
            if status != device.last_published_status {
                device.last_published_status = status;
                self.hub.publish(Self::device_event(&device, status));
                flips += 1;
            }
        }

        if flips > 0 {
            debug!("Presence sweep flipped {} device(s)", flips);
        }
        flips
    }

    fn entry(&self, device_id: &str) -> Result<Arc<RwLock<Device>>, CoreError> {
        let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
        devices
            .get(device_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("device {} not found", device_id)))
    }

    fn device_event(device: &Device, status: DeviceStatus) -> Event {
        Event::DeviceUpdated {
            device_id: device.id.clone(),
            alias: device.alias.clone(),
            status: status.as_str().to_string(),
            battery: device.battery,
            app_version: device.app_version.clone(),
            last_seen_at: device.last_seen_at,
        }
    }
}
