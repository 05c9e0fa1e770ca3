//! Event fan-out hub
//!
//! A broadcast point for state-change events. Delivery is at-least-once
//! per connected session, in generation order for a given entity. There
//! is no replay log: events generated while an observer is disconnected
//! are gone, and the observer must re-fetch a snapshot before resuming.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// A state-change event streamed to observers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A device's presence or metrics changed materially
    #[serde(rename = "device.updated")]
    DeviceUpdated {
        device_id: String,
        alias: String,
        status: String,
        battery: Option<u8>,
        app_version: Option<String>,
        last_seen_at: Option<DateTime<Utc>>,
    },

    /// A deployment job transitioned state
    #[serde(rename = "deployment.updated")]
    DeploymentUpdated {
        job_id: String,
        artifact_id: String,
        device_id: String,
        state: String,
        failure_reason: Option<String>,
    },

    /// The session lagged and dropped events; observer must re-snapshot
    #[serde(rename = "stream.reset")]
    StreamReset { dropped: u64 },
}

impl Event {
    /// Event name used for the SSE `event:` field
    pub fn kind(&self) -> &'static str {
        match self {
            Event::DeviceUpdated { .. } => "device.updated",
            Event::DeploymentUpdated { .. } => "deployment.updated",
            Event::StreamReset { .. } => "stream.reset",
        }
    }
}

/// Fan-out hub over a broadcast channel
pub struct EventHub {
    tx: broadcast::Sender<Event>,
}

impl EventHub {
    /// Create a hub with the given per-session buffer capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all connected observers
    ///
    /// Publishing with no observers is not an error.
    pub fn publish(&self, event: Event) {
        if let Err(e) = self.tx.send(event) {
            debug!("No observers connected, dropping event: {}", e.0.kind());
        }
    }

    /// Open a new observer session
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of currently connected observer sessions
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
