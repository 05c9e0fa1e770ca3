//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::deploy::orchestrator::DeployTimeouts;
use crate::registry::registry::PresencePolicy;
use crate::retry::RetryPolicy;
use crate::upload::assembler::UploadOptions;
use crate::workers::{presence, upload_gc, watchdog};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// HTTP server configuration
    pub server: ServerOptions,

    /// Opaque admin bearer token; supplied by the operator
    pub admin_token: String,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Presence and heartbeat-rate policy
    pub presence: PresencePolicy,

    /// Upload session retention
    pub uploads: UploadOptions,

    /// Deployment stage timeouts
    pub deploy: DeployTimeouts,

    /// Retry policy for storage write paths
    pub retry: RetryPolicy,

    /// Event hub configuration
    pub events: EventOptions,

    /// Device-list cache configuration
    pub cache: CacheOptions,

    /// Presence sweep worker options
    pub presence_sweep: presence::Options,

    /// Upload GC worker options
    pub upload_gc: upload_gc::Options,

    /// Deployment watchdog options
    pub watchdog: watchdog::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            server: ServerOptions::default(),
            admin_token: String::new(),
            storage: StorageOptions::default(),
            presence: PresencePolicy::default(),
            uploads: UploadOptions::default(),
            deploy: DeployTimeouts::default(),
            retry: RetryPolicy::default(),
            events: EventOptions::default(),
            cache: CacheOptions::default(),
            presence_sweep: presence::Options::default(),
            upload_gc: upload_gc::Options::default(),
            watchdog: watchdog::Options::default(),
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Storage options
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Blob directory for artifact payloads
    pub artifact_dir: PathBuf,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("/var/lib/fleetd/artifacts"),
        }
    }
}

/// Event hub options
#[derive(Debug, Clone)]
pub struct EventOptions {
    /// Per-session broadcast buffer capacity
    pub capacity: usize,
}

impl Default for EventOptions {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// Device-list cache options
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// TTL for cached device-list pages
    pub device_list_ttl: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            device_list_ttl: Duration::from_secs(5),
        }
    }
}
