//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::{AppOptions, CacheOptions};
use crate::artifacts::store::ArtifactStore;
use crate::cache::devices::DeviceListCache;
use crate::deploy::notify::HttpNotifier;
use crate::deploy::orchestrator::Orchestrator;
use crate::errors::CoreError;
use crate::events::hub::EventHub;
use crate::registry::registry::DeviceRegistry;
use crate::upload::assembler::UploadAssembler;

/// Application caches
pub struct Caches {
    pub device_list: Arc<DeviceListCache>,
}

impl Caches {
    pub fn new(options: &CacheOptions) -> Self {
        Self {
            device_list: Arc::new(DeviceListCache::new(options.device_list_ttl)),
        }
    }
}

/// Main application state
pub struct AppState {
    /// Event fan-out hub
    pub hub: Arc<EventHub>,

    /// Device registry and heartbeat processor
    pub registry: Arc<DeviceRegistry>,

    /// Content-addressed artifact store
    pub artifacts: Arc<ArtifactStore>,

    /// Chunked upload assembler
    pub assembler: Arc<UploadAssembler>,

    /// Deployment orchestrator
    pub orchestrator: Arc<Orchestrator>,

    /// Application caches
    pub caches: Arc<Caches>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, CoreError> {
        info!("Initializing application state...");

        let hub = Arc::new(EventHub::new(options.events.capacity));

        let artifacts = Arc::new(
            ArtifactStore::open(options.storage.artifact_dir.clone(), options.retry.clone())
                .await?,
        );

        let registry = Arc::new(DeviceRegistry::new(options.presence.clone(), hub.clone()));

        let assembler = Arc::new(UploadAssembler::new(
            artifacts.clone(),
            options.uploads.clone(),
        ));

        let notifier = Arc::new(HttpNotifier::new()?);
        let orchestrator = Arc::new(Orchestrator::new(
            registry.clone(),
            notifier,
            hub.clone(),
            options.deploy.clone(),
        ));

        let caches = Arc::new(Caches::new(&options.cache));

        Ok(Self {
            hub,
            registry,
            artifacts,
            assembler,
            orchestrator,
            caches,
        })
    }
}
