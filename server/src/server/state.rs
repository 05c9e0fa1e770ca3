//! Server state

use std::sync::Arc;

use crate::app::state::{AppState, Caches};
use crate::artifacts::store::ArtifactStore;
use crate::deploy::orchestrator::Orchestrator;
use crate::events::hub::EventHub;
use crate::registry::registry::DeviceRegistry;
use crate::upload::assembler::UploadAssembler;

/// Server state shared across handlers
pub struct ServerState {
    pub registry: Arc<DeviceRegistry>,
    pub artifacts: Arc<ArtifactStore>,
    pub assembler: Arc<UploadAssembler>,
    pub orchestrator: Arc<Orchestrator>,
    pub hub: Arc<EventHub>,
    pub caches: Arc<Caches>,
    pub admin_token: String,
}

impl ServerState {
    pub fn new(app_state: &AppState, admin_token: String) -> Self {
        Self {
            registry: app_state.registry.clone(),
            artifacts: app_state.artifacts.clone(),
            assembler: app_state.assembler.clone(),
            orchestrator: app_state.orchestrator.clone(),
            hub: app_state.hub.clone(),
            caches: app_state.caches.clone(),
            admin_token,
        }
    }
}
