//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{delete, get, patch, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::CoreError;
use crate::server::handlers::{
    begin_upload_handler, complete_upload_handler, deploy_handler, download_handler,
    events_handler, health_handler, heartbeat_handler, installations_handler,
    list_devices_handler, progress_handler, put_chunk_handler, register_device_handler,
    remove_device_handler, rename_device_handler, version_handler,
};
use crate::server::state::ServerState;

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), CoreError>>, CoreError> {
    let app = Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Device presence
        .route("/api/heartbeat", post(heartbeat_handler))
        .route("/api/devices", post(register_device_handler))
        .route("/api/devices", get(list_devices_handler))
        .route("/api/devices/{device_id}", patch(rename_device_handler))
        .route("/api/devices/{device_id}", delete(remove_device_handler))
        // Chunked uploads
        .route("/api/uploads/begin", post(begin_upload_handler))
        .route("/api/uploads/{upload_id}/chunks/{index}", post(put_chunk_handler))
        .route("/api/uploads/{upload_id}/complete", post(complete_upload_handler))
        // Deployments
        .route("/api/deploy", post(deploy_handler))
        .route("/api/jobs/{job_id}/progress", post(progress_handler))
        .route("/api/installations", get(installations_handler))
        // Artifact download (device-side)
        .route("/api/artifacts/{artifact_id}/download", get(download_handler))
        // Observer stream
        .route("/api/events", get(events_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| CoreError::Internal(format!("binding {}: {}", addr, e)))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))
    });

    Ok(handle)
}
