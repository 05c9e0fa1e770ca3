//! HTTP request handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use futures::stream::{self, Stream};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use api_models::{
    AckResponse, ArtifactResponse, BeginUploadRequest, BeginUploadResponse,
    CompleteUploadRequest, DeployRequest, DeployResponse, DeviceListResponse, DeviceSummary,
    HealthResponse, HeartbeatRequest, HeartbeatResponse, InstallationListResponse, JobSummary,
    Pagination, ProgressReport, PutChunkRequest, RegisterDeviceRequest, RegisterDeviceResponse,
    RenameDeviceRequest, VersionResponse,
};

use crate::artifacts::meta::ArtifactMetadata;
use crate::artifacts::store::Artifact;
use crate::authn::bearer::{bearer_token, require_admin, require_device};
use crate::deploy::job::{DeploymentJob, JobState};
use crate::deploy::orchestrator::InstallationFilter;
use crate::errors::CoreError;
use crate::events::hub::Event;
use crate::registry::device::DeviceStatus;
use crate::registry::registry::{DeviceRow, HeartbeatMetrics};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "fleetd".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Device heartbeat handler
pub async fn heartbeat_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, CoreError> {
    let token = bearer_token(&headers)?;
    let metrics = HeartbeatMetrics {
        battery: request.battery,
        app_version: request.app_version,
    };

    let ack = state.registry.record_heartbeat(token, metrics, Utc::now())?;
    if ack.status_flipped {
        // Same invalidate-on-write contract as the sweep's offline flips
        state.caches.device_list.invalidate();
    }

    Ok(Json(HeartbeatResponse {
        ok: ack.ok,
        server_time_utc: ack.server_time_utc,
    }))
}

/// Device registration handler (admin)
pub async fn register_device_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(request): Json<RegisterDeviceRequest>,
) -> Result<Json<RegisterDeviceResponse>, CoreError> {
    require_admin(&headers, &state.admin_token)?;

    let device = state
        .registry
        .register(request.alias, request.push_address, Utc::now())?;
    state.caches.device_list.invalidate();

    Ok(Json(RegisterDeviceResponse {
        device: DeviceSummary {
            id: device.id.clone(),
            alias: device.alias.clone(),
            status: DeviceStatus::Offline.as_str().to_string(),
            last_seen_at: None,
            battery: None,
            app_version: None,
        },
        token: device.token,
    }))
}

/// Device alias update handler (admin)
pub async fn rename_device_handler(
    State(state): State<Arc<ServerState>>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<RenameDeviceRequest>,
) -> Result<Json<AckResponse>, CoreError> {
    require_admin(&headers, &state.admin_token)?;

    state.registry.rename(&device_id, request.alias)?;
    state.caches.device_list.invalidate();
    Ok(Json(AckResponse { ok: true }))
}

/// Device removal handler (admin); tombstones the record
pub async fn remove_device_handler(
    State(state): State<Arc<ServerState>>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<AckResponse>, CoreError> {
    require_admin(&headers, &state.admin_token)?;

    state.registry.remove(&device_id)?;
    state.caches.device_list.invalidate();
    Ok(Json(AckResponse { ok: true }))
}

/// Device list query
#[derive(Debug, Deserialize)]
pub struct ListDevicesQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

/// Paginated device list handler (dashboard)
pub async fn list_devices_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(query): Query<ListDevicesQuery>,
) -> Result<Json<DeviceListResponse>, CoreError> {
    require_admin(&headers, &state.admin_token)?;

    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 200);

    if let Some(cached) = state.caches.device_list.get(page, limit) {
        return Ok(Json(cached));
    }

    let listing = state.registry.list(page, limit, Utc::now())?;
    let response = DeviceListResponse {
        devices: listing.devices.iter().map(device_summary).collect(),
        pagination: Pagination {
            page: listing.page,
            limit: listing.limit,
            total_count: listing.total_count,
            total_pages: listing.total_pages,
            has_next: listing.has_next,
            has_prev: listing.has_prev,
        },
    };

    state.caches.device_list.put(page, limit, response.clone());
    Ok(Json(response))
}

/// Begin-upload handler (admin)
pub async fn begin_upload_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(request): Json<BeginUploadRequest>,
) -> Result<Json<BeginUploadResponse>, CoreError> {
    require_admin(&headers, &state.admin_token)?;

    let upload_id = state
        .assembler
        .begin_upload(request.total_chunks, request.filename, Utc::now())?;
    Ok(Json(BeginUploadResponse { upload_id }))
}

/// Chunk upload handler (admin)
pub async fn put_chunk_handler(
    State(state): State<Arc<ServerState>>,
    Path((upload_id, index)): Path<(String, u32)>,
    headers: HeaderMap,
    Json(request): Json<PutChunkRequest>,
) -> Result<Json<AckResponse>, CoreError> {
    require_admin(&headers, &state.admin_token)?;

    let bytes = BASE64
        .decode(request.data.as_bytes())
        .map_err(|e| CoreError::Validation(format!("chunk data is not valid base64: {}", e)))?;

    state.assembler.put_chunk(&upload_id, index, bytes, Utc::now())?;
    Ok(Json(AckResponse { ok: true }))
}

/// Upload completion handler (admin)
pub async fn complete_upload_handler(
    State(state): State<Arc<ServerState>>,
    Path(upload_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CompleteUploadRequest>,
) -> Result<Json<ArtifactResponse>, CoreError> {
    require_admin(&headers, &state.admin_token)?;

    let meta = ArtifactMetadata::parse(
        &request.package_name,
        &request.version_name,
        request.version_code,
        &request.build_type,
    )?;

    let artifact = state
        .assembler
        .complete_upload(&upload_id, meta, Utc::now())
        .await?;
    Ok(Json(artifact_response(&artifact)))
}

/// Deploy handler (admin)
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(request): Json<DeployRequest>,
) -> Result<Json<DeployResponse>, CoreError> {
    require_admin(&headers, &state.admin_token)?;

    // Resolve the artifact before touching any job state
    let artifact = state.artifacts.get(&request.artifact_id)?;

    let jobs = state
        .orchestrator
        .deploy(&artifact.artifact_id, &request.device_ids, Utc::now())
        .await?;

    Ok(Json(DeployResponse {
        jobs: jobs.iter().map(job_summary).collect(),
    }))
}

/// Device progress report handler.
///
/// The device always receives a plain acknowledgement; a rejected
/// transition is recorded in the logs, not raised back at the device.
pub async fn progress_handler(
    State(state): State<Arc<ServerState>>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
    Json(report): Json<ProgressReport>,
) -> Result<Json<AckResponse>, CoreError> {
    let device = require_device(&headers, &state.registry)?;

    let target = report
        .state
        .parse::<JobState>()
        .map_err(CoreError::Validation)?;
    if !matches!(
        target,
        JobState::Downloading | JobState::Installing | JobState::Succeeded | JobState::Failed
    ) {
        return Err(CoreError::Validation(format!(
            "devices cannot report state {}",
            target.as_str()
        )));
    }

    match state.orchestrator.report_progress(
        &job_id,
        &device.id,
        target,
        report.error_message,
        Utc::now(),
    ) {
        Ok(_) => {}
        Err(CoreError::Conflict(message)) => {
            warn!("Rejected progress report from device {}: {}", device.id, message);
        }
        Err(other) => return Err(other),
    }

    Ok(Json(AckResponse { ok: true }))
}

/// Installation list query
#[derive(Debug, Deserialize)]
pub struct InstallationsQuery {
    pub artifact_id: Option<String>,
    pub device_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

/// Installation projection handler (admin/dashboard)
pub async fn installations_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(query): Query<InstallationsQuery>,
) -> Result<Json<InstallationListResponse>, CoreError> {
    require_admin(&headers, &state.admin_token)?;

    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<JobState>().map_err(CoreError::Validation))
        .transpose()?;

    let filter = InstallationFilter {
        artifact_id: query.artifact_id,
        device_id: query.device_id,
        status,
        limit: query.limit,
    };

    let jobs = state.orchestrator.installations(&filter);
    let total = jobs.len();
    Ok(Json(InstallationListResponse {
        jobs: jobs.iter().map(job_summary).collect(),
        total,
    }))
}

/// Artifact download handler (device-side), with conditional caching
pub async fn download_handler(
    State(state): State<Arc<ServerState>>,
    Path(artifact_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, CoreError> {
    require_device(&headers, &state.registry)?;

    let artifact = state.artifacts.get(&artifact_id)?;
    let etag = format!("\"{}\"", artifact.digest);

    if let Some(candidate) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        if candidate == etag || candidate == "*" {
            return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response());
        }
    }

    let bytes = state.artifacts.read_bytes(&artifact).await?;
    Ok((
        StatusCode::OK,
        [
            (header::ETAG, etag),
            (
                header::CONTENT_TYPE,
                "application/vnd.android.package-archive".to_string(),
            ),
            (header::CONTENT_LENGTH, bytes.len().to_string()),
        ],
        bytes,
    )
        .into_response())
}

/// Observer event stream handler (admin).
///
/// At-least-once per connected session; a lagged session receives a
/// stream.reset marker and must re-fetch a snapshot before trusting the
/// stream again.
pub async fn events_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, CoreError> {
    require_admin(&headers, &state.admin_token)?;

    let rx = state.hub.subscribe();
    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(dropped)) => Event::StreamReset { dropped },
                Err(RecvError::Closed) => return None,
            };

            match SseEvent::default().event(event.kind()).json_data(&event) {
                Ok(sse) => return Some((Ok(sse), rx)),
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    continue;
                }
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn device_summary(row: &DeviceRow) -> DeviceSummary {
    DeviceSummary {
        id: row.device.id.clone(),
        alias: row.device.alias.clone(),
        status: row.status.as_str().to_string(),
        last_seen_at: row.device.last_seen_at,
        battery: row.device.battery,
        app_version: row.device.app_version.clone(),
    }
}

fn job_summary(job: &DeploymentJob) -> JobSummary {
    JobSummary {
        job_id: job.job_id.clone(),
        artifact_id: job.artifact_id.clone(),
        device_id: job.device_id.clone(),
        state: job.state.as_str().to_string(),
        failure_reason: job.failure_reason.map(|r| r.as_str().to_string()),
        created_at: job.created_at,
        updated_at: job.updated_at,
    }
}

fn artifact_response(artifact: &Artifact) -> ArtifactResponse {
    ArtifactResponse {
        artifact_id: artifact.artifact_id.clone(),
        package_name: artifact.package_name.clone(),
        version_name: artifact.version_name.clone(),
        version_code: artifact.version_code,
        build_type: artifact.build_type.as_str().to_string(),
        digest: artifact.digest.clone(),
        size: artifact.size,
        created_at: artifact.created_at,
    }
}
