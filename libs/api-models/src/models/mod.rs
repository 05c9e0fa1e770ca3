//! Fleet API models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Error body returned for every failed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Heartbeat request sent by a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// Battery level in percent (0-100)
    pub battery: Option<u8>,

    /// Installed app version fingerprint
    pub app_version: Option<String>,
}

/// Heartbeat acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub ok: bool,
    pub server_time_utc: DateTime<Utc>,
}

/// Device registration request (admin)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDeviceRequest {
    pub alias: String,

    /// Push notification address, if the device has one
    pub push_address: Option<String>,
}

/// Device registration response; the bearer token is only returned here
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDeviceResponse {
    pub device: DeviceSummary,
    pub token: String,
}

/// Device alias update request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameDeviceRequest {
    pub alias: String,
}

/// Device summary row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub id: String,
    pub alias: String,
    pub status: String,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub battery: Option<u8>,
    pub app_version: Option<String>,
}

/// Paginated device list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceListResponse {
    pub devices: Vec<DeviceSummary>,
    pub pagination: Pagination,
}

/// Pagination envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total_count: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

/// Begin a chunked upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeginUploadRequest {
    pub total_chunks: u32,
    pub filename: String,
}

/// Begin upload response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeginUploadResponse {
    pub upload_id: String,
}

/// One uploaded chunk; bytes are base64-encoded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutChunkRequest {
    pub data: String,
}

/// Plain acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub ok: bool,
}

/// Declared metadata for upload completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteUploadRequest {
    pub package_name: String,
    pub version_name: String,
    pub version_code: i64,
    pub build_type: String,
}

/// Artifact as exposed to callers (no storage paths)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactResponse {
    pub artifact_id: String,
    pub package_name: String,
    pub version_name: String,
    pub version_code: i64,
    pub build_type: String,
    pub digest: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Deploy an artifact to a set of devices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    pub artifact_id: String,
    pub device_ids: Vec<String>,
}

/// Deploy response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployResponse {
    pub jobs: Vec<JobSummary>,
}

/// Installation job row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub artifact_id: String,
    pub device_id: String,
    pub state: String,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Installation list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallationListResponse {
    pub jobs: Vec<JobSummary>,
    pub total: usize,
}

/// Device-reported deployment progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Reported state: 'downloading', 'installing', 'succeeded', 'failed'
    pub state: String,

    /// Optional error message for failed installs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
