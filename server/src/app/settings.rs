//! Settings file management

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::logs::LogLevel;

/// Server settings, read from a JSON file at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub json_logs: bool,

    /// Host to bind the HTTP server to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Opaque admin bearer token. Falls back to the FLEETD_ADMIN_TOKEN
    /// environment variable when absent.
    #[serde(default)]
    pub admin_token: Option<String>,

    /// Blob directory for artifact payloads
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    /// Seconds of silence before a device is considered offline
    #[serde(default = "default_presence_timeout")]
    pub presence_timeout_secs: u64,

    /// Minimum accepted spacing between heartbeats, in seconds
    #[serde(default = "default_min_beat_interval")]
    pub min_beat_interval_secs: u64,

    /// Hours an idle upload session is retained before GC
    #[serde(default = "default_upload_retention")]
    pub upload_retention_hours: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("/var/lib/fleetd/artifacts")
}

fn default_presence_timeout() -> u64 {
    240
}

fn default_min_beat_interval() -> u64 {
    10
}

fn default_upload_retention() -> u64 {
    24
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            host: default_host(),
            port: default_port(),
            admin_token: None,
            artifact_dir: default_artifact_dir(),
            presence_timeout_secs: default_presence_timeout(),
            min_beat_interval_secs: default_min_beat_interval(),
            upload_retention_hours: default_upload_retention(),
        }
    }
}

impl Settings {
    /// Read settings from a JSON file
    pub async fn load(path: &Path) -> Result<Self, CoreError> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            CoreError::Validation(format!("unable to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            CoreError::Validation(format!("invalid settings file {}: {}", path.display(), e))
        })
    }
}
