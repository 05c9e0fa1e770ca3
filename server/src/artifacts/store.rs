//! Content-addressed artifact store
//!
//! Artifacts are immutable once their digest is recorded: writers only
//! ever create new blobs, readers are unlimited. Re-persisting identical
//! bytes resolves to the existing artifact.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::artifacts::meta::{ArtifactMetadata, BuildType};
use crate::errors::CoreError;
use crate::retry::RetryPolicy;
use crate::utils::{generate_uuid, sha256_hex};

/// An immutable, content-addressed application package
#[derive(Debug, Clone)]
pub struct Artifact {
    pub artifact_id: String,
    pub package_name: String,
    pub version_name: String,
    pub version_code: i64,
    pub build_type: BuildType,

    /// SHA-256 of the payload, also the blob filename stem
    pub digest: String,

    /// Payload size in bytes
    pub size: u64,

    /// Blob location on disk; never exposed to callers
    pub path: PathBuf,

    pub created_at: DateTime<Utc>,
}

/// Artifact store backed by a blob directory and an in-memory index
pub struct ArtifactStore {
    root_dir: PathBuf,
    by_digest: RwLock<HashMap<String, Artifact>>,
    by_id: RwLock<HashMap<String, String>>,
    retry: RetryPolicy,
}

impl ArtifactStore {
    /// Open the store, creating the blob directory if needed
    pub async fn open(root_dir: PathBuf, retry: RetryPolicy) -> Result<Self, CoreError> {
        tokio::fs::create_dir_all(&root_dir)
            .await
            .map_err(|e| CoreError::Internal(format!("creating artifact dir: {}", e)))?;

        Ok(Self {
            root_dir,
            by_digest: RwLock::new(HashMap::new()),
            by_id: RwLock::new(HashMap::new()),
            retry,
        })
    }

    /// Persist a payload under its content digest.
    ///
    /// Identical bytes de-duplicate to the existing artifact no matter
    /// which upload produced them. The blob write is retried internally
    /// for transient I/O failures before surfacing Internal.
    pub async fn put(
        &self,
        bytes: &[u8],
        meta: ArtifactMetadata,
        now: DateTime<Utc>,
    ) -> Result<Artifact, CoreError> {
        let digest = sha256_hex(bytes);

        if let Some(existing) = self.get_by_digest(&digest) {
            debug!("Artifact {} already stored, de-duplicating", digest);
            return Ok(existing);
        }

        let path = self.root_dir.join(format!("{}.apk", digest));
        self.retry
            .run("artifact blob write", || tokio::fs::write(&path, bytes))
            .await
            .map_err(|e| CoreError::Internal(format!("writing artifact blob: {}", e)))?;

        let artifact = Artifact {
            artifact_id: generate_uuid(),
            package_name: meta.package_name,
            version_name: meta.version_name,
            version_code: meta.version_code,
            build_type: meta.build_type,
            digest: digest.clone(),
            size: bytes.len() as u64,
            path,
            created_at: now,
        };

        {
            let mut by_digest = self.by_digest.write().unwrap_or_else(|e| e.into_inner());
            // A concurrent put of the same bytes may have won; the blob
            // content is identical either way, so yield to the winner.
            if let Some(existing) = by_digest.get(&digest) {
                return Ok(existing.clone());
            }
            let mut by_id = self.by_id.write().unwrap_or_else(|e| e.into_inner());
            by_id.insert(artifact.artifact_id.clone(), digest);
            by_digest.insert(artifact.digest.clone(), artifact.clone());
        }

        info!(
            "Stored artifact {} ({} v{}, {} bytes)",
            artifact.artifact_id, artifact.package_name, artifact.version_code, artifact.size
        );
        Ok(artifact)
    }

    /// Look up an artifact by id
    pub fn get(&self, artifact_id: &str) -> Result<Artifact, CoreError> {
        let digest = {
            let by_id = self.by_id.read().unwrap_or_else(|e| e.into_inner());
            by_id.get(artifact_id).cloned()
        };

        digest
            .and_then(|d| self.get_by_digest(&d))
            .ok_or_else(|| CoreError::NotFound(format!("artifact {} not found", artifact_id)))
    }

    /// Look up an artifact by content digest
    pub fn get_by_digest(&self, digest: &str) -> Option<Artifact> {
        let by_digest = self.by_digest.read().unwrap_or_else(|e| e.into_inner());
        by_digest.get(digest).cloned()
    }

    /// Read an artifact's payload for download
    pub async fn read_bytes(&self, artifact: &Artifact) -> Result<Vec<u8>, CoreError> {
        self.retry
            .run("artifact blob read", || tokio::fs::read(&artifact.path))
            .await
            .map_err(|e| CoreError::Internal(format!("reading artifact blob: {}", e)))
    }

    pub fn len(&self) -> usize {
        let by_digest = self.by_digest.read().unwrap_or_else(|e| e.into_inner());
        by_digest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
