//! Upload assembler
//!
//! Manages per-upload chunk sets and finalizes them into artifacts.
//! Sessions are the unit of mutual exclusion; concatenation and digest
//! computation run outside the session map lock so a large completion
//! never stalls unrelated uploads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::artifacts::meta::ArtifactMetadata;
use crate::artifacts::store::{Artifact, ArtifactStore};
use crate::errors::CoreError;
use crate::upload::session::UploadSession;
use crate::utils::generate_uuid;

/// Upload assembler options
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Incomplete sessions idle past this window are garbage-collected
    pub retention: Duration,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            retention: Duration::hours(24),
        }
    }
}

/// Chunked-upload assembler in front of the artifact store
pub struct UploadAssembler {
    sessions: RwLock<HashMap<String, Arc<Mutex<UploadSession>>>>,
    store: Arc<ArtifactStore>,
    options: UploadOptions,
}

impl UploadAssembler {
    pub fn new(store: Arc<ArtifactStore>, options: UploadOptions) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            options,
        }
    }

    /// Open a new upload session
    pub fn begin_upload(
        &self,
        total_chunks: u32,
        filename: String,
        now: DateTime<Utc>,
    ) -> Result<String, CoreError> {
        if total_chunks == 0 {
            return Err(CoreError::Validation(
                "an upload must declare at least one chunk".to_string(),
            ));
        }

        let upload_id = generate_uuid();
        let session = UploadSession::new(upload_id.clone(), filename, total_chunks, now);

        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(upload_id.clone(), Arc::new(Mutex::new(session)));

        debug!("Opened upload session {} ({} chunks)", upload_id, total_chunks);
        Ok(upload_id)
    }

    /// Buffer one chunk for a session
    pub fn put_chunk(
        &self,
        upload_id: &str,
        index: u32,
        bytes: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let session = self.session(upload_id)?;
        let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
        session.put_chunk(index, bytes, now)
    }

    /// Finalize a session into an artifact.
    ///
    /// Verifies the received index set, concatenates in index order,
    /// digests, and de-duplicates against the store. Calling complete on
    /// an already-completed session idempotently returns the same
    /// artifact.
    pub async fn complete_upload(
        &self,
        upload_id: &str,
        meta: ArtifactMetadata,
        now: DateTime<Utc>,
    ) -> Result<Artifact, CoreError> {
        let session = self.session(upload_id)?;

        // Snapshot the payload under the session lock, digest outside it
        let payload = {
            let mut locked = session.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(artifact_id) = &locked.completed_artifact {
                return self.store.get(artifact_id);
            }
            locked.last_activity = now;
            locked.assemble()?
        };

        let artifact = self.store.put(&payload, meta, now).await?;

        {
            let mut locked = session.lock().unwrap_or_else(|e| e.into_inner());
            if locked.completed_artifact.is_none() {
                locked.completed_artifact = Some(artifact.artifact_id.clone());
                locked.release_chunks();
            }
        }

        info!(
            "Upload {} completed into artifact {} ({} bytes)",
            upload_id, artifact.artifact_id, artifact.size
        );
        Ok(artifact)
    }

    /// Discard sessions idle past the retention window.
    ///
    /// Completed sessions are also dropped once idle; repeats of a
    /// completion request are expected well within the window.
    pub fn gc(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.options.retention;

        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|_, session| {
            let session = session.lock().unwrap_or_else(|e| e.into_inner());
            session.last_activity > cutoff
        });

        let removed = before - sessions.len();
        if removed > 0 {
            info!("Upload GC discarded {} stale session(s)", removed);
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.len()
    }

    fn session(&self, upload_id: &str) -> Result<Arc<Mutex<UploadSession>>, CoreError> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(upload_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("upload {} not found", upload_id)))
    }
}
