//! Upload session bookkeeping
//!
//! Transient per-upload state before finalization into an artifact.
//! Chunks may arrive out of order and be retried; a retried index with
//! identical bytes is a no-op, different bytes are a conflict.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::errors::CoreError;

/// One chunked upload in progress
#[derive(Debug)]
pub struct UploadSession {
    pub upload_id: String,
    pub filename: String,
    pub total_chunks: u32,
    chunks: HashMap<u32, Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,

    /// Set exactly once; the session never re-opens afterwards
    pub completed_artifact: Option<String>,
}

impl UploadSession {
    pub fn new(upload_id: String, filename: String, total_chunks: u32, now: DateTime<Utc>) -> Self {
        Self {
            upload_id,
            filename,
            total_chunks,
            chunks: HashMap::new(),
            created_at: now,
            last_activity: now,
            completed_artifact: None,
        }
    }

    /// Buffer one chunk.
    ///
    /// Safe under retry: identical bytes at a received index are a
    /// no-op; different bytes are a ChunkConflict and the stored bytes
    /// are kept.
    pub fn put_chunk(
        &mut self,
        index: u32,
        bytes: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if self.completed_artifact.is_some() {
            return Err(CoreError::Conflict(format!(
                "upload {} is already completed",
                self.upload_id
            )));
        }
        if index >= self.total_chunks {
            return Err(CoreError::Validation(format!(
                "chunk index {} out of range, upload declared {} chunks",
                index, self.total_chunks
            )));
        }

        if let Some(existing) = self.chunks.get(&index) {
            if existing != &bytes {
                return Err(CoreError::Conflict(format!(
                    "chunk {} of upload {} was already received with different bytes",
                    index, self.upload_id
                )));
            }
        } else {
            self.chunks.insert(index, bytes);
        }

        self.last_activity = now;
        Ok(())
    }

    /// Indices declared but not yet received
    pub fn missing_indices(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.chunks.contains_key(i))
            .collect()
    }

    pub fn received(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_complete(&self) -> bool {
        self.chunks.len() as u32 == self.total_chunks
    }

    /// Concatenate all chunks in index order
    pub fn assemble(&self) -> Result<Vec<u8>, CoreError> {
        let missing = self.missing_indices();
        if !missing.is_empty() {
            return Err(CoreError::Validation(format!(
                "upload {} is incomplete, missing chunk indices {:?}",
                self.upload_id, missing
            )));
        }

        let total: usize = self.chunks.values().map(|c| c.len()).sum();
        let mut payload = Vec::with_capacity(total);
        for index in 0..self.total_chunks {
            if let Some(chunk) = self.chunks.get(&index) {
                payload.extend_from_slice(chunk);
            }
        }
        Ok(payload)
    }

    /// Free buffered chunk bytes once the artifact is persisted
    pub fn release_chunks(&mut self) {
        self.chunks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(total: u32) -> UploadSession {
        UploadSession::new("up-1".to_string(), "app.apk".to_string(), total, Utc::now())
    }

    #[test]
    fn test_out_of_order_assembly() {
        let now = Utc::now();
        let mut s = session(3);
        s.put_chunk(2, b"cc".to_vec(), now).unwrap();
        s.put_chunk(0, b"aa".to_vec(), now).unwrap();
        s.put_chunk(1, b"bb".to_vec(), now).unwrap();

        assert_eq!(s.assemble().unwrap(), b"aabbcc".to_vec());
    }

    #[test]
    fn test_duplicate_identical_chunk_is_noop() {
        let now = Utc::now();
        let mut s = session(2);
        s.put_chunk(0, b"foo".to_vec(), now).unwrap();
        s.put_chunk(0, b"foo".to_vec(), now).unwrap();
        assert_eq!(s.received(), 1);
    }

    #[test]
    fn test_conflicting_chunk_rejected_and_original_kept() {
        let now = Utc::now();
        let mut s = session(2);
        s.put_chunk(1, b"foo".to_vec(), now).unwrap();

        let err = s.put_chunk(1, b"bar".to_vec(), now).unwrap_err();
        assert_eq!(err.kind(), "conflict");

        s.put_chunk(0, b"xx".to_vec(), now).unwrap();
        assert_eq!(s.assemble().unwrap(), b"xxfoo".to_vec());
    }

    #[test]
    fn test_index_out_of_range_rejected() {
        let now = Utc::now();
        let mut s = session(2);
        let err = s.put_chunk(2, b"zz".to_vec(), now).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_incomplete_assembly_names_missing_indices() {
        let now = Utc::now();
        let mut s = session(3);
        s.put_chunk(1, b"bb".to_vec(), now).unwrap();

        let err = s.assemble().unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(err.to_string().contains('0'));
        assert!(err.to_string().contains('2'));
        assert_eq!(s.missing_indices(), vec![0, 2]);
    }
}
