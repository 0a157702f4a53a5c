//! Session-scoped media store: gadgets that return images or audio hand their bytes to
//! this store and get back an opaque id, which is what actually goes into the result text
//! the model sees (keeping the conversation transcript free of raw binary payloads).
//!
//! Writes for a given id are serialized (a gadget retried or re-run under the same id
//! won't race itself); reads are concurrent. When `base_dir` is set, blobs are also
//! persisted to `<base_dir>/media-<run_id>/<gadget>_<seq>.<ext>` so a session survives
//! process restart; without it the store is purely in-memory.

use crate::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};

/// One stored media blob.
#[derive(Debug, Clone)]
pub struct MediaBlob {
    pub gadget_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub path: Option<PathBuf>,
}

/// A media output a gadget hands back alongside its text result.
#[derive(Debug, Clone)]
pub struct MediaOutput {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Per-run store of media blobs, addressable by opaque id.
pub struct MediaStore {
    run_id: String,
    base_dir: Option<PathBuf>,
    seq: AtomicU64,
    blobs: RwLock<HashMap<String, MediaBlob>>,
    /// Guards writes for a given id so concurrent retries under the same id serialize.
    write_locks: Mutex<HashMap<String, ()>>,
}

impl MediaStore {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            base_dir: None,
            seq: AtomicU64::new(0),
            blobs: RwLock::new(HashMap::new()),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Persist blobs under `base_dir/media-<run_id>/...` in addition to keeping them in
    /// memory.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    fn session_dir(&self) -> Option<PathBuf> {
        self.base_dir
            .as_ref()
            .map(|dir| dir.join(format!("media-{}", self.run_id)))
    }

    /// Store a gadget's media output, returning an opaque id to reference it by.
    pub async fn store(&self, gadget_name: &str, output: MediaOutput) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();

        // Serialize writes per id (a fresh id never collides, but guard anyway for
        // callers that pre-reserve an id before writing).
        let _guard = self.write_locks.lock().await;

        let path = if let Some(dir) = self.session_dir() {
            let seq = self.seq.fetch_add(1, Ordering::SeqCst);
            let ext = ext_for_mime(&output.mime_type);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| Error::other(format!("failed to create media dir: {}", e)))?;
            let file_path = dir.join(format!("{}_{}.{}", gadget_name, seq, ext));
            tokio::fs::write(&file_path, &output.bytes)
                .await
                .map_err(|e| Error::other(format!("failed to write media blob: {}", e)))?;
            Some(file_path)
        } else {
            None
        };

        let blob = MediaBlob {
            gadget_name: gadget_name.to_string(),
            mime_type: output.mime_type,
            bytes: output.bytes,
            path,
        };

        self.blobs.write().await.insert(id.clone(), blob);
        Ok(id)
    }

    /// Retrieve a previously stored blob by its opaque id.
    pub async fn get(&self, id: &str) -> Option<MediaBlob> {
        self.blobs.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn ext_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/ogg" => "ogg",
        _ => "bin",
    }
}
