//! services/chat/src/adapters/blob.rs
//!
//! This module contains the blob upload adapter. Blobs land in a local
//! directory and are referenced by a durable URL under a configured public
//! base.

use async_trait::async_trait;
use carechat_core::ports::{BlobStore, PortError, PortResult};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// Largest accepted blob (audio clip or chat image).
const MAX_BLOB_SIZE: usize = 10 * 1024 * 1024;

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "audio/mpeg" => "mp3",
        "audio/wav" => "wav",
        "audio/webm" => "webm",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        _ => "bin",
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A blob store adapter writing to a local directory.
#[derive(Clone)]
pub struct LocalBlobStore {
    base_path: PathBuf,
    base_url: String,
}

impl LocalBlobStore {
    /// Creates the blob directory if needed and returns the adapter.
    pub async fn new(base_path: PathBuf, base_url: String) -> PortResult<Self> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            PortError::Unexpected(format!(
                "Failed to create blob directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Blob store initialized");
        Ok(Self {
            base_path,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

//=========================================================================================
// `BlobStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn store(&self, name: &str, data: &[u8], content_type: &str) -> PortResult<String> {
        if data.is_empty() {
            return Err(PortError::Unexpected("Empty blob".to_string()));
        }
        if data.len() > MAX_BLOB_SIZE {
            return Err(PortError::Unexpected(format!(
                "Blob too large: {} bytes (max {})",
                data.len(),
                MAX_BLOB_SIZE
            )));
        }

        let filename = format!("{}.{}", Uuid::new_v4(), extension_for(content_type));
        let path = self.base_path.join(&filename);

        fs::write(&path, data).await.map_err(|e| {
            PortError::Unexpected(format!("Failed to write blob {name}: {e}"))
        })?;

        debug!(name, size = data.len(), file = %filename, "Stored blob");
        Ok(format!("{}/{}", self.base_url, filename))
    }
}
