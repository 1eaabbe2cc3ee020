use bytes::Bytes;
use std::sync::Arc;
use url::Url;

/// Receives upload progress as a fraction in `0.0..=1.0`.
pub type ProgressFn = Arc<dyn Fn(f32) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("upload failed: {0}")]
    Network(String),

    #[error("upload rejected ({status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("permission denied for {path}")]
    PermissionDenied { path: String },
}

/// One object to store. `path` is relative to the bucket root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageObject {
    pub path: String,
    pub content_type: String,
    pub data: Bytes,
}

#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores the object and resolves with its durable public URL.
    async fn put(
        &self,
        object: StorageObject,
        progress: Option<ProgressFn>,
    ) -> Result<Url, StorageError>;
}
