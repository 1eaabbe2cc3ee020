//! Photo upload pipeline: validate, compress, store.
//!
//! Timeouts and per-file isolation belong to the caller; nothing here
//! retries.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};
use url::Url;

use crate::capabilities::storage::{ObjectStorage, ProgressFn, StorageError, StorageObject};
use crate::config::JournalConfig;
use crate::error::{AppError, ErrorKind};
use crate::image_processing::{CompressedImage, ImageCompressor, ImageProcessingError};
use crate::model::{LocalId, TripId, UserId};

/// A locally selected photo that has not been uploaded yet.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedFile {
    pub id: LocalId,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Shown in the photo grid until the upload replaces it.
    pub preview_url: String,
    pub data: Bytes,
}

impl StagedFile {
    pub fn new(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        preview_url: impl Into<String>,
        data: Bytes,
    ) -> Self {
        Self {
            id: LocalId::generate(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            size_bytes: data.len() as u64,
            preview_url: preview_url.into(),
            data,
        }
    }
}

// Photo bytes never go to logs.
impl fmt::Debug for StagedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedFile")
            .field("id", &self.id)
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("size_bytes", &self.size_bytes)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("file is {size} bytes, limit is {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error(transparent)]
    Compression(#[from] ImageProcessingError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("upload timed out after {after_ms} ms")]
    TimedOut { after_ms: u64 },
}

impl From<UploadError> for AppError {
    fn from(e: UploadError) -> Self {
        let internal = e.to_string();
        match e {
            UploadError::TooLarge { max, .. } => {
                AppError::new(ErrorKind::FileTooLarge, "File too large")
                    .with_context("max_bytes", max.to_string())
            }
            UploadError::UnsupportedType(mime) => {
                AppError::new(ErrorKind::UnsupportedFileType, "Unsupported file type")
                    .with_context("mime_type", mime)
            }
            UploadError::Compression(inner) => inner.into(),
            UploadError::Storage(StorageError::PermissionDenied { .. }) => {
                AppError::new(ErrorKind::PermissionDenied, "Upload not permitted")
            }
            UploadError::Storage(_) => AppError::new(ErrorKind::Network, "Upload failed"),
            UploadError::TimedOut { .. } => {
                AppError::new(ErrorKind::UploadTimeout, "Upload timed out")
            }
        }
        .with_internal(internal)
    }
}

/// Size and type checks that run before any upload work.
pub fn validate_staged(config: &JournalConfig, file: &StagedFile) -> Result<(), UploadError> {
    // `size_bytes` comes from the host; the payload is what gets uploaded.
    let size = file
        .size_bytes
        .max(u64::try_from(file.data.len()).unwrap_or(u64::MAX));
    if size > config.max_upload_bytes {
        return Err(UploadError::TooLarge {
            size,
            max: config.max_upload_bytes,
        });
    }
    if !config.is_allowed_mime(&file.mime_type) {
        return Err(UploadError::UnsupportedType(file.mime_type.clone()));
    }
    Ok(())
}

pub struct PhotoUploader {
    storage: Arc<dyn ObjectStorage>,
    compressor: ImageCompressor,
    folder_prefix: String,
}

impl PhotoUploader {
    pub fn new(storage: Arc<dyn ObjectStorage>, config: &JournalConfig) -> Self {
        Self {
            storage,
            compressor: ImageCompressor::new(config.compression.clone()),
            folder_prefix: config.storage_folder_prefix.clone(),
        }
    }

    /// `{prefix}/{owner}/{trip}/{millis}_{nonce}_{stem}.jpg`
    pub fn object_path(&self, owner: &UserId, trip: &TripId, file_name: &str) -> String {
        let stem = file_name
            .rsplit_once('.')
            .map_or(file_name, |(stem, _)| stem);
        let safe: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let safe = if safe.is_empty() { "photo".to_string() } else { safe };
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "{}/{}/{}/{}_{}_{}.jpg",
            self.folder_prefix,
            owner,
            trip,
            crate::get_current_time_ms(),
            &nonce[..8],
            safe
        )
    }

    #[instrument(
        skip(self, file, on_progress),
        fields(file = %file.id, owner = %owner, trip = %trip, size = file.size_bytes)
    )]
    pub async fn upload(
        &self,
        owner: &UserId,
        trip: &TripId,
        file: &StagedFile,
        on_progress: Option<ProgressFn>,
    ) -> Result<Url, UploadError> {
        let compressed = self.compressor.compress(file.data.clone()).await?;
        let object = StorageObject {
            path: self.object_path(owner, trip, &file.file_name),
            content_type: CompressedImage::CONTENT_TYPE.to_string(),
            data: compressed.data,
        };
        let url = self.storage.put(object, on_progress).await?;
        info!(url = %url, "photo uploaded");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::memory::MemoryObjectStorage;
    use std::io::Cursor;
    use std::sync::Mutex;

    fn png_bytes() -> Bytes {
        let img = image::RgbImage::from_fn(40, 30, |x, y| image::Rgb([x as u8, y as u8, 7]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
            .unwrap();
        Bytes::from(buffer)
    }

    #[test]
    fn test_validate_rejects_oversized_and_wrong_type() {
        let config = JournalConfig::default();
        let mut big = StagedFile::new("a.jpg", "image/jpeg", "blob:a", Bytes::new());
        big.size_bytes = config.max_upload_bytes + 1;
        assert!(matches!(
            validate_staged(&config, &big),
            Err(UploadError::TooLarge { .. })
        ));

        let gif = StagedFile::new("a.gif", "image/gif", "blob:b", Bytes::from_static(b"GIF89a"));
        let err: AppError = validate_staged(&config, &gif).unwrap_err().into();
        assert_eq!(err.kind, ErrorKind::UnsupportedFileType);
    }

    #[test]
    fn test_validate_checks_payload_not_reported_size() {
        let config = JournalConfig {
            max_upload_bytes: 8,
            ..JournalConfig::default()
        };
        let mut file = StagedFile::new(
            "a.jpg",
            "image/jpeg",
            "blob:a",
            Bytes::from_static(b"0123456789"),
        );
        file.size_bytes = 1;
        assert!(matches!(
            validate_staged(&config, &file),
            Err(UploadError::TooLarge { size: 10, max: 8 })
        ));
    }

    #[test]
    fn test_object_path_layout() {
        let uploader = PhotoUploader::new(
            Arc::new(MemoryObjectStorage::new()),
            &JournalConfig::default(),
        );
        let path = uploader.object_path(&UserId::new("u1"), &TripId::new("t1"), "My Pic (1).HEIC.png");
        assert!(path.starts_with("traveldot/u1/t1/"));
        assert!(path.ends_with("_My_Pic__1__HEIC.jpg"));
    }

    #[test]
    fn test_debug_hides_bytes() {
        let file = StagedFile::new("a.png", "image/png", "blob:a", Bytes::from_static(b"secret"));
        assert!(!format!("{file:?}").contains("secret"));
    }

    #[tokio::test]
    async fn test_upload_compresses_and_reports_progress() {
        let storage = Arc::new(MemoryObjectStorage::new());
        let uploader = PhotoUploader::new(storage.clone(), &JournalConfig::default());
        let file = StagedFile::new("beach.png", "image/png", "blob:1", png_bytes());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let url = uploader
            .upload(
                &UserId::new("u1"),
                &TripId::new("t1"),
                &file,
                Some(Arc::new(move |f| sink.lock().unwrap().push(f))),
            )
            .await
            .unwrap();

        assert!(url.as_str().starts_with("https://storage.traveldot.test/traveldot/u1/t1/"));
        assert_eq!(*seen.lock().unwrap().last().unwrap(), 1.0);
        let stored = storage.object(&storage.stored_paths()[0]).unwrap();
        assert_eq!(stored.content_type, "image/jpeg");
        assert_eq!(&stored.data[0..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces() {
        let storage = Arc::new(MemoryObjectStorage::new());
        storage.fail_paths_containing("broken");
        let uploader = PhotoUploader::new(storage, &JournalConfig::default());
        let file = StagedFile::new("broken.png", "image/png", "blob:1", png_bytes());

        let err = uploader
            .upload(&UserId::new("u"), &TripId::new("t"), &file, None)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Storage(StorageError::Network(_))));
        let app: AppError = err.into();
        assert_eq!(app.kind, ErrorKind::Network);
    }
}
