use crate::error::{Result, UploadError};
use crate::services::storage::ObjectStore;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;

/// Performs a single upload attempt of a closed staging file.
#[derive(Clone)]
pub struct RemoteUploader {
    store: Arc<dyn ObjectStore>,
}

impl RemoteUploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Returns the number of bytes sent. An unopenable local file is reported
    /// as `LocalFileMissing` so it is never retried.
    pub async fn upload_once(&self, local_path: &Path, container: &str, key: &str) -> Result<u64> {
        let missing = |e: std::io::Error| {
            UploadError::LocalFileMissing(format!("{}: {}", local_path.display(), e))
        };
        let file = File::open(local_path).await.map_err(missing)?;
        let size = file.metadata().await.map_err(missing)?.len();

        tracing::info!(
            "Upload start {} to {}/{}",
            local_path.display(),
            container,
            key
        );
        self.store.put_object(container, key, file, size).await?;
        tracing::info!(
            "Upload completed {} to {}/{} ({} bytes)",
            local_path.display(),
            container,
            key,
            size
        );
        Ok(size)
    }
}
