use crate::config::OutputConfig;
use crate::error::{Result, UploadError};
use crate::models::{TaskReport, UploadedFile};
use crate::services::retry::{RetryNotice, RetryPolicy};
use crate::services::sequencer::FileSequencer;
use crate::services::staging::StagingFile;
use crate::services::storage::ObjectStore;
use crate::services::uploader::RemoteUploader;
use bytes::Bytes;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Writing,
    Closed,
    Uploaded,
    Failed,
    Aborted,
}

/// Key assigned to a closed file that is waiting for upload.
struct PendingUpload {
    key: String,
    file_index: u32,
}

/// Per-task output: stages each output file on local disk, then uploads it
/// with retry and removes the local copy whatever the outcome.
///
/// Calls must be sequential. Sessions share nothing, so one per task can run
/// in parallel; remote keys never collide as long as task indices differ.
pub struct UploadSession {
    task_index: u32,
    container: String,
    temp_dir: Option<PathBuf>,
    sequencer: FileSequencer,
    retry: RetryPolicy,
    uploader: RemoteUploader,
    cancel: CancellationToken,
    file_index: u32,
    status: SessionStatus,
    // Held only while Writing or Closed; `pending` only while Closed.
    staging: Option<StagingFile>,
    pending: Option<PendingUpload>,
    uploaded: Vec<UploadedFile>,
}

impl UploadSession {
    pub fn new(task_index: u32, config: &OutputConfig, store: Arc<dyn ObjectStore>) -> Result<Self> {
        Ok(Self {
            task_index,
            container: config.container.clone(),
            temp_dir: config.temp_dir.clone(),
            sequencer: config.sequencer()?,
            retry: RetryPolicy::from_config(config),
            uploader: RemoteUploader::new(store),
            cancel: CancellationToken::new(),
            file_index: 0,
            status: SessionStatus::Idle,
            staging: None,
            pending: None,
            uploaded: Vec::new(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn task_index(&self) -> u32 {
        self.task_index
    }

    /// Index the next closed file will be keyed with.
    pub fn file_index(&self) -> u32 {
        self.file_index
    }

    /// Path of the staging file currently held, if any.
    pub fn staging_path(&self) -> Option<PathBuf> {
        self.staging.as_ref().map(|staging| staging.path().to_path_buf())
    }

    /// Starts a new output file. A file still being written or waiting for
    /// upload is finished first, and its failure stops here.
    pub async fn next_file(&mut self) -> Result<()> {
        match self.status {
            SessionStatus::Writing | SessionStatus::Closed => self.finish().await?,
            SessionStatus::Failed | SessionStatus::Aborted => {
                return Err(self.invalid_state("next_file"));
            }
            SessionStatus::Idle | SessionStatus::Uploaded => {}
        }

        self.staging = Some(StagingFile::open(self.temp_dir.as_deref()).await?);
        self.status = SessionStatus::Writing;
        Ok(())
    }

    /// Appends one buffer to the current file. The buffer is released when
    /// this returns, on success and on error alike.
    pub async fn add(&mut self, buffer: Bytes) -> Result<()> {
        if self.status == SessionStatus::Writing {
            if let Some(staging) = self.staging.as_mut() {
                return staging.append(&buffer).await;
            }
        }
        Err(self.invalid_state("add"))
    }

    /// Closes the current file and uploads it. The local file is deleted on
    /// every path out of here.
    pub async fn finish(&mut self) -> Result<()> {
        match self.status {
            SessionStatus::Writing => self.close_staging().await?,
            SessionStatus::Closed => {}
            _ => return Err(self.invalid_state("finish")),
        }
        self.upload().await
    }

    /// Forces the current file closed without uploading it. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.status == SessionStatus::Writing {
            self.close_staging().await?;
        }
        Ok(())
    }

    /// Drops any local state. Objects already uploaded are left in place.
    pub fn abort(&mut self) {
        if let Some(mut staging) = self.staging.take() {
            staging.delete_if_exists();
        }
        self.pending = None;
        self.status = SessionStatus::Aborted;
        tracing::info!(
            "Task {} aborted after {} uploaded files",
            self.task_index,
            self.uploaded.len()
        );
    }

    pub fn commit(&self) -> Result<TaskReport> {
        match self.status {
            SessionStatus::Idle | SessionStatus::Uploaded => Ok(TaskReport {
                task_index: self.task_index,
                container: self.container.clone(),
                files: self.uploaded.clone(),
                committed_at: Utc::now(),
            }),
            _ => Err(self.invalid_state("commit")),
        }
    }

    async fn close_staging(&mut self) -> Result<()> {
        let Some(mut staging) = self.staging.take() else {
            return Err(self.invalid_state("close"));
        };
        if let Err(e) = staging.close_for_upload().await {
            staging.delete_if_exists();
            self.status = SessionStatus::Failed;
            return Err(e);
        }

        let file_index = self.file_index;
        self.pending = Some(PendingUpload {
            key: self.sequencer.next_key(self.task_index, file_index),
            file_index,
        });
        self.file_index += 1;
        self.staging = Some(staging);
        self.status = SessionStatus::Closed;
        Ok(())
    }

    async fn upload(&mut self) -> Result<()> {
        let (Some(mut staging), Some(PendingUpload { key, file_index })) =
            (self.staging.take(), self.pending.take())
        else {
            return Err(self.invalid_state("upload"));
        };

        let uploader = &self.uploader;
        let path = staging.path();
        let container = self.container.as_str();
        let key_ref = key.as_str();
        let result = self
            .retry
            .execute(
                move |_| uploader.upload_once(path, container, key_ref),
                UploadError::is_retryable,
                log_retry,
                &self.cancel,
            )
            .await;

        staging.delete_if_exists();

        match result {
            Ok(outcome) => {
                self.uploaded.push(UploadedFile {
                    key,
                    file_index,
                    size: outcome.value,
                    sha256: staging.sha256(),
                    attempts: outcome.attempts,
                });
                self.status = SessionStatus::Uploaded;
                Ok(())
            }
            Err(e) => {
                let err = UploadError::from(e);
                tracing::error!(
                    "Upload of {}/{} for task {} failed: {}",
                    self.container,
                    key,
                    self.task_index,
                    err
                );
                self.status = SessionStatus::Failed;
                Err(err)
            }
        }
    }

    fn invalid_state(&self, operation: &str) -> UploadError {
        UploadError::InvalidState(format!(
            "{} is not allowed while the session is {:?}",
            operation, self.status
        ))
    }
}

fn log_retry(notice: RetryNotice<'_, UploadError>) {
    let message = format!(
        "Object store put request failed. Retrying {}/{} after {:.1} seconds. Message: {}",
        notice.retry_count,
        notice.max_attempts,
        notice.wait.as_secs_f64(),
        notice.error
    );
    if notice.retry_count % 3 == 0 {
        tracing::warn!("{} ({:?})", message, notice.error);
    } else {
        tracing::warn!("{}", message);
    }
}
