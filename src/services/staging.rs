use crate::error::{Result, UploadError};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Local scratch file holding one output file's bytes until it is uploaded.
///
/// The backing [`TempPath`] removes the file on drop, so even an abandoned
/// session future does not leave staging files behind.
pub struct StagingFile {
    path: PathBuf,
    temp_path: Option<TempPath>,
    writer: Option<BufWriter<File>>,
    bytes_written: u64,
    hasher: Sha256,
}

impl StagingFile {
    /// Allocates a fresh file in `dir`, or in the host temp dir when `None`.
    pub async fn open(dir: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("blob-output-").suffix(".tmp");
        let named = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        let (file, temp_path) = named.into_parts();
        let path = temp_path.to_path_buf();
        tracing::info!("Writing local file {}", path.display());

        Ok(Self {
            path,
            temp_path: Some(temp_path),
            writer: Some(BufWriter::new(File::from_std(file))),
            bytes_written: 0,
            hasher: Sha256::new(),
        })
    }

    pub async fn append(&mut self, data: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            UploadError::InvalidState(format!(
                "staging file {} is already closed",
                self.path.display()
            ))
        })?;
        writer.write_all(data).await?;
        self.hasher.update(data);
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Flushes and releases the write handle. Calling it again is a no-op.
    pub async fn close_for_upload(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
            tracing::debug!(
                "Closed local file {} ({} bytes)",
                self.path.display(),
                self.bytes_written
            );
        }
        Ok(())
    }

    /// Removes the local file. Failures are logged and swallowed.
    pub fn delete_if_exists(&mut self) {
        self.writer = None;
        let Some(temp_path) = self.temp_path.take() else {
            return;
        };

        match temp_path.close() {
            Ok(()) => tracing::debug!("Deleted local file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Couldn't delete local file {}: {}",
                self.path.display(),
                e
            ),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    /// Hex SHA-256 of everything appended so far.
    pub fn sha256(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }

    /// Swaps the writer for one over a read-only handle, so writes fail.
    #[cfg(test)]
    pub(crate) fn reopen_read_only(&mut self) -> std::io::Result<()> {
        let file = std::fs::File::open(&self.path)?;
        self.writer = Some(BufWriter::new(File::from_std(file)));
        Ok(())
    }
}
