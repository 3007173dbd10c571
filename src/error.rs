use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Local I/O error: {0}")]
    LocalIo(#[from] std::io::Error),

    #[error("Local file missing: {0}")]
    LocalFileMissing(String),

    #[error("Remote transient error: {0}")]
    RemoteTransient(String),

    #[error("Remote fatal error: {0}")]
    RemoteFatal(String),

    #[error("Retry exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<UploadError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl UploadError {
    /// Only transient remote failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::RemoteTransient(_))
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(UploadError::RemoteTransient("timeout".into()).is_retryable());
        assert!(!UploadError::RemoteFatal("403".into()).is_retryable());
        assert!(!UploadError::LocalFileMissing("/tmp/x".into()).is_retryable());
        assert!(!UploadError::Configuration("bad key".into()).is_retryable());
        assert!(!UploadError::Cancelled.is_retryable());
    }

    #[test]
    fn test_retry_exhausted_message_carries_last_error() {
        let err = UploadError::RetryExhausted {
            attempts: 3,
            last: Box::new(UploadError::RemoteTransient("503 Slow Down".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("503 Slow Down"));
    }
}
