use crate::error::{Result, UploadError};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::{ByteStream, Length};
use tokio::fs::File;

/// Blob store addressed by (container, key).
///
/// Implementations must classify failures into the `UploadError` taxonomy:
/// `RemoteTransient` for anything worth retrying, `RemoteFatal` otherwise.
/// A failed `put_object` must not leave a readable partial object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Streams `body` (exactly `size` bytes) to `key`, replacing any existing object.
    async fn put_object(&self, container: &str, key: &str, body: File, size: u64) -> Result<()>;
    async fn container_exists(&self, container: &str) -> Result<bool>;
    async fn create_container(&self, container: &str) -> Result<()>;
}

pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(&self, container: &str, key: &str, body: File, size: u64) -> Result<()> {
        let stream = ByteStream::read_from()
            .file(body)
            .length(Length::Exact(size))
            .build()
            .await
            .map_err(|e| UploadError::LocalIo(std::io::Error::other(e)))?;

        self.client
            .put_object()
            .bucket(container)
            .key(key)
            .content_length(size as i64)
            .body(stream)
            .send()
            .await
            .map_err(|e| classify_sdk_error("put_object", e))?;
        Ok(())
    }

    async fn container_exists(&self, container: &str) -> Result<bool> {
        let res = self.client.head_bucket().bucket(container).send().await;

        match res {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(ctx))
                if ctx.err().is_not_found() || ctx.raw().status().as_u16() == 404 =>
            {
                Ok(false)
            }
            Err(e) => Err(classify_sdk_error("head_bucket", e)),
        }
    }

    async fn create_container(&self, container: &str) -> Result<()> {
        let res = self.client.create_bucket().bucket(container).send().await;

        match res {
            Ok(_) => Ok(()),
            Err(SdkError::ServiceError(ctx)) if ctx.err().is_bucket_already_owned_by_you() => {
                Ok(())
            }
            Err(e) => Err(classify_sdk_error("create_bucket", e)),
        }
    }
}

/// Timeouts, connection failures, unparseable responses, 5xx, 408 and 429 are
/// transient. Request construction failures and other 4xx are fatal.
fn classify_sdk_error<E>(operation: &str, err: SdkError<E, HttpResponse>) -> UploadError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let message = format!("{} failed: {}", operation, DisplayErrorContext(&err));
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(ctx) => is_transient_status(ctx.raw().status().as_u16()),
        SdkError::ConstructionFailure(_) => false,
        _ => true,
    };

    if transient {
        UploadError::RemoteTransient(message)
    } else {
        UploadError::RemoteFatal(message)
    }
}

fn is_transient_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_statuses() {
        for status in [500, 502, 503, 504, 408, 429] {
            assert!(is_transient_status(status), "{status} should be transient");
        }
        for status in [400, 401, 403, 404, 409, 412] {
            assert!(!is_transient_status(status), "{status} should be fatal");
        }
    }
}
