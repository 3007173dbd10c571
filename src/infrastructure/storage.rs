use crate::config::OutputConfig;
use crate::error::{Result, UploadError};
use crate::services::storage::{ObjectStore, S3ObjectStore};
use aws_sdk_s3::config::Region;
use aws_sdk_s3::config::retry::RetryConfig;
use std::sync::Arc;
use tracing::info;

pub async fn setup_storage(config: &OutputConfig) -> Arc<S3ObjectStore> {
    info!(
        "☁️  Object Storage: {} (Container: {})",
        config.endpoint.as_deref().unwrap_or("provider default"),
        config.container
    );

    let mut loader = aws_config::from_env()
        .region(Region::new(config.region.clone()))
        .credentials_provider(aws_sdk_s3::config::Credentials::new(
            config.credentials.account_name.clone(),
            config.credentials.account_key.clone(),
            None,
            None,
            "static",
        ));
    if let Some(endpoint) = &config.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    let aws_config = loader.load().await;

    // Upload retries are driven by RetryPolicy, not by the SDK.
    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(config.endpoint.is_some())
        .retry_config(RetryConfig::disabled())
        .build();

    let s3_client = aws_sdk_s3::Client::from_conf(s3_config);
    Arc::new(S3ObjectStore::new(s3_client))
}

/// Job-start check: creates the container when it does not exist yet.
/// Any failure here is reported as a configuration problem.
pub async fn prepare_container(store: &dyn ObjectStore, container: &str) -> Result<()> {
    let as_config_error =
        |e: UploadError| UploadError::Configuration(format!("container '{}': {}", container, e));

    if store.container_exists(container).await.map_err(as_config_error)? {
        info!("✅ Container '{}' is ready", container);
        return Ok(());
    }

    info!("🪣 Container '{}' doesn't exist and is created.", container);
    store
        .create_container(container)
        .await
        .map_err(as_config_error)?;
    info!("✅ Container '{}' created successfully", container);
    Ok(())
}
