use crate::config::StorageConfig;
use crate::services::storage::{Gateway, OperationScope, S3ObjectStore};
use aws_sdk_s3::config::{Credentials, Region};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Builds the process-wide gateway and makes sure its bucket exists.
pub async fn setup_storage(config: &StorageConfig) -> anyhow::Result<Gateway> {
    let endpoint_url = config.endpoint_url();
    info!(
        "☁️  S3 Storage: {} (Bucket: {}, Region: {})",
        endpoint_url, config.bucket, config.region
    );

    let aws_config = aws_config::from_env()
        .endpoint_url(&endpoint_url)
        .region(Region::new(config.region.clone()))
        .credentials_provider(Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            config.session_token.clone(),
            None,
            "static",
        ))
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(config.force_path_style)
        .build();

    let s3_client = aws_sdk_s3::Client::from_conf(s3_config);
    let gateway = Gateway::new(Arc::new(S3ObjectStore::new(s3_client)), &config.region)
        .with_default_bucket(&config.bucket);

    let scope = OperationScope::with_timeout(Duration::from_secs(30));
    gateway
        .session()
        .with_scope(&scope)
        .ensure_bucket()
        .await
        .map_err(|e| anyhow::anyhow!("Bucket {} is not usable: {}", config.bucket, e))?;
    info!("🪣 Bucket {} ready", config.bucket);

    Ok(gateway)
}
