use crate::services::content_type;
use crate::services::storage::{
    BucketPresence, Gateway, ObjectBody, OperationScope, PresignedUrl, StorageError,
    StorageResult,
};
use async_trait::async_trait;
use futures::TryStreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

/// Fetches the bytes a presigned URL points at.
#[async_trait]
pub trait UrlResolver: Send + Sync {
    async fn resolve(&self, url: &PresignedUrl) -> StorageResult<ObjectBody>;
}

/// Resolves presigned URLs with a plain HTTP GET.
#[derive(Clone, Default)]
pub struct HttpUrlResolver {
    client: reqwest::Client,
}

impl HttpUrlResolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UrlResolver for HttpUrlResolver {
    async fn resolve(&self, url: &PresignedUrl) -> StorageResult<ObjectBody> {
        let response = self
            .client
            .get(url.url.clone())
            .send()
            .await
            .map_err(|e| StorageError::Connectivity(format!("GET {} failed: {}", url.key, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(url.key.clone()));
        }
        if !status.is_success() {
            return Err(StorageError::Backend(format!(
                "Presigned GET for {} returned {}",
                url.key, status
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_length = response.content_length();

        let stream = response.bytes_stream().map_err(std::io::Error::other);

        Ok(ObjectBody {
            content_type,
            content_length,
            reader: Box::new(StreamReader::new(stream)),
        })
    }
}

/// An object on its way from the store to the client.
pub struct RelayedObject {
    pub key: String,
    pub filename: String,
    pub content_type: String,
    pub content_length: Option<u64>,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

/// Serves downloads through freshly issued presigned URLs.
#[derive(Clone)]
pub struct DownloadRelay {
    gateway: Gateway,
    resolver: Arc<dyn UrlResolver>,
    folder: String,
    ttl: Duration,
}

impl DownloadRelay {
    pub fn new(
        gateway: Gateway,
        resolver: Arc<dyn UrlResolver>,
        folder: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            gateway,
            resolver,
            folder: folder.into().trim_matches('/').to_string(),
            ttl,
        }
    }

    /// Store key for a client-supplied object name. Bare names live under
    /// the module folder.
    pub fn resolve_key(&self, object_name: &str) -> StorageResult<String> {
        let name = object_name.trim().trim_start_matches('/');
        if name.is_empty() || name.split('/').any(|part| part == "..") {
            return Err(StorageError::Validation(format!(
                "Invalid object name '{}'",
                object_name
            )));
        }

        if self.folder.is_empty() || name.starts_with(&format!("{}/", self.folder)) {
            Ok(name.to_string())
        } else {
            Ok(format!("{}/{}", self.folder, name))
        }
    }

    /// Opens `object_name` for streaming.
    ///
    /// Existence is confirmed before any URL is signed, so a missing object
    /// never produces a presigned URL.
    pub async fn open(
        &self,
        scope: &OperationScope,
        object_name: &str,
    ) -> StorageResult<RelayedObject> {
        let key = self.resolve_key(object_name)?;
        let session = self.gateway.session().with_scope(scope);

        match session.bucket_exists().await {
            BucketPresence::Present => {}
            BucketPresence::Absent => {
                return Err(StorageError::NotFound(format!(
                    "Bucket {} does not exist",
                    session.bucket_name().unwrap_or_default()
                )));
            }
            BucketPresence::Indeterminate(e) => return Err(e),
        }

        let info = session.stat_object(&key).await?;
        let presigned = session.presigned_get(&key, self.ttl).await?;
        tracing::debug!(
            "Relaying {} via presigned URL valid until {}",
            key,
            presigned.expires_at()
        );

        let body = scope.run(self.resolver.resolve(&presigned)).await?;

        let stored = info.content_type.as_deref().or(body.content_type.as_deref());
        let content_type = content_type::resolve(stored, &key);
        let filename = key.rsplit('/').next().unwrap_or(&key).to_string();

        Ok(RelayedObject {
            content_length: body.content_length.or(Some(info.size)),
            reader: body.reader,
            content_type,
            filename,
            key,
        })
    }
}
