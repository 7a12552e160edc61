use super::error::{StorageError, StorageResult};
use super::scope::OperationScope;
use super::store::ObjectStore;
use super::types::{
    BucketInfo, BucketPolicy, Continuation, IncompleteUpload, ListPage, ListQuery, ObjectBody,
    ObjectDescriptor, ObjectInfo, ObjectRef, PresignedUrl, PutSource, RemoveOptions, UploadInfo,
};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Process-wide, immutable entry point to the object store.
///
/// Built once at startup and shared through application state. Every logical
/// operation chain derives its own [`GatewaySession`] from it.
#[derive(Clone)]
pub struct Gateway {
    store: Arc<dyn ObjectStore>,
    default_bucket: Option<String>,
    default_region: String,
}

impl Gateway {
    pub fn new(store: Arc<dyn ObjectStore>, default_region: impl Into<String>) -> Self {
        Self {
            store,
            default_bucket: None,
            default_region: default_region.into(),
        }
    }

    pub fn with_default_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.default_bucket = Some(bucket.into());
        self
    }

    pub fn default_bucket(&self) -> Option<&str> {
        self.default_bucket.as_deref()
    }

    /// Fresh session preloaded with the process defaults and no scope.
    pub fn session(&self) -> GatewaySession {
        GatewaySession {
            store: self.store.clone(),
            bucket: self.default_bucket.clone(),
            region: self.default_region.clone(),
            scope: None,
        }
    }
}

/// Result of a bucket existence check.
#[derive(Debug)]
pub enum BucketPresence {
    Present,
    /// The store confirmed the bucket does not exist.
    Absent,
    /// The check itself failed; existence is unknown.
    Indeterminate(StorageError),
}

impl BucketPresence {
    pub fn is_present(&self) -> bool {
        matches!(self, BucketPresence::Present)
    }
}

/// Per-operation-chain view over the gateway.
///
/// Configuration methods consume the session and return a new value, so a
/// session can never be reconfigured underneath another task.
#[derive(Clone)]
pub struct GatewaySession {
    store: Arc<dyn ObjectStore>,
    bucket: Option<String>,
    region: String,
    scope: Option<OperationScope>,
}

impl GatewaySession {
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_scope(mut self, scope: &OperationScope) -> Self {
        self.scope = Some(scope.clone());
        self
    }

    pub fn bucket_name(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    fn require_bucket(&self) -> StorageResult<&str> {
        self.bucket.as_deref().ok_or_else(|| {
            StorageError::Configuration("No bucket selected for gateway session".to_string())
        })
    }

    fn require_scope(&self) -> StorageResult<&OperationScope> {
        self.scope.as_ref().ok_or_else(|| {
            StorageError::Configuration(
                "No operation scope attached to gateway session".to_string(),
            )
        })
    }

    async fn network<F, T>(&self, fut: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        self.require_scope()?.run(fut).await
    }

    // ---- Bucket manager ----

    pub async fn make_bucket(&self) -> StorageResult<()> {
        let bucket = self.require_bucket()?;
        self.network(self.store.create_bucket(bucket, &self.region))
            .await
    }

    pub async fn bucket_exists(&self) -> BucketPresence {
        let check = async {
            let bucket = self.require_bucket()?;
            self.network(self.store.bucket_exists(bucket)).await
        };

        match check.await {
            Ok(true) => BucketPresence::Present,
            Ok(false) => BucketPresence::Absent,
            Err(e) => BucketPresence::Indeterminate(e),
        }
    }

    /// Creates the bucket when the store confirms it is missing.
    pub async fn ensure_bucket(&self) -> StorageResult<()> {
        match self.bucket_exists().await {
            BucketPresence::Present => Ok(()),
            BucketPresence::Absent => self.make_bucket().await,
            BucketPresence::Indeterminate(e) => Err(e),
        }
    }

    pub async fn remove_bucket(&self) -> StorageResult<()> {
        let bucket = self.require_bucket()?;
        self.network(self.store.delete_bucket(bucket)).await
    }

    /// Every bucket visible to the credentials, regardless of the selected one.
    pub async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        self.network(self.store.list_buckets()).await
    }

    pub async fn bucket_policy(&self) -> StorageResult<Option<BucketPolicy>> {
        let bucket = self.require_bucket()?;
        self.network(self.store.bucket_policy(bucket)).await
    }

    pub async fn set_bucket_policy(&self, policy: &BucketPolicy) -> StorageResult<()> {
        let bucket = self.require_bucket()?;
        self.network(self.store.set_bucket_policy(bucket, policy))
            .await
    }

    // ---- Object transfer ----

    /// Publishes the file at `descriptor.path` under `descriptor.key`.
    pub async fn upload_object(&self, descriptor: &ObjectDescriptor) -> StorageResult<UploadInfo> {
        let bucket = self.require_bucket()?;
        let info = self
            .network(self.store.put_object(
                bucket,
                &descriptor.key,
                PutSource::Path(descriptor.path.clone()),
                &descriptor.content_type,
            ))
            .await?;

        tracing::info!(
            "Successfully uploaded {}/{} ({} bytes)",
            bucket,
            info.key,
            info.size
        );
        Ok(info)
    }

    /// Publishes from an open file handle; the length comes from its metadata.
    pub async fn put_object(
        &self,
        key: &str,
        file: tokio::fs::File,
        content_type: &str,
    ) -> StorageResult<UploadInfo> {
        let bucket = self.require_bucket()?;
        self.network(
            self.store
                .put_object(bucket, key, PutSource::File(file), content_type),
        )
        .await
    }

    pub async fn get_object(&self, key: &str) -> StorageResult<ObjectBody> {
        let bucket = self.require_bucket()?;
        self.network(self.store.get_object(bucket, key)).await
    }

    /// Downloads `key` into `dest`.
    ///
    /// Bytes land in a sibling temporary file that is renamed over `dest`
    /// only after the whole body was written and synced; on failure `dest`
    /// is left untouched.
    pub async fn fget_object(&self, key: &str, dest: &Path) -> StorageResult<ObjectInfo> {
        let bucket = self.require_bucket()?;
        let scope = self.require_scope()?;

        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| StorageError::local_io(&parent, e))?;

        let partial = tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(&parent)
            .map_err(|e| StorageError::local_io(&parent, e))?;
        let (std_file, partial_path) = partial.into_parts();
        let mut file = tokio::fs::File::from_std(std_file);

        let written = scope
            .run(async {
                let mut body = self.store.get_object(bucket, key).await?;
                let written = tokio::io::copy(&mut body.reader, &mut file)
                    .await
                    .map_err(|e| StorageError::Connectivity(format!("Read of {} failed: {}", key, e)))?;
                file.flush()
                    .await
                    .map_err(|e| StorageError::local_io(&partial_path, e))?;
                file.sync_all()
                    .await
                    .map_err(|e| StorageError::local_io(&partial_path, e))?;
                Ok((written, body.content_type))
            })
            .await;

        drop(file);
        let (size, content_type) = written?;

        partial_path
            .persist(dest)
            .map_err(|e| StorageError::local_io(dest, e.error))?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size,
            content_type,
            etag: None,
            last_modified: None,
        })
    }

    pub async fn stat_object(&self, key: &str) -> StorageResult<ObjectInfo> {
        let bucket = self.require_bucket()?;
        self.network(self.store.stat_object(bucket, key)).await
    }

    /// Server-side copy from `source` into `dest_key` of the session bucket.
    pub async fn copy_object(&self, source: &ObjectRef, dest_key: &str) -> StorageResult<()> {
        let bucket = self.require_bucket()?;
        let dest = ObjectRef::new(bucket, dest_key);
        self.network(self.store.copy_object(source, &dest)).await
    }

    /// Removes `key`; a key the store does not hold is reported as `NotFound`.
    pub async fn remove_object(&self, key: &str, options: RemoveOptions) -> StorageResult<()> {
        let bucket = self.require_bucket()?;
        self.network(async {
            self.store.stat_object(bucket, key).await?;
            self.store.delete_object(bucket, key, options).await
        })
        .await
    }

    pub async fn remove_incomplete_upload(&self, key: &str) -> StorageResult<()> {
        let bucket = self.require_bucket()?;
        self.network(self.store.abort_incomplete_uploads(bucket, key))
            .await
    }

    /// Collects every object under `query`.
    ///
    /// Returns what was gathered so far if the scope is cancelled or its
    /// deadline passes mid-listing.
    pub async fn list_objects(&self, query: &ListQuery) -> StorageResult<Vec<ObjectInfo>> {
        let bucket = self.require_bucket()?;
        let scope = self.require_scope()?;
        drain_pages(scope, |cursor| {
            self.store.list_objects_page(bucket, query, cursor)
        })
        .await
    }

    pub async fn list_incomplete_uploads(
        &self,
        query: &ListQuery,
    ) -> StorageResult<Vec<IncompleteUpload>> {
        let bucket = self.require_bucket()?;
        let scope = self.require_scope()?;
        drain_pages(scope, |cursor| {
            self.store.list_incomplete_uploads_page(bucket, query, cursor)
        })
        .await
    }

    // ---- Presigned URL issuer ----

    /// Local signing; needs a bucket but no scope.
    pub async fn presigned_get(&self, key: &str, ttl: Duration) -> StorageResult<PresignedUrl> {
        let bucket = self.require_bucket()?;
        self.store.presign_get(bucket, key, ttl).await
    }
}

async fn drain_pages<T, F, Fut>(scope: &OperationScope, mut fetch: F) -> StorageResult<Vec<T>>
where
    F: FnMut(Option<Continuation>) -> Fut,
    Fut: Future<Output = StorageResult<ListPage<T>>>,
{
    let listing = scope.child();
    let mut collected = Vec::new();
    let mut cursor = None;

    loop {
        if listing.is_cancelled() {
            tracing::debug!("Listing stopped after {} entries", collected.len());
            break;
        }

        match listing.run(fetch(cursor.take())).await {
            Ok(page) => {
                collected.extend(page.items);
                match page.next {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
            Err(e) if e.is_interruption() => {
                tracing::debug!(
                    "Listing interrupted after {} entries: {}",
                    collected.len(),
                    e
                );
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(collected)
}
