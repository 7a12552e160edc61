use super::error::StorageResult;
use super::types::{
    BucketInfo, BucketPolicy, Continuation, IncompleteUpload, ListPage, ListQuery, ObjectBody,
    ObjectInfo, ObjectRef, PresignedUrl, PutSource, RemoveOptions, UploadInfo,
};
use async_trait::async_trait;
use std::time::Duration;

/// Transport seam over an S3-compatible object store.
///
/// Implementations hold the endpoint, credentials and secure flag and are
/// shared by every [`GatewaySession`](super::GatewaySession). Each method is
/// a single logical store operation; bucket selection and scoping are the
/// session's job.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Creates `bucket` in `region`. A bucket that already exists is success.
    async fn create_bucket(&self, bucket: &str, region: &str) -> StorageResult<()>;
    /// `Ok(false)` only when the store confirms absence.
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool>;
    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()>;
    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>>;
    async fn bucket_policy(&self, bucket: &str) -> StorageResult<Option<BucketPolicy>>;
    async fn set_bucket_policy(&self, bucket: &str, policy: &BucketPolicy) -> StorageResult<()>;

    /// Publishes `source`, switching to multipart above the threshold.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: PutSource,
        content_type: &str,
    ) -> StorageResult<UploadInfo>;
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectBody>;
    async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo>;
    async fn copy_object(&self, source: &ObjectRef, dest: &ObjectRef) -> StorageResult<()>;
    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        options: RemoveOptions,
    ) -> StorageResult<()>;
    /// Aborts every pending multipart session for exactly `key`.
    async fn abort_incomplete_uploads(&self, bucket: &str, key: &str) -> StorageResult<()>;

    async fn list_objects_page(
        &self,
        bucket: &str,
        query: &ListQuery,
        cursor: Option<Continuation>,
    ) -> StorageResult<ListPage<ObjectInfo>>;
    async fn list_incomplete_uploads_page(
        &self,
        bucket: &str,
        query: &ListQuery,
        cursor: Option<Continuation>,
    ) -> StorageResult<ListPage<IncompleteUpload>>;

    /// Signs a GET for `key` locally. Must not touch the network.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<PresignedUrl>;
}
