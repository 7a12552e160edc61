use super::error::{StorageError, StorageResult};
use super::store::ObjectStore;
use super::types::{
    BucketInfo, BucketPolicy, Continuation, IncompleteUpload, ListPage, ListQuery,
    MAX_OBJECT_SIZE, MULTIPART_THRESHOLD, ObjectBody, ObjectInfo, ObjectRef, PresignedUrl,
    PutSource, RemoveOptions, UploadInfo, multipart_part_size,
};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration,
};
use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::path::PathBuf;
use std::time::Duration;

/// Characters escaped in `x-amz-copy-source`; `/` separates key segments and stays.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn put_single(
        &self,
        bucket: &str,
        key: &str,
        source: PartSource,
        size: u64,
        content_type: &str,
    ) -> StorageResult<UploadInfo> {
        let body = source.stream(0, size).await?;
        let res = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .content_length(size as i64)
            .body(body)
            .send()
            .await
            .map_err(|e| classify(e, &format!("{}/{}", bucket, key)))?;

        Ok(UploadInfo {
            key: key.to_string(),
            size,
            etag: res.e_tag().map(str::to_string),
        })
    }

    async fn put_multipart(
        &self,
        bucket: &str,
        key: &str,
        source: PartSource,
        size: u64,
        content_type: &str,
    ) -> StorageResult<UploadInfo> {
        let target = format!("{}/{}", bucket, key);
        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| classify(e, &target))?;

        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::Backend("No upload ID".to_string()))?
            .to_string();
        let pending = PendingUpload::new(self.client.clone(), bucket, key, &upload_id);

        match self
            .upload_parts(bucket, key, &upload_id, &source, size)
            .await
        {
            Ok(parts) => {
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();
                let res = self
                    .client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await;

                match res {
                    Ok(done) => {
                        pending.disarm();
                        Ok(UploadInfo {
                            key: key.to_string(),
                            size,
                            etag: done.e_tag().map(str::to_string),
                        })
                    }
                    Err(e) => {
                        pending.abort().await;
                        Err(classify(e, &target))
                    }
                }
            }
            Err(e) => {
                pending.abort().await;
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        source: &PartSource,
        size: u64,
    ) -> StorageResult<Vec<CompletedPart>> {
        let part_size = multipart_part_size(size);
        let mut parts = Vec::with_capacity(size.div_ceil(part_size) as usize);
        let mut offset = 0u64;
        let mut part_number = 1i32;

        while offset < size {
            let len = part_size.min(size - offset);
            let body = source.stream(offset, len).await?;

            let res = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .content_length(len as i64)
                .body(body)
                .send()
                .await
                .map_err(|e| classify(e, &format!("{}/{} part {}", bucket, key, part_number)))?;

            tracing::debug!(
                "Uploaded part {} ({} bytes) of {}/{}",
                part_number,
                len,
                bucket,
                key
            );

            parts.push(
                CompletedPart::builder()
                    .e_tag(res.e_tag().unwrap_or_default())
                    .part_number(part_number)
                    .build(),
            );

            offset += len;
            part_number += 1;
        }

        Ok(parts)
    }
}

/// An open multipart session.
///
/// Dropped while still armed (the upload future was cancelled or timed out),
/// it aborts the session from a detached task so no parts are left behind.
struct PendingUpload {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    armed: bool,
}

impl PendingUpload {
    fn new(client: Client, bucket: &str, key: &str, upload_id: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }

    async fn abort(mut self) {
        self.armed = false;
        abort_upload(&self.client, &self.bucket, &self.key, &self.upload_id).await;
    }
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                "Multipart upload {} for {}/{} left open: no runtime to abort it",
                self.upload_id,
                self.bucket,
                self.key
            );
            return;
        };

        tracing::info!(
            "Multipart upload {} for {}/{} interrupted, aborting",
            self.upload_id,
            self.bucket,
            self.key
        );
        let client = self.client.clone();
        let bucket = std::mem::take(&mut self.bucket);
        let key = std::mem::take(&mut self.key);
        let upload_id = std::mem::take(&mut self.upload_id);
        handle.spawn(async move {
            abort_upload(&client, &bucket, &key, &upload_id).await;
        });
    }
}

async fn abort_upload(client: &Client, bucket: &str, key: &str, upload_id: &str) {
    if let Err(e) = client
        .abort_multipart_upload()
        .bucket(bucket)
        .key(key)
        .upload_id(upload_id)
        .send()
        .await
    {
        tracing::warn!(
            "Failed to abort multipart upload {} for {}/{}: {}",
            upload_id,
            bucket,
            key,
            DisplayErrorContext(&e)
        );
    }
}

/// Re-readable source for single and multipart bodies.
enum PartSource {
    Path(PathBuf),
    File(tokio::fs::File),
}

impl PartSource {
    async fn stream(&self, offset: u64, len: u64) -> StorageResult<ByteStream> {
        let builder = match self {
            PartSource::Path(path) => ByteStream::read_from().path(path),
            PartSource::File(file) => {
                let handle = file
                    .try_clone()
                    .await
                    .map_err(|e| StorageError::local_io("<open file>", e))?;
                ByteStream::read_from().file(handle)
            }
        };

        builder
            .offset(offset)
            .length(Length::Exact(len))
            .build()
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to open body stream: {}", e)))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn create_bucket(&self, bucket: &str, region: &str) -> StorageResult<()> {
        let mut req = self.client.create_bucket().bucket(bucket);
        if !region.is_empty() && region != "us-east-1" {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }

        match req.send().await {
            Ok(_) => {
                tracing::info!("🪣 Bucket '{}' created in {}", bucket, region);
                Ok(())
            }
            Err(e) if matches!(
                e.code(),
                Some("BucketAlreadyOwnedByYou") | Some("BucketAlreadyExists")
            ) =>
            {
                tracing::debug!("Bucket '{}' already exists", bucket);
                Ok(())
            }
            Err(e) => Err(classify(e, bucket)),
        }
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => match classify(e, bucket) {
                StorageError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| classify(e, bucket))?;
        Ok(())
    }

    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        let res = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| classify(e, "buckets"))?;

        Ok(res
            .buckets()
            .iter()
            .filter_map(|b| {
                b.name().map(|name| BucketInfo {
                    name: name.to_string(),
                    created_at: b.creation_date().and_then(to_chrono),
                })
            })
            .collect())
    }

    async fn bucket_policy(&self, bucket: &str) -> StorageResult<Option<BucketPolicy>> {
        match self.client.get_bucket_policy().bucket(bucket).send().await {
            Ok(res) => Ok(res.policy().map(|p| BucketPolicy(p.to_string()))),
            Err(e) if e.code() == Some("NoSuchBucketPolicy") => Ok(None),
            Err(e) => Err(classify(e, bucket)),
        }
    }

    async fn set_bucket_policy(&self, bucket: &str, policy: &BucketPolicy) -> StorageResult<()> {
        self.client
            .put_bucket_policy()
            .bucket(bucket)
            .policy(policy.as_str())
            .send()
            .await
            .map_err(|e| classify(e, bucket))?;
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: PutSource,
        content_type: &str,
    ) -> StorageResult<UploadInfo> {
        let (source, size) = match source {
            PutSource::Path(path) => {
                let size = tokio::fs::metadata(&path)
                    .await
                    .map_err(|e| StorageError::local_io(&path, e))?
                    .len();
                (PartSource::Path(path), size)
            }
            PutSource::File(file) => {
                let size = file
                    .metadata()
                    .await
                    .map_err(|e| StorageError::local_io("<open file>", e))?
                    .len();
                (PartSource::File(file), size)
            }
        };

        if size > MAX_OBJECT_SIZE {
            return Err(StorageError::Validation(format!(
                "Object of {} bytes exceeds the {} byte maximum",
                size, MAX_OBJECT_SIZE
            )));
        }

        if size > MULTIPART_THRESHOLD {
            tracing::info!(
                "Starting multipart upload of {}/{} ({} bytes)",
                bucket,
                key,
                size
            );
            self.put_multipart(bucket, key, source, size, content_type)
                .await
        } else {
            self.put_single(bucket, key, source, size, content_type)
                .await
        }
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectBody> {
        let res = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, &format!("{}/{}", bucket, key)))?;

        Ok(ObjectBody {
            content_type: res.content_type().map(str::to_string),
            content_length: res.content_length().and_then(|l| u64::try_from(l).ok()),
            reader: Box::new(res.body.into_async_read()),
        })
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
        let res = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, &format!("{}/{}", bucket, key)))?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size: res
                .content_length()
                .and_then(|l| u64::try_from(l).ok())
                .unwrap_or(0),
            content_type: res.content_type().map(str::to_string),
            etag: res.e_tag().map(str::to_string),
            last_modified: res.last_modified().and_then(to_chrono),
        })
    }

    async fn copy_object(&self, source: &ObjectRef, dest: &ObjectRef) -> StorageResult<()> {
        let copy_source = format!(
            "{}/{}",
            source.bucket,
            utf8_percent_encode(&source.key, COPY_SOURCE)
        );

        let res = self
            .client
            .copy_object()
            .bucket(&dest.bucket)
            .key(&dest.key)
            .copy_source(copy_source)
            .send()
            .await;

        if let Err(e) = res {
            tracing::error!(
                "S3 copy_object failed: source={}/{}, dest={}/{}, error={}",
                source.bucket,
                source.key,
                dest.bucket,
                dest.key,
                DisplayErrorContext(&e)
            );
            return Err(classify(e, &format!("{}/{}", source.bucket, source.key)));
        }
        Ok(())
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        options: RemoveOptions,
    ) -> StorageResult<()> {
        let mut req = self.client.delete_object().bucket(bucket).key(key);
        if options.bypass_governance {
            req = req.bypass_governance_retention(true);
        }
        req.send()
            .await
            .map_err(|e| classify(e, &format!("{}/{}", bucket, key)))?;
        Ok(())
    }

    async fn abort_incomplete_uploads(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let query = ListQuery::recursive(key);
        let mut cursor = None;

        loop {
            let page = self
                .list_incomplete_uploads_page(bucket, &query, cursor)
                .await?;

            for upload in page.items.iter().filter(|u| u.key == key) {
                self.client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload.upload_id)
                    .send()
                    .await
                    .map_err(|e| classify(e, &format!("{}/{}", bucket, key)))?;
                tracing::info!(
                    "Aborted incomplete upload {} for {}/{}",
                    upload.upload_id,
                    bucket,
                    key
                );
            }

            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(())
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        query: &ListQuery,
        cursor: Option<Continuation>,
    ) -> StorageResult<ListPage<ObjectInfo>> {
        let token = match cursor {
            Some(Continuation::Token(t)) => Some(t),
            Some(Continuation::Markers { .. }) => {
                return Err(StorageError::Configuration(
                    "Object listing expects a continuation token".to_string(),
                ));
            }
            None => None,
        };

        let mut req = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(&query.prefix)
            .set_continuation_token(token);
        if !query.recursive {
            req = req.delimiter("/");
        }

        let res = req.send().await.map_err(|e| classify(e, bucket))?;

        let mut items: Vec<ObjectInfo> = res
            .contents()
            .iter()
            .filter_map(|o| {
                o.key().map(|key| ObjectInfo {
                    key: key.to_string(),
                    size: o.size().and_then(|s| u64::try_from(s).ok()).unwrap_or(0),
                    content_type: None,
                    etag: o.e_tag().map(str::to_string),
                    last_modified: o.last_modified().and_then(to_chrono),
                })
            })
            .collect();

        items.extend(res.common_prefixes().iter().filter_map(|p| {
            p.prefix().map(|prefix| ObjectInfo {
                key: prefix.to_string(),
                size: 0,
                content_type: None,
                etag: None,
                last_modified: None,
            })
        }));

        let next = if res.is_truncated().unwrap_or(false) {
            res.next_continuation_token()
                .map(|t| Continuation::Token(t.to_string()))
        } else {
            None
        };

        Ok(ListPage { items, next })
    }

    async fn list_incomplete_uploads_page(
        &self,
        bucket: &str,
        query: &ListQuery,
        cursor: Option<Continuation>,
    ) -> StorageResult<ListPage<IncompleteUpload>> {
        let (key_marker, upload_id_marker) = match cursor {
            Some(Continuation::Markers { key, upload_id }) => (Some(key), upload_id),
            Some(Continuation::Token(_)) => {
                return Err(StorageError::Configuration(
                    "Upload listing expects key/upload-id markers".to_string(),
                ));
            }
            None => (None, None),
        };

        let mut req = self
            .client
            .list_multipart_uploads()
            .bucket(bucket)
            .prefix(&query.prefix)
            .set_key_marker(key_marker)
            .set_upload_id_marker(upload_id_marker);
        if !query.recursive {
            req = req.delimiter("/");
        }

        let res = req.send().await.map_err(|e| classify(e, bucket))?;

        let items = res
            .uploads()
            .iter()
            .filter_map(|u| match (u.key(), u.upload_id()) {
                (Some(key), Some(upload_id)) => Some(IncompleteUpload {
                    key: key.to_string(),
                    upload_id: upload_id.to_string(),
                    initiated: u.initiated().and_then(to_chrono),
                }),
                _ => None,
            })
            .collect();

        let next = match (res.is_truncated().unwrap_or(false), res.next_key_marker()) {
            (true, Some(key)) => Some(Continuation::Markers {
                key: key.to_string(),
                upload_id: res.next_upload_id_marker().map(str::to_string),
            }),
            _ => None,
        };

        Ok(ListPage { items, next })
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<PresignedUrl> {
        let config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::Configuration(format!("Invalid presign TTL: {}", e)))?;

        let issued_at = Utc::now();
        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| {
                StorageError::Configuration(format!(
                    "Failed to sign URL for {}/{}: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;

        let url = url::Url::parse(presigned.uri()).map_err(|e| {
            StorageError::Configuration(format!("Signed URL is not a valid URL: {}", e))
        })?;

        Ok(PresignedUrl {
            key: key.to_string(),
            url,
            expires_in,
            issued_at,
        })
    }
}

fn to_chrono(d: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(d.secs(), d.subsec_nanos())
}

/// Maps an SDK failure onto the storage taxonomy. Transport failures never
/// become `NotFound`.
fn classify<E, R>(err: SdkError<E, R>, target: &str) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let detail = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::ServiceError(_) => classify_code(err.code(), target, detail),
        SdkError::ConstructionFailure(_) => StorageError::Configuration(detail),
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StorageError::Connectivity(detail)
        }
        _ => StorageError::Backend(detail),
    }
}

fn classify_code(code: Option<&str>, target: &str, detail: String) -> StorageError {
    match code {
        Some("NoSuchKey" | "NoSuchBucket" | "NotFound" | "NoSuchUpload") => {
            StorageError::NotFound(target.to_string())
        }
        Some(
            "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "InvalidToken" | "ExpiredToken"
            | "AuthorizationHeaderMalformed",
        ) => StorageError::Configuration(detail),
        Some("SlowDown" | "ServiceUnavailable" | "InternalError" | "RequestTimeout") => {
            StorageError::Connectivity(detail)
        }
        _ => StorageError::Backend(detail),
    }
}
