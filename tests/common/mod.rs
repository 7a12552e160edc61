#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use chrono::Utc;
use module_backend::config::AppConfig;
use module_backend::services::module_service::InMemoryModuleRepository;
use module_backend::services::relay::UrlResolver;
use module_backend::services::storage::{
    BucketInfo, BucketPolicy, Continuation, Gateway, IncompleteUpload, ListPage, ListQuery,
    ObjectBody, ObjectInfo, ObjectRef, ObjectStore, PresignedUrl, PutSource, RemoveOptions,
    StorageError, StorageResult, UploadInfo,
};
use module_backend::utils::auth::create_jwt;
use module_backend::{AppState, create_app};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

pub const BUCKET: &str = "modules";
pub const JWT_SECRET: &str = "test_secret";

#[derive(Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: Option<String>,
    etag: String,
    last_modified: chrono::DateTime<Utc>,
}

#[derive(Default)]
struct MemoryBucket {
    created_at: Option<chrono::DateTime<Utc>>,
    policy: Option<BucketPolicy>,
    objects: BTreeMap<String, StoredObject>,
    uploads: Vec<IncompleteUpload>,
}

/// In-memory S3 stand-in. Presigned URLs use the `memory://<bucket>/<key>` form.
#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: Mutex<HashMap<String, MemoryBucket>>,
    pub presign_calls: AtomicUsize,
    pub put_calls: AtomicUsize,
    pub fail_puts: AtomicBool,
    /// Objects per listing page; 0 means everything in one page.
    pub page_size: AtomicUsize,
    /// Listing pages after this many never resolve.
    pub stall_after_pages: Mutex<Option<usize>>,
}

impl MemoryObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_bucket(bucket: &str) -> Arc<Self> {
        let store = Self::new();
        store.add_bucket(bucket);
        store
    }

    pub fn add_bucket(&self, bucket: &str) {
        self.buckets.lock().unwrap().insert(
            bucket.to_string(),
            MemoryBucket {
                created_at: Some(Utc::now()),
                ..Default::default()
            },
        );
    }

    pub fn insert(&self, bucket: &str, key: &str, data: &[u8], content_type: Option<&str>) {
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(bucket.to_string()).or_default();
        bucket.objects.insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                content_type: content_type.map(str::to_string),
                etag: format!("\"{:x}\"", data.len()),
                last_modified: Utc::now(),
            },
        );
    }

    pub fn add_incomplete_upload(&self, bucket: &str, key: &str) -> String {
        let upload_id = Uuid::new_v4().to_string();
        let mut buckets = self.buckets.lock().unwrap();
        buckets
            .entry(bucket.to_string())
            .or_default()
            .uploads
            .push(IncompleteUpload {
                key: key.to_string(),
                upload_id: upload_id.clone(),
                initiated: Some(Utc::now()),
            });
        upload_id
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<(Vec<u8>, Option<String>)> {
        let buckets = self.buckets.lock().unwrap();
        buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map(|o| (o.data.clone(), o.content_type.clone()))
    }

    pub fn object_count(&self, bucket: &str) -> usize {
        let buckets = self.buckets.lock().unwrap();
        buckets.get(bucket).map_or(0, |b| b.objects.len())
    }

    fn with_bucket_mut<T>(
        &self,
        bucket: &str,
        f: impl FnOnce(&mut MemoryBucket) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut buckets = self.buckets.lock().unwrap();
        match buckets.get_mut(bucket) {
            Some(b) => f(b),
            None => Err(StorageError::NotFound(format!("bucket {}", bucket))),
        }
    }

    fn page<T: Clone>(&self, items: Vec<T>, cursor: Option<Continuation>) -> ListPage<T> {
        let start = match cursor {
            Some(Continuation::Token(t)) => t.parse().unwrap_or(0),
            _ => 0,
        };
        let size = match self.page_size.load(Ordering::SeqCst) {
            0 => items.len().max(1),
            n => n,
        };
        let end = (start + size).min(items.len());
        let next = (end < items.len()).then(|| Continuation::Token(end.to_string()));
        ListPage {
            items: items[start.min(end)..end].to_vec(),
            next,
        }
    }

    async fn maybe_stall(&self, cursor: &Option<Continuation>) {
        let page_index = match cursor {
            Some(Continuation::Token(t)) => {
                let offset: usize = t.parse().unwrap_or(0);
                offset / self.page_size.load(Ordering::SeqCst).max(1)
            }
            _ => 0,
        };
        let stall = *self.stall_after_pages.lock().unwrap();
        if stall.is_some_and(|n| page_index >= n) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn create_bucket(&self, bucket: &str, _region: &str) -> StorageResult<()> {
        let mut buckets = self.buckets.lock().unwrap();
        buckets.entry(bucket.to_string()).or_insert_with(|| MemoryBucket {
            created_at: Some(Utc::now()),
            ..Default::default()
        });
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        Ok(self.buckets.lock().unwrap().contains_key(bucket))
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        let mut buckets = self.buckets.lock().unwrap();
        let empty = buckets.get(bucket).map(|b| b.objects.is_empty());
        match empty {
            None => Err(StorageError::NotFound(format!("bucket {}", bucket))),
            Some(false) => Err(StorageError::Backend("BucketNotEmpty".to_string())),
            Some(true) => {
                buckets.remove(bucket);
                Ok(())
            }
        }
    }

    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        let buckets = self.buckets.lock().unwrap();
        let mut out: Vec<_> = buckets
            .iter()
            .map(|(name, b)| BucketInfo {
                name: name.clone(),
                created_at: b.created_at,
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn bucket_policy(&self, bucket: &str) -> StorageResult<Option<BucketPolicy>> {
        self.with_bucket_mut(bucket, |b| Ok(b.policy.clone()))
    }

    async fn set_bucket_policy(&self, bucket: &str, policy: &BucketPolicy) -> StorageResult<()> {
        self.with_bucket_mut(bucket, |b| {
            b.policy = Some(policy.clone());
            Ok(())
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: PutSource,
        content_type: &str,
    ) -> StorageResult<UploadInfo> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Connectivity("injected put failure".to_string()));
        }

        let data = match source {
            PutSource::Path(path) => tokio::fs::read(&path)
                .await
                .map_err(|e| StorageError::local_io(&path, e))?,
            PutSource::File(mut file) => {
                let mut data = Vec::new();
                file.read_to_end(&mut data)
                    .await
                    .map_err(|e| StorageError::local_io("<file>", e))?;
                data
            }
        };

        let size = data.len() as u64;
        let etag = format!("\"{:x}\"", size);
        self.with_bucket_mut(bucket, |b| {
            b.objects.insert(
                key.to_string(),
                StoredObject {
                    data,
                    content_type: Some(content_type.to_string()),
                    etag: etag.clone(),
                    last_modified: Utc::now(),
                },
            );
            Ok(())
        })?;

        Ok(UploadInfo {
            key: key.to_string(),
            size,
            etag: Some(etag),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectBody> {
        let object = self.with_bucket_mut(bucket, |b| {
            b.objects
                .get(key)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(key.to_string()))
        })?;

        Ok(ObjectBody {
            content_type: object.content_type,
            content_length: Some(object.data.len() as u64),
            reader: Box::new(std::io::Cursor::new(object.data)),
        })
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
        self.with_bucket_mut(bucket, |b| {
            b.objects
                .get(key)
                .map(|o| ObjectInfo {
                    key: key.to_string(),
                    size: o.data.len() as u64,
                    content_type: o.content_type.clone(),
                    etag: Some(o.etag.clone()),
                    last_modified: Some(o.last_modified),
                })
                .ok_or_else(|| StorageError::NotFound(key.to_string()))
        })
    }

    async fn copy_object(&self, source: &ObjectRef, dest: &ObjectRef) -> StorageResult<()> {
        let object = self.with_bucket_mut(&source.bucket, |b| {
            b.objects
                .get(&source.key)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(source.key.clone()))
        })?;
        self.with_bucket_mut(&dest.bucket, |b| {
            b.objects.insert(dest.key.clone(), object);
            Ok(())
        })
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        _options: RemoveOptions,
    ) -> StorageResult<()> {
        self.with_bucket_mut(bucket, |b| {
            b.objects.remove(key);
            Ok(())
        })
    }

    async fn abort_incomplete_uploads(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.with_bucket_mut(bucket, |b| {
            b.uploads.retain(|u| u.key != key);
            Ok(())
        })
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        query: &ListQuery,
        cursor: Option<Continuation>,
    ) -> StorageResult<ListPage<ObjectInfo>> {
        self.maybe_stall(&cursor).await;
        let items = self.with_bucket_mut(bucket, |b| {
            Ok(b.objects
                .iter()
                .filter(|(k, _)| k.starts_with(&query.prefix))
                .filter(|(k, _)| query.recursive || !k[query.prefix.len()..].contains('/'))
                .map(|(k, o)| ObjectInfo {
                    key: k.clone(),
                    size: o.data.len() as u64,
                    content_type: o.content_type.clone(),
                    etag: Some(o.etag.clone()),
                    last_modified: Some(o.last_modified),
                })
                .collect::<Vec<_>>())
        })?;
        Ok(self.page(items, cursor))
    }

    async fn list_incomplete_uploads_page(
        &self,
        bucket: &str,
        query: &ListQuery,
        cursor: Option<Continuation>,
    ) -> StorageResult<ListPage<IncompleteUpload>> {
        self.maybe_stall(&cursor).await;
        let items = self.with_bucket_mut(bucket, |b| {
            Ok(b.uploads
                .iter()
                .filter(|u| u.key.starts_with(&query.prefix))
                .cloned()
                .collect::<Vec<_>>())
        })?;
        Ok(self.page(items, cursor))
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<PresignedUrl> {
        self.presign_calls.fetch_add(1, Ordering::SeqCst);
        let url = url::Url::parse(&format!(
            "memory://{}/{}?X-Amz-Expires={}",
            bucket,
            key,
            expires_in.as_secs()
        ))
        .map_err(|e| StorageError::Configuration(e.to_string()))?;

        Ok(PresignedUrl {
            key: key.to_string(),
            url,
            expires_in,
            issued_at: Utc::now(),
        })
    }
}

/// Resolves `memory://` presigned URLs against a [`MemoryObjectStore`].
pub struct MemoryResolver {
    pub store: Arc<MemoryObjectStore>,
    pub resolved: AtomicUsize,
}

impl MemoryResolver {
    pub fn new(store: Arc<MemoryObjectStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            resolved: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl UrlResolver for MemoryResolver {
    async fn resolve(&self, url: &PresignedUrl) -> StorageResult<ObjectBody> {
        self.resolved.fetch_add(1, Ordering::SeqCst);
        let bucket = url
            .url
            .host_str()
            .ok_or_else(|| StorageError::Validation("presigned URL without bucket".into()))?;
        let key = url.url.path().trim_start_matches('/');
        self.store.get_object(bucket, key).await
    }
}

pub fn gateway(store: &Arc<MemoryObjectStore>) -> Gateway {
    Gateway::new(store.clone(), "us-east-1").with_default_bucket(BUCKET)
}

pub fn test_config(staging: &TempDir) -> AppConfig {
    AppConfig {
        staging_dir: staging.path().to_path_buf(),
        max_multipart_size: 4096,
        jwt_secret: JWT_SECRET.to_string(),
        ..AppConfig::development()
    }
}

pub struct TestApp {
    pub app: axum::Router,
    pub store: Arc<MemoryObjectStore>,
    pub resolver: Arc<MemoryResolver>,
    pub staging: TempDir,
}

impl TestApp {
    pub fn new(store: Arc<MemoryObjectStore>) -> Self {
        let staging = tempfile::tempdir().unwrap();
        let resolver = MemoryResolver::new(store.clone());
        let state = AppState::new(
            gateway(&store),
            resolver.clone(),
            Arc::new(InMemoryModuleRepository::new()),
            test_config(&staging),
        );

        Self {
            app: create_app(state),
            store,
            resolver,
            staging,
        }
    }

    pub fn staging_entries(&self) -> usize {
        std::fs::read_dir(self.staging.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

pub fn token() -> String {
    create_jwt(Uuid::new_v4(), Uuid::new_v4(), JWT_SECRET).unwrap()
}

pub const BOUNDARY: &str = "----module-backend-test-boundary";

/// Builds a multipart body with text `fields` and one optional file part.
pub fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((field, filename, data)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_request(method: &str, uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {}", token()))
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header("Content-Length", body.len())
        .body(Body::from(body))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("Authorization", format!("Bearer {}", token()))
        .body(Body::empty())
        .unwrap()
}
