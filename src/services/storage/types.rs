use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Payloads above this size are published as multipart uploads.
pub const MULTIPART_THRESHOLD: u64 = 128 * 1024 * 1024;
/// Largest object the store accepts.
pub const MAX_OBJECT_SIZE: u64 = 5 * 1024 * 1024 * 1024 * 1024;
pub const MAX_MULTIPART_PARTS: u64 = 10_000;

/// Part size for a multipart upload of `size` bytes: at least
/// [`MULTIPART_THRESHOLD`], grown in MiB steps so the part count stays
/// within [`MAX_MULTIPART_PARTS`].
pub fn multipart_part_size(size: u64) -> u64 {
    const MIB: u64 = 1024 * 1024;
    let min_for_count = size.div_ceil(MAX_MULTIPART_PARTS).div_ceil(MIB) * MIB;
    min_for_count.max(MULTIPART_THRESHOLD)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Opaque JSON access-control document. Never parsed here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketPolicy(pub String);

impl BucketPolicy {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompleteUpload {
    pub key: String,
    pub upload_id: String,
    pub initiated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadInfo {
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
}

/// Key plus content type and size of an object, with the local file it is
/// published from or fetched into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescriptor {
    pub key: String,
    pub content_type: String,
    pub size: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Delete objects held under governance-mode retention.
    pub bypass_governance: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub prefix: String,
    pub recursive: bool,
}

impl ListQuery {
    pub fn recursive(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            recursive: true,
        }
    }
}

/// Position in a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    Token(String),
    Markers {
        key: String,
        upload_id: Option<String>,
    },
}

#[derive(Debug)]
pub struct ListPage<T> {
    pub items: Vec<T>,
    pub next: Option<Continuation>,
}

/// Source of a publish: a path read by the store, or an already open handle.
pub enum PutSource {
    Path(PathBuf),
    File(tokio::fs::File),
}

impl fmt::Debug for PutSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PutSource::Path(p) => f.debug_tuple("Path").field(p).finish(),
            PutSource::File(_) => f.write_str("File(..)"),
        }
    }
}

/// Streamed object content.
pub struct ObjectBody {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBody")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Time-boxed, credential-less GET URL for one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUrl {
    pub key: String,
    pub url: url::Url,
    pub expires_in: Duration,
    pub issued_at: DateTime<Utc>,
}

impl PresignedUrl {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at
            + chrono::Duration::from_std(self.expires_in).unwrap_or(chrono::Duration::zero())
    }
}
