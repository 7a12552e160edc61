use crate::services::content_type;
use crate::services::storage::{
    Gateway, ObjectDescriptor, OperationScope, StorageError, StorageResult,
};
use crate::utils::validation::{MAX_FILENAME_LEN, sanitize_filename, truncate_utf8};
use axum::extract::Multipart;
use axum::extract::multipart::{Field, MultipartError};
use axum::http::StatusCode;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Room left for the filename once the `<uuid>-` prefix is in place.
const STAGING_NAME_LEN: usize = MAX_FILENAME_LEN - 37;

/// Whether the request must carry the file part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePart {
    Required,
    Optional,
}

/// An uploaded file that has reached the object store.
#[derive(Debug, Clone)]
pub struct PublishedObject {
    pub key: String,
    pub content_type: String,
    pub size: u64,
    pub etag: Option<String>,
}

/// A fully read form: its text fields plus the staged file, if any.
///
/// Nothing has been published yet. Dropping the form removes the staged file.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub fields: HashMap<String, String>,
    pub staged: Option<StagingFile>,
}

impl UploadForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Local copy of one uploaded file part.
///
/// Owned by a single pipeline run. The file is removed by [`reclaim`] on the
/// normal path and by `Drop` when the run ends early.
///
/// [`reclaim`]: StagingFile::reclaim
#[derive(Debug)]
pub struct StagingFile {
    path: TempPath,
    pub field_name: String,
    pub original_filename: String,
    filename: String,
}

impl StagingFile {
    /// Creates `<dir>/<uuid>-<filename>`; never reuses an existing path.
    ///
    /// Long names are shortened in the staging path only; [`filename`]
    /// keeps the full sanitized name.
    ///
    /// [`filename`]: StagingFile::filename
    pub async fn create(
        dir: &Path,
        field_name: &str,
        original_filename: &str,
    ) -> StorageResult<(Self, tokio::fs::File)> {
        let filename = sanitize_filename(original_filename)
            .map_err(|e| StorageError::Validation(e.to_string()))?;

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| StorageError::local_io(dir, e))?;

        let path = dir.join(format!(
            "{}-{}",
            Uuid::new_v4(),
            truncate_utf8(&filename, STAGING_NAME_LEN)
        ));
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| StorageError::local_io(&path, e))?;

        tracing::debug!("Staging {} at {}", original_filename, path.display());

        Ok((
            Self {
                path: TempPath::from_path(path),
                field_name: field_name.to_string(),
                original_filename: original_filename.to_string(),
                filename,
            },
            file,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sanitized name used for the published key.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Removes the staged file. Failures are logged, never returned.
    pub fn reclaim(self) {
        let path = self.path.to_path_buf();
        if let Err(e) = self.path.close() {
            tracing::warn!("Failed to reclaim staging file {}: {}", path.display(), e);
        }
    }
}

/// Multipart request → staging file → object store → reclaim.
///
/// [`receive`] reads the whole form to disk; [`publish`] sends the staged
/// file on. Callers check the text fields in between, so a rejected form
/// never reaches the store.
///
/// [`receive`]: UploadPipeline::receive
/// [`publish`]: UploadPipeline::publish
#[derive(Clone)]
pub struct UploadPipeline {
    gateway: Gateway,
    staging_dir: PathBuf,
    folder: String,
    max_size: u64,
}

impl UploadPipeline {
    pub fn new(
        gateway: Gateway,
        staging_dir: impl Into<PathBuf>,
        folder: impl Into<String>,
        max_size: u64,
    ) -> Self {
        Self {
            gateway,
            staging_dir: staging_dir.into(),
            folder: folder.into().trim_matches('/').to_string(),
            max_size,
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Object key a sanitized filename is published under.
    pub fn object_key(&self, filename: &str) -> String {
        if self.folder.is_empty() {
            filename.to_string()
        } else {
            format!("{}/{}", self.folder, filename)
        }
    }

    /// Reads the form and stages its file part.
    ///
    /// `content_length` is the declared request size; when it already
    /// exceeds the limit nothing is read.
    pub async fn receive(
        &self,
        content_length: Option<u64>,
        multipart: &mut Multipart,
        file_field: &str,
        file_part: FilePart,
    ) -> StorageResult<UploadForm> {
        if let Some(len) = content_length.filter(|len| *len > self.max_size) {
            tracing::warn!(
                "Rejecting multipart body of {} bytes (limit {})",
                len,
                self.max_size
            );
            return Err(StorageError::PayloadTooLarge {
                limit: self.max_size,
            });
        }

        let (fields, staged) = self.parse(multipart, file_field).await?;

        if staged.is_none() && file_part == FilePart::Required {
            return Err(StorageError::Validation(format!(
                "Missing required form field '{}'",
                file_field
            )));
        }

        Ok(UploadForm { fields, staged })
    }

    /// Publishes the staged file, if the form has one, and reclaims it.
    pub async fn publish(
        &self,
        scope: &OperationScope,
        mut form: UploadForm,
    ) -> StorageResult<Option<PublishedObject>> {
        let Some(staged) = form.staged.take() else {
            return Ok(None);
        };

        let published = self.publish_staged(scope, &staged).await;
        staged.reclaim();

        published.map(Some)
    }

    async fn parse(
        &self,
        multipart: &mut Multipart,
        file_field: &str,
    ) -> StorageResult<(HashMap<String, String>, Option<StagingFile>)> {
        let mut read: u64 = 0;
        let mut fields = HashMap::new();
        let mut staged: Option<StagingFile> = None;

        while let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|e| self.multipart_error(e))?
        {
            let name = field.name().unwrap_or_default().to_string();

            if name == file_field {
                if staged.is_some() {
                    return Err(StorageError::Validation(format!(
                        "Form field '{}' given more than once",
                        file_field
                    )));
                }
                let original = field.file_name().unwrap_or("unnamed").to_string();

                // An unselected file input arrives as an unnamed, empty part.
                if original.trim().is_empty() {
                    let mut empty = true;
                    while let Some(chunk) =
                        field.chunk().await.map_err(|e| self.multipart_error(e))?
                    {
                        self.charge(&mut read, chunk.len())?;
                        empty &= chunk.is_empty();
                    }
                    if !empty {
                        return Err(StorageError::Validation(format!(
                            "Form field '{}' has no filename",
                            file_field
                        )));
                    }
                    continue;
                }

                let (staging, mut file) =
                    StagingFile::create(&self.staging_dir, &name, &original).await?;

                // `staging` is dropped, and the file removed, on any early return.
                self.copy_field(&mut field, &mut file, &mut read, staging.path())
                    .await?;
                file.flush()
                    .await
                    .map_err(|e| StorageError::local_io(staging.path(), e))?;
                staged = Some(staging);
            } else if !name.is_empty() {
                let mut buf = Vec::new();
                while let Some(chunk) = field.chunk().await.map_err(|e| self.multipart_error(e))? {
                    self.charge(&mut read, chunk.len())?;
                    buf.extend_from_slice(&chunk);
                }
                let text = String::from_utf8(buf).map_err(|_| {
                    StorageError::Validation(format!("Form field '{}' is not valid UTF-8", name))
                })?;
                fields.insert(name, text);
            }
        }

        Ok((fields, staged))
    }

    async fn copy_field(
        &self,
        field: &mut Field<'_>,
        file: &mut tokio::fs::File,
        read: &mut u64,
        path: &Path,
    ) -> StorageResult<()> {
        while let Some(chunk) = field.chunk().await.map_err(|e| self.multipart_error(e))? {
            self.charge(read, chunk.len())?;
            file.write_all(&chunk)
                .await
                .map_err(|e| StorageError::local_io(path, e))?;
        }
        Ok(())
    }

    fn charge(&self, read: &mut u64, len: usize) -> StorageResult<()> {
        *read += len as u64;
        if *read > self.max_size {
            return Err(StorageError::PayloadTooLarge {
                limit: self.max_size,
            });
        }
        Ok(())
    }

    fn multipart_error(&self, e: MultipartError) -> StorageError {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            StorageError::PayloadTooLarge {
                limit: self.max_size,
            }
        } else {
            StorageError::Validation(e.body_text())
        }
    }

    async fn publish_staged(
        &self,
        scope: &OperationScope,
        staged: &StagingFile,
    ) -> StorageResult<PublishedObject> {
        let session = self.gateway.session().with_scope(scope);
        session.ensure_bucket().await?;

        let path = staged.path();
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| StorageError::local_io(path, e))?
            .len();
        let content_type = content_type::sniff_file(path)
            .await
            .map_err(|e| StorageError::local_io(path, e))?;

        let descriptor = ObjectDescriptor {
            key: self.object_key(staged.filename()),
            content_type: content_type.to_string(),
            size,
            path: path.to_path_buf(),
        };

        let info = session.upload_object(&descriptor).await.inspect_err(|e| {
            tracing::error!("Failed to publish {}: {}", descriptor.key, e);
        })?;

        Ok(PublishedObject {
            key: info.key,
            content_type: descriptor.content_type,
            size: info.size,
            etag: info.etag,
        })
    }
}
