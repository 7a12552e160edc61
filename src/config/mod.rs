use crate::services::storage::StorageError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Connection settings for the S3-compatible store
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Host and optional port, or a full URL (`MINIO_ENDPOINT`)
    pub endpoint: String,

    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,

    /// Default: "us-east-1"
    pub region: String,

    /// Use https when the endpoint carries no scheme (default: false)
    pub secure: bool,

    /// Path-style addressing; false selects virtual-host style (default: true)
    pub force_path_style: bool,
}

impl StorageConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, StorageError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, StorageError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| StorageError::Configuration(format!("{} must be set", key)))
        };

        Ok(Self {
            endpoint: required("MINIO_ENDPOINT")?,
            bucket: required("MINIO_BUCKET")?,
            access_key: required("MINIO_ACCESS_KEY")?,
            secret_key: required("MINIO_SECRET_KEY")?,
            session_token: lookup("MINIO_SESSION_TOKEN").filter(|v| !v.is_empty()),
            region: lookup("MINIO_REGION")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "us-east-1".to_string()),
            secure: lookup("MINIO_SECURE")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            force_path_style: lookup("MINIO_PATH_STYLE")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),
        })
    }

    /// Endpoint as a URL; the secure flag picks the scheme when none is given.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            self.endpoint.clone()
        } else {
            let scheme = if self.secure { "https" } else { "http" };
            format!("{}://{}", scheme, self.endpoint)
        }
    }
}

fn parse_flag(v: &str) -> bool {
    matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

/// Application settings outside the store connection
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Largest accepted multipart body in bytes (default: 64 MB)
    pub max_multipart_size: u64,

    /// Where uploads are staged before publishing
    pub staging_dir: PathBuf,

    /// Key prefix for module files (default: "modules/files")
    pub module_folder: String,

    /// Lifetime of download URLs (default: 900 s)
    pub presign_ttl: Duration,

    /// Deadline for one request's store operations (default: 300 s)
    pub operation_timeout: Duration,

    /// Chunk size when relaying downloads (default: 64 KB)
    pub relay_buffer_size: usize,

    pub jwt_secret: String,

    pub allowed_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_multipart_size: 64 * 1024 * 1024, // 64 MB
            staging_dir: env::temp_dir().join("module-staging"),
            module_folder: "modules/files".to_string(),
            presign_ttl: Duration::from_secs(900),
            operation_timeout: Duration::from_secs(300),
            relay_buffer_size: 64 * 1024, // 64 KB
            jwt_secret: "secret".to_string(),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();

        Self {
            max_multipart_size: lookup("MAX_MULTIPART_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_multipart_size),

            staging_dir: lookup("STAGING_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(default.staging_dir),

            module_folder: lookup("MODULE_FOLDER")
                .map(|v| v.trim_matches('/').to_string())
                .unwrap_or(default.module_folder),

            presign_ttl: lookup("PRESIGN_TTL_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(default.presign_ttl),

            operation_timeout: lookup("OPERATION_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(default.operation_timeout),

            relay_buffer_size: lookup("RELAY_BUFFER_SIZE")
                .and_then(|v| v.parse().ok())
                .filter(|size| *size > 0)
                .unwrap_or(default.relay_buffer_size),

            jwt_secret: lookup("JWT_SECRET").unwrap_or(default.jwt_secret),

            allowed_origins: lookup("ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(default.allowed_origins),
        }
    }

    /// Create config for development (small limits, short deadlines)
    pub fn development() -> Self {
        Self {
            max_multipart_size: 16 * 1024 * 1024,
            operation_timeout: Duration::from_secs(30),
            presign_ttl: Duration::from_secs(300),
            ..Self::default()
        }
    }
}
