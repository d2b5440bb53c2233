//! Configuration types shared across crates.

use crate::media::{DEFAULT_ALLOWED_CONTENT_TYPES, MediaType};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Upload acceptance rules.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Largest declared upload size accepted, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Content types accepted for upload. Only `audio/*` entries are valid.
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
}

fn default_max_upload_bytes() -> u64 {
    crate::DEFAULT_MAX_UPLOAD_BYTES
}

fn default_allowed_content_types() -> Vec<String> {
    DEFAULT_ALLOWED_CONTENT_TYPES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            allowed_content_types: default_allowed_content_types(),
        }
    }
}

impl LibraryConfig {
    /// Validate upload rules.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_upload_bytes == 0 {
            return Err("library.max_upload_bytes must be greater than 0".to_string());
        }
        if self.allowed_content_types.is_empty() {
            return Err("library.allowed_content_types cannot be empty".to_string());
        }
        for entry in &self.allowed_content_types {
            let media = MediaType::parse(entry)
                .map_err(|e| format!("library.allowed_content_types: {e}"))?;
            if !media.is_audio() {
                return Err(format!(
                    "library.allowed_content_types: {entry} is not an audio type"
                ));
            }
        }
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to AWS_ACCESS_KEY_ID env var if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to AWS_SECRET_ACCESS_KEY env var if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        secret_access_key: Option<String>,
        /// Force path-style URLs (e.g., `endpoint/bucket/key` instead of `bucket.endpoint/key`).
        /// Required for MinIO and some S3-compatible services.
        /// AWS S3 (including VPC endpoints, FIPS, and dual-stack) requires virtual-hosted style (false).
        /// Defaults to false (virtual-hosted style).
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/blobs"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                access_key_id,
                secret_access_key,
                ..
            } => match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                (Some(_), Some(_)) | (None, None) => Ok(()),
                _ => Err(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ),
            },
            _ => Ok(()),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (recommended for testing and small deployments only).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only - SQLite cannot force-cancel queries).
        /// Logs warnings for queries exceeding this duration.
        /// Unlike PostgreSQL's statement_timeout, this does NOT actually cancel queries.
        /// For production deployments with strict timeout requirements, use PostgreSQL.
        /// Recommended: 600 (10 minutes) for development.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL (optional if using individual fields).
        /// Takes precedence over individual fields if both are provided.
        url: Option<String>,
        /// Database host (e.g., "localhost" or "db.example.com").
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// WARNING: Prefer CADENCE_METADATA__PASSWORD env var over storing in config.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode for connections.
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds (prevents hung queries).
        /// PostgreSQL will cancel queries that exceed this duration.
        /// Recommended: 300000 (5 minutes) for reconciliation sweeps.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(300000) // 5 minutes
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(600) // 10 minutes (advisory only)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/library.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => {
                // Must have either url OR (host + database)
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    // URL provided - valid
                    (Some(_), _, _) => Ok(()),
                    // No URL, but host and database provided - valid
                    (None, Some(_), Some(_)) => Ok(()),
                    // No URL and missing host or database - invalid
                    (None, None, _) => Err(
                        "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                    ),
                    (None, Some(_), None) => Err(
                        "postgres config requires 'database' when using individual fields"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

/// Background reconciliation configuration.
///
/// Reconciliation removes blobs whose deletion was deferred and sweeps
/// storage for blobs no song references.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GcConfig {
    /// Minimum age in seconds before an unreferenced blob may be swept.
    /// Must comfortably exceed the longest expected upload.
    #[serde(default = "default_gc_grace_period_secs")]
    pub grace_period_secs: u64,
    /// Batch size for tombstone processing.
    #[serde(default = "default_gc_batch_size")]
    pub batch_size: u32,
    /// Enable automatic scheduling (disabled by default).
    #[serde(default)]
    pub auto_schedule_enabled: bool,
    /// Interval in seconds between automatic runs (default: 1 hour).
    #[serde(default = "default_gc_auto_schedule_interval_secs")]
    pub auto_schedule_interval_secs: u64,
    /// Which job types to run automatically.
    /// Valid values: "blob_tombstones", "storage_sweep"
    #[serde(default = "default_gc_auto_schedule_jobs")]
    pub auto_schedule_jobs: Vec<String>,
    /// Report what would be deleted without deleting (default: false).
    #[serde(default)]
    pub dry_run: bool,
    /// Upper bound on objects examined by one storage sweep.
    #[serde(default = "default_max_gc_iterations")]
    pub max_gc_iterations: u64,
}

fn default_gc_grace_period_secs() -> u64 {
    3600 // 1 hour
}

fn default_gc_batch_size() -> u32 {
    500
}

fn default_gc_auto_schedule_interval_secs() -> u64 {
    3600 // 1 hour
}

fn default_gc_auto_schedule_jobs() -> Vec<String> {
    // storage_sweep lists the whole bucket; schedule it explicitly.
    vec!["blob_tombstones".to_string()]
}

fn default_max_gc_iterations() -> u64 {
    100_000
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_gc_grace_period_secs(),
            batch_size: default_gc_batch_size(),
            auto_schedule_enabled: false,
            auto_schedule_interval_secs: default_gc_auto_schedule_interval_secs(),
            auto_schedule_jobs: default_gc_auto_schedule_jobs(),
            dry_run: false,
            max_gc_iterations: default_max_gc_iterations(),
        }
    }
}

impl GcConfig {
    /// Get the grace period as a Duration.
    pub fn grace_period(&self) -> Duration {
        Duration::seconds(self.grace_period_secs as i64)
    }

    /// Get the auto schedule interval as a std::time::Duration.
    pub fn auto_schedule_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.auto_schedule_interval_secs)
    }

    /// Validate settings that would misbehave at runtime.
    pub fn validate(&self) -> Result<(), String> {
        if self.grace_period_secs > i64::MAX as u64 {
            return Err(format!(
                "gc.grace_period_secs {} exceeds maximum value {} (would overflow Duration)",
                self.grace_period_secs,
                i64::MAX
            ));
        }

        if self.auto_schedule_enabled && self.auto_schedule_interval_secs == 0 {
            return Err("gc.auto_schedule_interval_secs cannot be 0".to_string());
        }

        if self.batch_size == 0 {
            return Err("gc.batch_size must be greater than 0".to_string());
        }

        for job in &self.auto_schedule_jobs {
            if !matches!(job.as_str(), "blob_tombstones" | "storage_sweep") {
                return Err(format!("gc.auto_schedule_jobs: unknown job type {job:?}"));
            }
        }

        Ok(())
    }
}

/// Complete server configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Blob store configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Upload acceptance rules.
    #[serde(default)]
    pub library: LibraryConfig,
    /// Reconciliation configuration.
    #[serde(default)]
    pub gc: GcConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage and SQLite metadata.
    pub fn for_testing() -> Self {
        Self::default()
    }

    /// Validate every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.metadata.validate()?;
        self.library.validate()?;
        self.gc.validate()?;
        Ok(())
    }
}
