//! S3-compatible storage backend using AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, KeyStream, ObjectMeta, ObjectStore, StreamingUpload};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::future::ProvideCredentials as ProvideCredentialsFuture;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// Minimum part size for S3 multipart uploads (5 MiB).
/// Every part except the last must be at least this large.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Markers embedded in credential errors so they surface as config errors
/// instead of opaque transport failures.
const CREDENTIALS_INIT_ERROR_MARKER: &str = "cadence-s3-lazy-credentials-init";
const CREDENTIALS_RESOLVE_ERROR_MARKER: &str = "cadence-s3-lazy-credentials-resolve";

/// Defers building the AWS default credentials chain until the first
/// signed request, so constructing a backend has no network or TLS side
/// effects.
#[derive(Debug)]
struct LazyDefaultCredentialsProvider {
    region: String,
    chain: OnceCell<aws_config::default_provider::credentials::DefaultCredentialsChain>,
}

impl LazyDefaultCredentialsProvider {
    fn new(region: String) -> Self {
        Self {
            region,
            chain: OnceCell::new(),
        }
    }

    async fn chain(
        &self,
    ) -> Result<&aws_config::default_provider::credentials::DefaultCredentialsChain, CredentialsError>
    {
        self.chain
            .get_or_try_init(|| async {
                let region = aws_config::Region::new(self.region.clone());
                tokio::task::spawn(async move {
                    aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                        .region(region)
                        .build()
                        .await
                })
                .await
                .map_err(|join_err| {
                    CredentialsError::provider_error(format!(
                        "{CREDENTIALS_INIT_ERROR_MARKER}: failed to initialize AWS default credential chain: {join_err}"
                    ))
                })
            })
            .await
    }

    async fn credentials(&self) -> aws_credential_types::provider::Result {
        let chain = self.chain().await?;
        chain.provide_credentials().await.map_err(|err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_RESOLVE_ERROR_MARKER}: default AWS credentials resolution failed: {err}"
            ))
        })
    }
}

impl ProvideCredentials for LazyDefaultCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> ProvideCredentialsFuture<'a>
    where
        Self: 'a,
    {
        ProvideCredentialsFuture::new(self.credentials())
    }
}

fn map_s3_operation_error<E>(err: SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let err_text = err.to_string();
    if err_text.contains(CREDENTIALS_INIT_ERROR_MARKER)
        || err_text.contains(CREDENTIALS_RESOLVE_ERROR_MARKER)
    {
        return StorageError::Config(
            "S3 credential initialization failed. Configure credentials explicitly or provide ambient AWS credentials."
                .to_string(),
        );
    }

    StorageError::S3(Box::new(err))
}

fn is_not_found<E>(err: &SdkError<E>) -> bool {
    matches!(err, SdkError::ServiceError(service_err) if service_err.raw().status().as_u16() == 404)
}

/// S3-compatible object store.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// `force_path_style` selects `endpoint/bucket/key` addressing, which
    /// MinIO and several other S3-compatible services need.
    pub async fn new(
        bucket: &str,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        let resolved_region = region.unwrap_or_else(|| "us-east-1".to_string());
        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()))
            .force_path_style(force_path_style);

        builder = match (access_key_id, secret_access_key) {
            (Some(key_id), Some(secret)) => builder.credentials_provider(
                aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "cadence-config"),
            ),
            (None, None) => builder
                .credentials_provider(LazyDefaultCredentialsProvider::new(resolved_region)),
            _ => {
                return Err(StorageError::Config(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ));
            }
        };

        if let Some(endpoint_url) = endpoint.as_deref().map(normalize_endpoint) {
            // Plain-HTTP endpoints (local MinIO) get an HTTP-only client so no
            // native trust roots are required.
            if endpoint_url.starts_with("http://") {
                builder = builder.http_client(SmithyHttpClientBuilder::new().build_http());
            }
            builder = builder.endpoint_url(endpoint_url);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.to_string(),
            prefix: prefix
                .map(|p| p.trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty()),
        })
    }

    /// Get the full object key for a key (applies prefix if configured).
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, key),
            None => key.to_string(),
        }
    }

    /// Strip the configured prefix from a full object key.
    fn strip_prefix(&self, full_key: &str) -> String {
        strip_configured_prefix(self.prefix.as_deref(), full_key)
    }

    /// Convert an SDK error to StorageError, mapping 404 to NotFound.
    fn map_sdk_error<E>(err: SdkError<E>, key: &str) -> StorageError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if is_not_found(&err) {
            return StorageError::NotFound(key.to_string());
        }
        map_s3_operation_error(err)
    }

    /// Issue a GetObject, optionally restricted to `[start, end)`.
    async fn get_object(
        &self,
        key: &str,
        range: Option<(u64, u64)>,
    ) -> StorageResult<aws_sdk_s3::operation::get_object::GetObjectOutput> {
        let mut request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key));
        if let Some((start, end)) = range {
            // HTTP ranges are inclusive.
            request = request.range(format!("bytes={}-{}", start, end - 1));
        }
        request
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    let lower = endpoint.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

fn strip_configured_prefix(prefix: Option<&str>, full_key: &str) -> String {
    match prefix {
        Some(prefix) => full_key
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(full_key)
            .to_string(),
        None => full_key.to_string(),
    }
}

fn empty_stream() -> ByteStream {
    Box::pin(futures::stream::empty())
}

#[async_trait]
impl ObjectStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(map_s3_operation_error(err)),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        let last_modified = output.last_modified().and_then(|dt| {
            time::OffsetDateTime::from_unix_timestamp(dt.secs())
                .inspect_err(|e| {
                    tracing::warn!(
                        key = %key,
                        timestamp = dt.secs(),
                        error = %e,
                        "Unrepresentable S3 timestamp; object will be treated as recent"
                    );
                })
                .ok()
        });

        Ok(ObjectMeta {
            size: output.content_length().unwrap_or(0).max(0) as u64,
            last_modified,
            content_type: output.content_type().map(|s| s.to_string()),
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let output = self.get_object(key, None).await?;
        Ok(output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?
            .into_bytes())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get_range_stream(
        &self,
        key: &str,
        start: u64,
        end: u64,
    ) -> StorageResult<ByteStream> {
        if end < start {
            return Err(StorageError::InvalidRange(format!(
                "end ({}) < start ({})",
                end, start
            )));
        }
        if end == start {
            return Ok(empty_stream());
        }

        let output = self.get_object(key, Some((start, end))).await?;
        let stream =
            ReaderStream::new(output.body.into_async_read()).map(|r| r.map_err(StorageError::Io));
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .body(data.into())
            .send()
            .await
            .map_err(map_s3_operation_error)?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        let full_key = self.full_key(key);
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::Config("S3 did not return upload_id".to_string()))?
            .to_string();

        Ok(Box::new(S3Upload {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: full_key,
            upload_id,
            parts: Vec::new(),
            buffer: BytesMut::with_capacity(MIN_PART_SIZE),
            bytes_written: 0,
            settled: false,
        }))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        // DeleteObject succeeds on missing keys; probe first to report NotFound.
        if !self.exists(key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(map_s3_operation_error)?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        use futures::TryStreamExt;

        self.list_stream(prefix).await?.try_collect().await
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list_stream(&self, prefix: &str) -> StorageResult<KeyStream> {
        let full_prefix = self.full_key(prefix);
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let configured_prefix = self.prefix.clone();

        let stream = async_stream::try_stream! {
            let mut continuation_token: Option<String> = None;

            loop {
                let output = client
                    .list_objects_v2()
                    .bucket(&bucket)
                    .prefix(&full_prefix)
                    .set_continuation_token(continuation_token.take())
                    .send()
                    .await
                    .map_err(map_s3_operation_error)?;

                for obj_key in output.contents().iter().filter_map(|obj| obj.key()) {
                    yield strip_configured_prefix(configured_prefix.as_deref(), obj_key);
                }

                match output.next_continuation_token() {
                    Some(token) if output.is_truncated() == Some(true) => {
                        continuation_token = Some(token.to_string());
                    }
                    _ => break,
                }
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        // CopySource is `bucket/key` with the key percent-encoded.
        let encoded_key = utf8_percent_encode(&self.full_key(from), NON_ALPHANUMERIC).to_string();
        let copy_source = format!("{}/{}", self.bucket, encoded_key);

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(self.full_key(to))
            .copy_source(&copy_source)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, from))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        let marker_key = self.full_key(".cadence-health-check");

        let probe = async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&marker_key)
                .body(Bytes::from_static(b"health-check").into())
                .send()
                .await
                .map_err(map_s3_operation_error)?;

            match self
                .client
                .delete_object()
                .bucket(&self.bucket)
                .key(&marker_key)
                .send()
                .await
            {
                Ok(_) => Ok(()),
                Err(e) if is_not_found(&e) => Ok(()),
                Err(e) => Err(map_s3_operation_error(e)),
            }
        };

        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, probe)
            .await
            .map_err(|_| {
                StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "S3 health check timed out after 10 seconds",
                ))
            })?
    }
}

/// Multipart upload that flushes a part whenever `MIN_PART_SIZE` bytes are
/// buffered, so memory stays bounded by one part plus one incoming chunk.
struct S3Upload {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    parts: Vec<CompletedPart>,
    buffer: BytesMut,
    bytes_written: u64,
    settled: bool,
}

impl S3Upload {
    async fn upload_part(&mut self, data: Bytes) -> StorageResult<()> {
        let part_number = self.parts.len() as i32 + 1;
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(part_number)
            .body(data.into())
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        self.parts.push(
            CompletedPart::builder()
                .e_tag(output.e_tag().unwrap_or_default())
                .part_number(part_number)
                .build(),
        );
        Ok(())
    }

    async fn abort_multipart(&self) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .send()
            .await
            .map_err(map_s3_operation_error)?;
        Ok(())
    }
}

#[async_trait]
impl StreamingUpload for S3Upload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.bytes_written += data.len() as u64;
        self.buffer.extend_from_slice(&data);

        while self.buffer.len() >= MIN_PART_SIZE {
            let part = self.buffer.split_to(MIN_PART_SIZE).freeze();
            self.upload_part(part).await?;
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        if !self.buffer.is_empty() {
            let last = self.buffer.split().freeze();
            self.upload_part(last).await?;
        }

        // Multipart uploads need at least one non-empty part; fall back to
        // PutObject for empty objects.
        if self.parts.is_empty() {
            if let Err(e) = self.abort_multipart().await {
                tracing::warn!(key = %self.key, error = %e, "Failed to abort empty multipart upload");
            }
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .body(Bytes::new().into())
                .send()
                .await
                .map_err(map_s3_operation_error)?;
            self.settled = true;
            return Ok(self.bytes_written);
        }

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(std::mem::take(&mut self.parts)))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        self.settled = true;
        Ok(self.bytes_written)
    }

    async fn abort(mut self: Box<Self>) -> StorageResult<()> {
        self.settled = true;
        self.abort_multipart().await
    }
}

impl Drop for S3Upload {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        // Dropped mid-upload: abort in the background so parts are not billed.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let client = self.client.clone();
            let bucket = self.bucket.clone();
            let key = self.key.clone();
            let upload_id = self.upload_id.clone();
            handle.spawn(async move {
                if let Err(e) = client
                    .abort_multipart_upload()
                    .bucket(&bucket)
                    .key(&key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    tracing::warn!(key = %key, error = %e, "Failed to abort dropped multipart upload");
                }
            });
        }
    }
}
