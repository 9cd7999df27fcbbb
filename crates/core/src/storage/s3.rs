//! S3 / MinIO object store.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{http::HttpResponse, Credentials, Region},
    error::{DisplayErrorContext, SdkError},
    primitives::ByteStream,
    Client,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::StorageError;
use super::traits::{ObjectInfo, ObjectStore};

/// Metadata key holding the content checksum.
const CHECKSUM_METADATA_KEY: &str = "sha256";

/// S3/MinIO configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Bucket name
    pub bucket: String,

    /// Region (e.g., "eu-west-1"), any value for MinIO
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint for MinIO; unset for AWS S3
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Access key ID
    #[serde(default)]
    pub access_key_id: String,

    /// Secret access key
    #[serde(default)]
    pub secret_access_key: String,

    /// Prefix prepended to every key (e.g., "avatars/")
    #[serde(default)]
    pub prefix: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Object store backed by an S3-compatible service.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3ObjectStore {
    /// Creates a client from static credentials.
    pub fn new(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "avatar-prep",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .behavior_version_latest();

        if let Some(endpoint) = &config.endpoint {
            // MinIO needs path-style addressing
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

/// Maps SDK errors onto transient/permanent storage errors.
fn classify<E>(err: SdkError<E, HttpResponse>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let transient = matches!(
        err,
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_)
    ) || matches!(status, Some(s) if s == 429 || s >= 500);

    let message = DisplayErrorContext(&err).to_string();
    if transient {
        StorageError::transient(message)
    } else {
        StorageError::failed(message)
    }
}

fn is_not_found<E>(err: &SdkError<E, HttpResponse>) -> bool {
    err.raw_response().map(|r| r.status().as_u16()) == Some(404)
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &str {
        "s3"
    }

    async fn put(&self, key: &str, data: Vec<u8>, checksum: &str) -> Result<(), StorageError> {
        let full_key = self.full_key(key);
        debug!("PUT s3://{}/{} ({} bytes)", self.bucket, full_key, data.len());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .metadata(CHECKSUM_METADATA_KEY, checksum)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(classify)?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let full_key = self.full_key(key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    StorageError::not_found(key)
                } else {
                    classify(e)
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::transient(e.to_string()))?;

        Ok(bytes.into_bytes().to_vec())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>, StorageError> {
        let full_key = self.full_key(key);

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(ObjectInfo {
                size: output.content_length().unwrap_or(0).max(0) as u64,
                checksum: output
                    .metadata()
                    .and_then(|m| m.get(CHECKSUM_METADATA_KEY))
                    .cloned(),
            })),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(classify(e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let full_prefix = self.full_key(prefix);
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(classify)?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .filter_map(|k| k.strip_prefix(&self.prefix))
                    .map(str::to_string),
            );

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        keys.sort();
        Ok(keys)
    }
}
