//! S3 implementation of the storage client contract.
//!
//! [`S3ClientFactory`] builds one `aws-sdk-s3` client per call from a named
//! AWS profile; the pool in [`crate::pool`] decides how many to keep around.
//! Service error codes are mapped onto [`StorageError`] so the pipeline can
//! tell a missing object from rejected credentials.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::debug;

use crate::config::DEFAULT_PROFILE;
use crate::contract::{ClientFactory, StorageClient, StoredObject};
use crate::error::StorageError;

/// Error codes meaning the credentials themselves are unusable.
const AUTH_ERROR_CODES: &[&str] = &[
    "AccessDenied",
    "AllAccessDisabled",
    "ExpiredToken",
    "InvalidAccessKeyId",
    "InvalidToken",
    "SignatureDoesNotMatch",
];

/// Builds S3 clients from AWS profiles.
#[derive(Debug, Clone, Default)]
pub struct S3ClientFactory {
    /// Optional endpoint override (e.g. LocalStack/MinIO).
    endpoint_url: Option<String>,
}

impl S3ClientFactory {
    pub fn new(endpoint_url: Option<String>) -> Self {
        Self { endpoint_url }
    }
}

#[async_trait]
impl ClientFactory for S3ClientFactory {
    async fn create(&self, profile: &str) -> Result<Box<dyn StorageClient>, StorageError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if profile != DEFAULT_PROFILE {
            loader = loader.profile_name(profile);
        }
        let sdk_config = loader.load().await;

        if sdk_config.region().is_none() {
            return Err(StorageError::InvalidConfig(format!(
                "no AWS region configured for profile '{profile}'"
            )));
        }

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &self.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        debug!(profile, endpoint = ?self.endpoint_url, "[S3] Built client");

        Ok(Box::new(S3Client {
            client: Client::from_conf(builder.build()),
        }))
    }
}

/// Storage client backed by Amazon S3.
#[derive(Debug, Clone)]
pub struct S3Client {
    client: Client,
}

#[async_trait]
impl StorageClient for S3Client {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, key))?;

        let content_type = output.content_type().map(str::to_owned);
        let body = output
            .body
            .collect()
            .await
            .map_err(|err| StorageError::Io(format!("reading {bucket}/{key}: {err}")))?
            .into_bytes()
            .to_vec();

        Ok(StoredObject { body, content_type })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<(), StorageError> {
        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, key))?;
        debug!(bucket, key, etag = ?output.e_tag(), "[S3] Object stored");
        Ok(())
    }
}

fn map_sdk_error<E, R>(err: SdkError<E, R>, bucket: &str, key: &str) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    if let SdkError::ConstructionFailure(_) = &err {
        return StorageError::InvalidConfig(DisplayErrorContext(&err).to_string());
    }
    match err.code() {
        Some("NoSuchKey") | Some("NotFound") => StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        Some(code) if AUTH_ERROR_CODES.contains(&code) => {
            StorageError::Unauthorized(DisplayErrorContext(&err).to_string())
        }
        _ => StorageError::Io(DisplayErrorContext(&err).to_string()),
    }
}
