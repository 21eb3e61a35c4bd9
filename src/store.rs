//! Object store interface.
//!
//! The publisher only ever needs two operations, so the bucket hides behind
//! a narrow seam: an existence check and an upload. The production
//! implementation speaks to S3; tests use an in-memory double.

use crate::config::StoreOpts;
use anyhow::{Context, Result};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use std::future::Future;

/// Metadata attached to every uploaded object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    pub content_type: String,
    pub cache_control: String,
    /// Unix timestamp after which caches should revalidate.
    pub expires: i64,
}

impl ObjectMeta {
    /// Ten-year caching. Versioned names change whenever content changes,
    /// so an uploaded artifact is immutable.
    pub fn immutable(content_type: String) -> Self {
        Self {
            content_type,
            cache_control: format!("public, max-age={}", 10 * 365 * 24 * 60 * 60),
            expires: (time::OffsetDateTime::now_utc() + time::Duration::days(10 * 365))
                .unix_timestamp(),
        }
    }
}

/// Existence checks and uploads against one bucket.
pub trait ObjectStore: Sync {
    /// Whether the given key already exists.
    fn head(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;
    /// Upload a public-read object under the given key.
    fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        meta: &ObjectMeta,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// The S3 implementation used by the CLI.
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    /// Connect using the configured credentials, falling back to the
    /// ambient AWS environment for anything unset.
    pub async fn connect(opts: &StoreOpts) -> Result<Self> {
        let bucket = opts
            .bucket
            .clone()
            .context("no object store bucket configured")?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &opts.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let (Some(access_key), Some(secret_key)) = (&opts.access_key, &opts.secret_key) {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "bale-config",
            ));
        }
        let sdk_config = loader.load().await;

        Ok(Self {
            client: aws_sdk_s3::Client::new(&sdk_config),
            bucket,
        })
    }
}

impl ObjectStore for S3Store {
    async fn head(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .map(|service| service.is_not_found())
                    .unwrap_or(false);
                if !not_found {
                    // Treated as absent: the subsequent PUT will surface a
                    // real connectivity or permission problem.
                    tracing::warn!("HEAD s3://{}/{key} failed: {err}", self.bucket);
                }
                Ok(false)
            }
        }
    }

    async fn put(&self, key: &str, body: Vec<u8>, meta: &ObjectMeta) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(&meta.content_type)
            .cache_control(&meta.cache_control)
            .expires(aws_sdk_s3::primitives::DateTime::from_secs(meta.expires))
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .with_context(|| format!("error uploading s3://{}/{key}", self.bucket))?;
        tracing::debug!("uploaded s3://{}/{key}", self.bucket);
        Ok(())
    }
}
