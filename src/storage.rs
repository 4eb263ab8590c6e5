//! Object storage operations used by the publisher and the promoter.
//!
//! Every write is public-read: the bucket serves installers and update feeds
//! straight to end users.

use async_trait::async_trait;
use eyre::{
    Result,
    WrapErr,
};
use tracing::instrument;

#[allow(unused_imports)]
use tracing::{
    debug,
    error,
    info,
    warn,
};

use crate::{
    config::{
        DeployConfig,
        S3Config,
    },
    error::DeployError,
    namespacing::s3_url,
};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket_name(&self) -> &str;

    /// creates or overwrites `key`
    async fn put_object(&self, key: &str, content: &[u8]) -> Result<()>;

    /// removes `key`; a key that does not exist is not an error
    async fn delete_object(&self, key: &str) -> Result<()>;

    /// server-side copy of `from_key` onto `to_key`, overwriting it
    async fn copy_object(&self, from_key: &str, to_key: &str) -> Result<()>;
}

fn ensure_success(operation: &str, key: &str, status: u16, body: &[u8]) -> Result<()> {
    if DeployError::is_success_status(status) {
        return Ok(());
    }
    Err(DeployError::remote(
        format!("{operation} [{key}]"),
        Some(status),
        String::from_utf8_lossy(body).to_string(),
    )
    .into())
}

fn remote_error(operation: &str, key: &str, e: s3::error::S3Error) -> eyre::Report {
    let status = match &e {
        s3::error::S3Error::Http(code, _) => Some(*code),
        _ => None,
    };
    DeployError::remote(format!("{operation} [{key}]"), status, e.to_string()).into()
}

/// `rust-s3` bucket with the public-read acl header on every request
#[derive(Debug)]
pub struct S3Store {
    config: S3Config,
    bucket: s3::Bucket,
}

impl S3Store {
    pub fn new(config: S3Config) -> Result<Self> {
        let bucket = config.bucket().wrap_err("connecting to bucket")?;
        Ok(Self { config, bucket })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn bucket_name(&self) -> &str {
        &self.config.bucket_name
    }

    #[instrument(skip(self, content), fields(bytes = content.len()))]
    async fn put_object(&self, key: &str, content: &[u8]) -> Result<()> {
        let response = self
            .bucket
            .put_object(key, content)
            .await
            .map_err(|e| remote_error("upload", key, e))?;
        ensure_success("upload", key, response.status_code(), response.bytes())?;
        info!("SUCCESS :: new asset available under [{}]", s3_url(&self.config, key));
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, key: &str) -> Result<()> {
        let response = self
            .bucket
            .delete_object(key)
            .await
            .map_err(|e| remote_error("delete", key, e))?;
        // deleting a missing key answers 204 like any other delete
        ensure_success("delete", key, response.status_code(), response.bytes())
    }

    #[instrument(skip(self))]
    async fn copy_object(&self, from_key: &str, to_key: &str) -> Result<()> {
        let status = self
            .bucket
            .copy_object_internal(from_key, to_key)
            .await
            .map_err(|e| remote_error("copy", from_key, e))?;
        ensure_success("copy", from_key, status, &[])
    }
}

/// logs what would happen, touches nothing
#[derive(Debug, Clone)]
pub struct DryRunStore {
    bucket_name: String,
}

impl DryRunStore {
    pub fn new(bucket_name: impl Into<String>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for DryRunStore {
    fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    async fn put_object(&self, key: &str, content: &[u8]) -> Result<()> {
        info!(
            "[dry run] put_object :: {}/{key} ({} bytes, public-read)",
            self.bucket_name,
            content.len()
        );
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        info!("[dry run] delete_object :: {}/{key}", self.bucket_name);
        Ok(())
    }

    async fn copy_object(&self, from_key: &str, to_key: &str) -> Result<()> {
        info!(
            "[dry run] copy_object :: {0}/{from_key} -> {0}/{to_key} (public-read)",
            self.bucket_name
        );
        Ok(())
    }
}

/// the store every storage subcommand talks to
pub fn connect(config: &DeployConfig, bucket_name: Option<String>) -> Result<Box<dyn ObjectStore>> {
    if config.dry_run {
        let bucket_name = bucket_name.unwrap_or_else(|| "<bucket>".to_string());
        warn!("dry run :: nothing will be written to {bucket_name}");
        return Ok(Box::new(DryRunStore::new(bucket_name)));
    }
    let s3_config = S3Config::try_from_env(bucket_name).wrap_err("getting s3 config from env")?;
    debug!(?s3_config);
    Ok(Box::new(S3Store::new(s3_config)?))
}
