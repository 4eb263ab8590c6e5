use eyre::{
    Result,
    WrapErr,
};
use std::fmt;

use crate::{
    error::DeployError,
    promoter::PromoteOptions,
};

/// Storage credentials and location, read once from the environment.
#[derive(Clone)]
pub struct S3Config {
    pub bucket_name: String,
    pub region: String,
    /// custom S3-compatible endpoint, e.g. `fra1.digitaloceanspaces.com`
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket_name", &self.bucket_name)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

pub const DEFAULT_S3_REGION: &str = "eu-west-1";

fn env_optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl S3Config {
    /// `bucket_name` comes from the command line (or `BUCKET`), the rest from
    /// `S3_ACCESS_KEY`, `S3_SECRET_KEY`, `S3_REGION` and `S3_ENDPOINT`
    pub fn try_from_env(bucket_name: Option<String>) -> Result<Self> {
        let bucket_name = match bucket_name.filter(|b| !b.trim().is_empty()) {
            Some(bucket) => bucket,
            None => env_required!("BUCKET"),
        };
        let access_key = env_required!("S3_ACCESS_KEY");
        let secret_key = env_required!("S3_SECRET_KEY");
        let region = env_optional("S3_REGION").unwrap_or_else(|| DEFAULT_S3_REGION.to_string());
        Ok(Self {
            bucket_name,
            region,
            endpoint: env_optional("S3_ENDPOINT"),
            access_key,
            secret_key,
        })
    }

    pub fn url_prefix(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("https://{}.{}", self.bucket_name, endpoint),
            None => format!("https://{}.s3.{}.amazonaws.com", self.bucket_name, self.region),
        }
    }

    pub fn bucket(&self) -> Result<s3::Bucket> {
        let credentials = s3::creds::Credentials::new(
            Some(self.access_key.as_str()),
            Some(self.secret_key.as_str()),
            None,
            None,
            None,
        )
        .wrap_err("bad s3 credentials")?;
        let region = match &self.endpoint {
            Some(endpoint) => s3::Region::Custom {
                region: self.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => self
                .region
                .parse()
                .map_err(|e| DeployError::MissingInput(format!("S3_REGION [{}] :: {e}", self.region)))?,
        };
        let mut bucket =
            s3::Bucket::new(self.bucket_name.as_str(), region, credentials).wrap_err("bad bucket")?;
        bucket.add_header("x-amz-acl", "public-read");
        Ok(bucket)
    }
}

/// Process-wide switches, built once from the command line and handed to
/// every operation.
#[derive(Debug, Clone, Default)]
pub struct DeployConfig {
    /// log every remote call instead of making it
    pub dry_run: bool,
    /// fail when a primary artifact lookup matches several files
    pub strict_discovery: bool,
    pub promote: PromoteOptions,
}
