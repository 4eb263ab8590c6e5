//! Internal-testing distribution through the HockeyApp v2 api.
//!
//! Uploading is two requests: register the version metadata, which returns a
//! server-assigned id, then upload the archive against that id.

use async_trait::async_trait;
use eyre::{
    Result,
    WrapErr,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    io::Write,
    path::{
        Path,
        PathBuf,
    },
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
    discovery::{
        locate,
        locate_top_level,
        FoundFile,
    },
    error::DeployError,
    namespacing::SETUP_EXE_SUFFIX,
    version::{
        Platform,
        SemverParts,
    },
};

pub const HOCKEY_API_URL: &str = "https://rink.hockeyapp.net/api/2/apps";
pub const DEFAULT_NOTES: &str = "Jenkins Build";
const TOKEN_HEADER: &str = "X-HockeyAppToken";
/// multipart part carrying the archive
const BINARY_PART: &str = "ipa";

/// metadata sent with both requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionMetadata {
    pub bundle_short_version: String,
    pub bundle_version: String,
    pub notes: String,
    /// 0: don't notify testers
    pub notify: u8,
    /// 2: available for download
    pub status: u8,
}

impl VersionMetadata {
    pub fn from_version(version: &str) -> Result<Self> {
        let SemverParts {
            bundle_short_version,
            bundle_version,
        } = SemverParts::parse(version)?;
        Ok(Self {
            bundle_short_version,
            bundle_version,
            notes: DEFAULT_NOTES.to_string(),
            notify: 0,
            status: 2,
        })
    }

    fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("bundle_short_version", self.bundle_short_version.clone()),
            ("bundle_version", self.bundle_version.clone()),
            ("notes", self.notes.clone()),
            ("notify", self.notify.to_string()),
            ("status", self.status.to_string()),
        ]
    }
}

/// installer that gets distributed for each platform
pub fn distribution_suffix(platform: Platform) -> &'static str {
    match platform {
        Platform::Linux => ".deb",
        Platform::Windows => SETUP_EXE_SUFFIX,
        Platform::MacOs => ".pkg",
    }
}

/// The installer to distribute. The linux `.deb` is looked up next to the
/// build only, the debian pool below it holds a copy of the same file.
pub fn locate_installer<T: AsRef<Path>>(base_path: T, platform: Platform, strict: bool) -> Result<FoundFile> {
    let suffix = distribution_suffix(platform);
    match platform {
        Platform::Linux => locate_top_level(base_path, suffix, strict),
        Platform::Windows | Platform::MacOs => locate(base_path, suffix, strict),
    }
}

#[async_trait]
pub trait DistributionApi: Send + Sync {
    /// registers a version and returns its server-assigned id
    async fn create_version(&self, metadata: &VersionMetadata) -> Result<String>;

    async fn upload_binary(&self, version_id: &str, metadata: &VersionMetadata, file: &Path) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct CreatedVersion {
    id: serde_json::Value,
}

impl CreatedVersion {
    fn id(&self) -> Option<String> {
        match &self.id {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HockeyClient {
    http: reqwest::Client,
    base_url: String,
    app_id: String,
    token: String,
}

impl HockeyClient {
    pub fn new(app_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_base_url(HOCKEY_API_URL, app_id, token)
    }

    pub fn with_base_url(base_url: impl Into<String>, app_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            app_id: app_id.into(),
            token: token.into(),
        }
    }

    pub fn versions_url(&self) -> String {
        format!("{}/{}/app_versions", self.base_url, self.app_id)
    }

    /// `POST .../app_versions/new`, metadata as an urlencoded form
    pub fn create_version_request(&self, metadata: &VersionMetadata) -> Result<reqwest::Request> {
        self.http
            .post(format!("{}/new", self.versions_url()))
            .header(TOKEN_HEADER, &self.token)
            .form(&metadata.form_fields())
            .build()
            .wrap_err("building version registration")
    }

    /// `PUT .../app_versions/{id}`, metadata plus the archive as multipart
    pub fn upload_binary_request(
        &self,
        version_id: &str,
        metadata: &VersionMetadata,
        file_name: String,
        content: Vec<u8>,
    ) -> Result<reqwest::Request> {
        let form = metadata
            .form_fields()
            .into_iter()
            .fold(reqwest::multipart::Form::new(), |form, (name, value)| form.text(name, value))
            .part(BINARY_PART, reqwest::multipart::Part::bytes(content).file_name(file_name));
        self.http
            .put(format!("{}/{version_id}", self.versions_url()))
            .header(TOKEN_HEADER, &self.token)
            .multipart(form)
            .build()
            .wrap_err("building binary upload")
    }
}

async fn failure(operation: &str, response: reqwest::Response) -> eyre::Report {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    DeployError::remote(operation, Some(status), body).into()
}

#[async_trait]
impl DistributionApi for HockeyClient {
    #[instrument(skip(self))]
    async fn create_version(&self, metadata: &VersionMetadata) -> Result<String> {
        let request = self.create_version_request(metadata)?;
        let response = self
            .http
            .execute(request)
            .await
            .wrap_err("sending version registration")?;
        if !response.status().is_success() {
            return Err(failure("registering version", response).await);
        }
        let created: CreatedVersion = response
            .json()
            .await
            .wrap_err("reading version registration response")?;
        created.id().ok_or_else(|| {
            DeployError::remote("registering version", None, format!("no id in response :: {:?}", created.id))
                .into()
        })
    }

    #[instrument(skip(self, metadata), fields(file = %file.display()))]
    async fn upload_binary(&self, version_id: &str, metadata: &VersionMetadata, file: &Path) -> Result<()> {
        let content = tokio::fs::read(file)
            .await
            .wrap_err(format!("reading {}", file.display()))?;
        let file_name = file
            .file_name()
            .ok_or_else(|| eyre::eyre!("this is a directory"))?
            .to_string_lossy()
            .to_string();
        let request = self.upload_binary_request(version_id, metadata, file_name, content)?;
        let response = self
            .http
            .execute(request)
            .await
            .wrap_err("sending binary upload")?;
        if !response.status().is_success() {
            return Err(failure("uploading binary", response).await);
        }
        Ok(())
    }
}

/// logs both requests, makes none
#[derive(Debug, Clone, Default)]
pub struct DryRunDistribution;

#[async_trait]
impl DistributionApi for DryRunDistribution {
    async fn create_version(&self, metadata: &VersionMetadata) -> Result<String> {
        info!("[dry run] create_version :: {metadata:?}");
        Ok("0".to_string())
    }

    async fn upload_binary(&self, version_id: &str, metadata: &VersionMetadata, file: &Path) -> Result<()> {
        info!(
            "[dry run] upload_binary :: version {version_id}, {} ({metadata:?})",
            file.display()
        );
        Ok(())
    }
}

/// file handed to the upload; `temporary` ones are removed after success
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    pub path: PathBuf,
    pub temporary: bool,
}

/// Zips `path` into `<path without extension>.zip`, next to it. A file that
/// already is a zip is used as is.
#[instrument(skip(path), fields(path = %path.as_ref().display()))]
pub fn compress<T: AsRef<Path>>(path: T) -> Result<Archive> {
    let path = path.as_ref();
    let is_zip = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false);
    if is_zip {
        return Ok(Archive {
            path: path.to_path_buf(),
            temporary: false,
        });
    }
    let file_name = path
        .file_name()
        .ok_or_else(|| eyre::eyre!("this is a directory"))?
        .to_string_lossy()
        .to_string();
    let zip_path = path.with_extension("zip");
    info!("compressing \"{}\" ...", path.display());

    let mut source = std::fs::File::open(path).wrap_err(format!("opening {}", path.display()))?;
    let target = std::fs::File::create(&zip_path).wrap_err(format!("creating {}", zip_path.display()))?;
    let mut writer = zip::ZipWriter::new(target);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(Some(9));
    writer
        .start_file(file_name.as_str(), options)
        .wrap_err("starting zip entry")?;
    std::io::copy(&mut source, &mut writer).wrap_err("compressing")?;
    writer.finish().wrap_err("finishing zip")?.flush()?;
    Ok(Archive {
        path: zip_path,
        temporary: true,
    })
}

/// Registers, uploads and cleans up. A failed registration stops before the
/// upload; a failed upload keeps the archive on disk for a manual retry.
pub async fn distribute(
    api: &dyn DistributionApi,
    metadata: &VersionMetadata,
    archive: &Archive,
) -> Result<String> {
    info!(
        "creating app version \"{}\" ...",
        metadata.bundle_short_version
    );
    let version_id = api
        .create_version(metadata)
        .await
        .wrap_err("registering version")?;
    info!("received version \"{version_id}\", uploading \"{}\" ...", archive.path.display());

    if let Err(e) = api.upload_binary(&version_id, metadata, &archive.path).await {
        error!(
            "upload of version \"{version_id}\" failed, keeping {} :: {e:?}",
            archive.path.display()
        );
        return Err(e.wrap_err(format!("uploading version {version_id}")));
    }
    if archive.temporary {
        std::fs::remove_file(&archive.path)
            .wrap_err(format!("removing {}", archive.path.display()))?;
    }
    info!("version \"{version_id}\" uploaded");
    Ok(version_id)
}
