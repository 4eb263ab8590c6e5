//! GitHub release drafts with their assets.
//!
//! A draft without all of its assets is useless, so the first failed upload
//! removes the draft again before the error is returned.

use async_trait::async_trait;
use eyre::{
    Result,
    WrapErr,
};
use itertools::Itertools;
use serde::{
    Deserialize,
    Serialize,
};
use std::path::{
    Path,
    PathBuf,
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
    error::DeployError,
    version::Platform,
};

pub const GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_REPO_SLUG: &str = "wireapp/wire-desktop";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DraftRequest {
    pub tag_name: String,
    pub target_commitish: String,
    pub name: String,
    pub body: String,
    pub draft: bool,
    pub prerelease: bool,
}

impl DraftRequest {
    /// tag `<platform>/<version>`, title `<version> - <Platform>`
    pub fn new(platform: Platform, version: &str, commitish: &str, changelog: &str) -> Self {
        Self {
            tag_name: format!("{}/{version}", platform.tag_name()),
            target_commitish: commitish.to_string(),
            name: format!("{version} - {platform}"),
            body: changelog.to_string(),
            draft: true,
            prerelease: false,
        }
    }
}

/// release notes skeleton the release manager fills in before publishing
pub fn changelog_template(platform: Platform, version: &str, date: chrono::NaiveDate) -> String {
    format!(
        "### Release Notes\n\
         <details open>\n<summary><b>Features</b></summary>\n<li>... (#1234)</li>\n</details>\n<br>\n\n\
         <details open>\n<summary><b>Improvements</b></summary>\n<li>... (#1234)</li>\n</details>\n<br>\n\n\
         <details>\n<summary><b>Fixes</b></summary>\n<li>... (#1234)</li>\n</details>\n\n\
         ### Public Release Date\n\n\
         {platform} {date}\n\n\
         ### Changelog\n\n\
         [{platform}](https://github.com/wireapp/wire-desktop/compare/release%2F3.x.xxxx...release%2F{version})\n",
        date = date.format("%Y-%m-%d"),
    )
}

/// the part of GitHub's release object this tool reads
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Draft {
    pub id: u64,
    /// api url of this release, target of the compensating delete
    pub url: String,
    /// RFC 6570 template, e.g. `https://uploads.github.com/.../assets{?name,label}`
    pub upload_url: String,
    #[serde(default)]
    pub html_url: Option<String>,
}

impl Draft {
    pub fn asset_upload_url(&self) -> &str {
        self.upload_url
            .split('{')
            .next()
            .unwrap_or(self.upload_url.as_str())
    }
}

#[async_trait]
pub trait ReleaseApi: Send + Sync {
    async fn create_draft(&self, request: &DraftRequest) -> Result<Draft>;

    async fn upload_asset(&self, draft: &Draft, name: &str, file: &Path) -> Result<()>;

    async fn delete_draft(&self, draft: &Draft) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    repo_slug: String,
    token: String,
}

impl GitHubClient {
    pub fn new(repo_slug: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .wrap_err("building http client")?;
        Ok(Self {
            http,
            api_url: GITHUB_API_URL.to_string(),
            repo_slug: repo_slug.into(),
            token: token.into(),
        })
    }

    pub fn releases_url(&self) -> String {
        format!("{}/repos/{}/releases", self.api_url, self.repo_slug)
    }

    fn authorization(&self) -> String {
        format!("token {}", self.token)
    }

    pub fn create_draft_request(&self, request: &DraftRequest) -> Result<reqwest::Request> {
        self.http
            .post(self.releases_url())
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .json(request)
            .build()
            .wrap_err("building draft creation")
    }

    /// raw bytes against the draft's upload url, asset name in the query
    pub fn upload_asset_request(&self, draft: &Draft, name: &str, content: Vec<u8>) -> Result<reqwest::Request> {
        self.http
            .post(draft.asset_upload_url())
            .query(&[("name", name)])
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .header(reqwest::header::CONTENT_TYPE, "application/binary")
            .body(content)
            .build()
            .wrap_err(format!("building asset upload {name}"))
    }

    pub fn delete_draft_request(&self, draft: &Draft) -> Result<reqwest::Request> {
        self.http
            .delete(&draft.url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .build()
            .wrap_err("building draft deletion")
    }
}

async fn check_status(operation: &str, accepted: &[u16], response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status().as_u16();
    if accepted.contains(&status) {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    error!("error response from GitHub :: {body}");
    Err(DeployError::remote(operation, Some(status), body).into())
}

#[async_trait]
impl ReleaseApi for GitHubClient {
    #[instrument(skip(self, request), fields(tag = %request.tag_name))]
    async fn create_draft(&self, request: &DraftRequest) -> Result<Draft> {
        let response = self
            .http
            .execute(self.create_draft_request(request)?)
            .await
            .wrap_err("sending draft creation")?;
        let response = check_status("creating draft", &[200, 201], response).await?;
        response.json().await.wrap_err("reading created draft")
    }

    #[instrument(skip(self, draft, file), fields(draft = draft.id))]
    async fn upload_asset(&self, draft: &Draft, name: &str, file: &Path) -> Result<()> {
        let content = tokio::fs::read(file)
            .await
            .wrap_err(format!("reading {}", file.display()))?;
        let response = self
            .http
            .execute(self.upload_asset_request(draft, name, content)?)
            .await
            .wrap_err(format!("sending asset {name}"))?;
        check_status(&format!("uploading asset {name}"), &[200, 201], response).await?;
        Ok(())
    }

    #[instrument(skip(self, draft), fields(draft = draft.id))]
    async fn delete_draft(&self, draft: &Draft) -> Result<()> {
        let response = self
            .http
            .execute(self.delete_draft_request(draft)?)
            .await
            .wrap_err("sending draft deletion")?;
        check_status("deleting draft", &[200, 204], response).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DryRunReleases;

#[async_trait]
impl ReleaseApi for DryRunReleases {
    async fn create_draft(&self, request: &DraftRequest) -> Result<Draft> {
        info!("[dry run] create_draft :: {request:?}");
        Ok(Draft {
            id: 0,
            url: String::new(),
            upload_url: String::new(),
            html_url: None,
        })
    }

    async fn upload_asset(&self, draft: &Draft, name: &str, file: &Path) -> Result<()> {
        info!("[dry run] upload_asset :: draft {}, {name} ({})", draft.id, file.display());
        Ok(())
    }

    async fn delete_draft(&self, draft: &Draft) -> Result<()> {
        info!("[dry run] delete_draft :: draft {}", draft.id);
        Ok(())
    }
}

fn asset_extensions(platform: Platform) -> Vec<&'static str> {
    let mut extensions = vec![".asc", ".sig"];
    match platform {
        Platform::Linux => extensions.extend([".AppImage", ".deb"]),
        Platform::Windows => extensions.push(".exe"),
        Platform::MacOs => extensions.push(".pkg"),
    }
    extensions
}

/// Files directly inside `dir` that belong on the release page of `platform`,
/// sorted by name.
pub fn release_assets<T: AsRef<Path>>(dir: T, platform: Platform) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let extensions = asset_extensions(platform);
    let entries = std::fs::read_dir(dir)
        .map_err(|e| DeployError::NotFound(format!("asset directory {} :: {e}", dir.display())))?
        .collect::<Result<Vec<_>, _>>()
        .wrap_err("reading asset dir entries")?;
    Ok(entries
        .into_iter()
        .filter(|entry| entry.path().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            extensions.iter().any(|ext| name.ends_with(ext))
        })
        .map(|entry| entry.path())
        .sorted()
        .collect())
}

/// Creates the draft and uploads every asset in order. The first failed
/// upload deletes the draft (exactly once) and its error is returned; a
/// failed delete is logged next to it.
pub async fn create_draft_with_assets(
    api: &dyn ReleaseApi,
    request: &DraftRequest,
    assets: &[PathBuf],
) -> Result<Draft> {
    info!("creating draft \"{}\" ...", request.name);
    let draft = api.create_draft(request).await.wrap_err("creating draft")?;
    info!("draft {} created", draft.id);

    for asset in assets {
        let name = asset
            .file_name()
            .ok_or_else(|| eyre::eyre!("this is a directory"))?
            .to_string_lossy()
            .to_string();
        info!("uploading asset \"{name}\" ...");
        if let Err(upload_error) = api.upload_asset(&draft, &name, asset).await {
            error!("uploading \"{name}\" failed :: {upload_error:?}");
            info!("deleting draft {} because upload failed ...", draft.id);
            match api.delete_draft(&draft).await {
                Ok(()) => info!("draft {} deleted", draft.id),
                Err(e) => error!("deleting draft {} failed :: {e:?}", draft.id),
            }
            return Err(upload_error.wrap_err(format!("uploading asset {name}")));
        }
        info!("asset \"{name}\" uploaded");
    }
    if let Some(html_url) = &draft.html_url {
        info!("draft ready :: {html_url}");
    }
    Ok(draft)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Create(String),
        Upload(String),
        Delete(String),
    }

    #[derive(Debug, Default)]
    struct FakeGitHub {
        failing_asset: Option<String>,
        fail_delete: bool,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeGitHub {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReleaseApi for FakeGitHub {
        async fn create_draft(&self, request: &DraftRequest) -> Result<Draft> {
            self.calls.lock().unwrap().push(Call::Create(request.tag_name.clone()));
            Ok(serde_json::from_str(include_str!("../test_data/github_release.json"))?)
        }

        async fn upload_asset(&self, _draft: &Draft, name: &str, _file: &Path) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Upload(name.to_string()));
            if self.failing_asset.as_deref() == Some(name) {
                return Err(DeployError::remote("uploading asset", Some(422), "already_exists").into());
            }
            Ok(())
        }

        async fn delete_draft(&self, draft: &Draft) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Delete(draft.url.clone()));
            if self.fail_delete {
                return Err(DeployError::remote("deleting draft", Some(404), "Not Found").into());
            }
            Ok(())
        }
    }

    const DRAFT_URL: &str = "https://api.github.com/repos/wireapp/wire-desktop/releases/1";

    fn assets() -> Vec<PathBuf> {
        vec![PathBuf::from("wrap/a.exe"), PathBuf::from("wrap/a.exe.sig"), PathBuf::from("wrap/b.exe")]
    }

    fn request() -> DraftRequest {
        DraftRequest::new(Platform::Windows, "3.7.1234", "deadbeef", "...")
    }

    #[test]
    fn request_uses_platform_tag_and_title() {
        let request = DraftRequest::new(Platform::MacOs, "3.4.1234", "deadbeef", "notes");
        assert_eq!(request.tag_name, "macos/3.4.1234");
        assert_eq!(request.name, "3.4.1234 - macOS");
        assert!(request.draft);
        assert!(!request.prerelease);
    }

    #[test]
    fn upload_url_template_is_stripped() -> Result<()> {
        let draft: Draft = serde_json::from_str(include_str!("../test_data/github_release.json"))?;
        assert_eq!(
            draft.asset_upload_url(),
            "https://uploads.github.com/repos/wireapp/wire-desktop/releases/1/assets"
        );
        assert_eq!(draft.url, DRAFT_URL);
        Ok(())
    }

    #[test]
    fn draft_creation_posts_json_with_token() -> Result<()> {
        let client = GitHubClient::new(DEFAULT_REPO_SLUG, "gh-secret")?;
        let built = client.create_draft_request(&request())?;
        assert_eq!(built.method(), reqwest::Method::POST);
        assert_eq!(
            built.url().as_str(),
            "https://api.github.com/repos/wireapp/wire-desktop/releases"
        );
        assert_eq!(built.headers()[reqwest::header::AUTHORIZATION], "token gh-secret");
        assert_eq!(built.headers()[reqwest::header::CONTENT_TYPE], "application/json");
        let body: serde_json::Value =
            serde_json::from_slice(built.body().and_then(|b| b.as_bytes()).unwrap_or_default())?;
        assert_eq!(body["tag_name"], "windows/3.7.1234");
        assert_eq!(body["name"], "3.7.1234 - Windows");
        assert_eq!(body["target_commitish"], "deadbeef");
        assert_eq!(body["draft"], true);
        assert_eq!(body["prerelease"], false);
        Ok(())
    }

    #[test]
    fn asset_upload_names_the_asset_in_the_query() -> Result<()> {
        let client = GitHubClient::new(DEFAULT_REPO_SLUG, "gh-secret")?;
        let draft: Draft = serde_json::from_str(include_str!("../test_data/github_release.json"))?;
        let built = client.upload_asset_request(&draft, "Wire-Setup.exe", b"MZ".to_vec())?;
        assert_eq!(built.method(), reqwest::Method::POST);
        assert_eq!(
            built.url().as_str(),
            "https://uploads.github.com/repos/wireapp/wire-desktop/releases/1/assets?name=Wire-Setup.exe"
        );
        assert_eq!(built.headers()[reqwest::header::AUTHORIZATION], "token gh-secret");
        assert_eq!(built.headers()[reqwest::header::CONTENT_TYPE], "application/binary");
        assert_eq!(built.body().and_then(|b| b.as_bytes()), Some(&b"MZ"[..]));
        Ok(())
    }

    #[test]
    fn deletion_targets_the_draft_url() -> Result<()> {
        let client = GitHubClient::new(DEFAULT_REPO_SLUG, "gh-secret")?;
        let draft: Draft = serde_json::from_str(include_str!("../test_data/github_release.json"))?;
        let built = client.delete_draft_request(&draft)?;
        assert_eq!(built.method(), reqwest::Method::DELETE);
        assert_eq!(built.url().as_str(), DRAFT_URL);
        assert_eq!(built.headers()[reqwest::header::AUTHORIZATION], "token gh-secret");
        Ok(())
    }

    #[tokio::test]
    async fn all_assets_uploaded_in_order() -> Result<()> {
        let api = FakeGitHub::default();
        let draft = create_draft_with_assets(&api, &request(), &assets()).await?;
        assert_eq!(draft.id, 1);
        assert_eq!(
            api.calls(),
            vec![
                Call::Create("windows/3.7.1234".to_string()),
                Call::Upload("a.exe".to_string()),
                Call::Upload("a.exe.sig".to_string()),
                Call::Upload("b.exe".to_string()),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn failed_upload_deletes_draft_once() {
        let api = FakeGitHub {
            failing_asset: Some("a.exe.sig".to_string()),
            ..Default::default()
        };
        let err = create_draft_with_assets(&api, &request(), &assets()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::RemoteFailure { status: Some(422), .. })
        ));
        assert_eq!(
            api.calls(),
            vec![
                Call::Create("windows/3.7.1234".to_string()),
                Call::Upload("a.exe".to_string()),
                Call::Upload("a.exe.sig".to_string()),
                Call::Delete(DRAFT_URL.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn failed_delete_still_reports_upload_error() {
        let api = FakeGitHub {
            failing_asset: Some("a.exe".to_string()),
            fail_delete: true,
            ..Default::default()
        };
        let err = create_draft_with_assets(&api, &request(), &assets()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::RemoteFailure { status: Some(422), .. })
        ));
        let deletes = api.calls().into_iter().filter(|c| matches!(c, Call::Delete(_))).count();
        assert_eq!(deletes, 1);
    }

    #[test]
    fn assets_are_filtered_by_platform() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for name in ["wire.deb", "wire.AppImage", "wire.deb.sig", "wire.pkg", "RELEASES", "notes.asc"] {
            std::fs::write(dir.path().join(name), name)?;
        }
        std::fs::create_dir(dir.path().join("nested.deb"))?;
        let names = release_assets(dir.path(), Platform::Linux)?
            .into_iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .collect_vec();
        assert_eq!(names, vec!["notes.asc", "wire.AppImage", "wire.deb", "wire.deb.sig"]);
        Ok(())
    }

    #[test]
    fn changelog_mentions_platform_and_version() {
        let date = chrono::NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let changelog = changelog_template(Platform::Linux, "3.7.1", date);
        assert!(changelog.contains("Linux 2026-10-19"));
        assert!(changelog.contains("release%2F3.7.1)"));
    }
}
