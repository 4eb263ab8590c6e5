//! Version and platform resolution for a CI build.
//!
//! The CI hands every job a build label of the form `<job>#<version>`
//! (`WRAPPER_BUILD`, e.g. `Windows#3.7.1234`); local builds carry an
//! `info.json` with separate `version` and `build` fields instead.

use enum_iterator::IntoEnumIterator;
use eyre::{
    Result,
    WrapErr,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    path::{
        Path,
        PathBuf,
    },
    str::FromStr,
};
use tracing::instrument;

use crate::error::DeployError;

pub const BUILD_LABEL_DELIMITER: char = '#';

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, IntoEnumIterator,
)]
pub enum Platform {
    #[serde(rename = "linux")]
    Linux,
    #[serde(rename = "windows")]
    Windows,
    #[serde(rename = "macos")]
    MacOs,
}

impl FromStr for Platform {
    type Err = eyre::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        matched_variant!(Self, s.to_lowercase())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl Platform {
    /// picks the platform whose name appears anywhere in a CI job name
    pub fn detect(job: &str) -> Result<Self> {
        let job_lower = job.to_lowercase();
        Self::into_enum_iter()
            .find(|platform| job_lower.contains(platform.tag_name()))
            .ok_or_else(|| DeployError::MissingInput(format!("no platform in job name [{job}]")).into())
    }

    /// lowercase name used in release tags, e.g. `macos/3.7.1234`
    pub fn tag_name(&self) -> &'static str {
        serde_variant::to_variant_name(self).expect("this will always serialize")
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Linux => "Linux",
            Platform::Windows => "Windows",
            Platform::MacOs => "macOS",
        }
    }
}

/// `<job>#<version>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperBuild {
    pub job: String,
    pub version: String,
}

impl FromStr for WrapperBuild {
    type Err = eyre::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (job, version) = s.split_once(BUILD_LABEL_DELIMITER).ok_or_else(|| {
            DeployError::MissingInput(format!(
                "invalid wrapper build [{s}], expected <job>{BUILD_LABEL_DELIMITER}<version>"
            ))
        })?;
        let (job, version) = (job.trim(), version.trim());
        if job.is_empty() || version.is_empty() {
            return Err(DeployError::MissingInput(format!("invalid wrapper build [{s}]")).into());
        }
        Ok(Self {
            job: job.to_string(),
            version: validate_version(version)?,
        })
    }
}

impl WrapperBuild {
    pub fn platform(&self) -> Result<Platform> {
        Platform::detect(&self.job)
    }
}

/// a manifest field written either as `"3.7"` or as `1234`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ManifestField {
    Text(String),
    Number(serde_json::Number),
}

impl fmt::Display for ManifestField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestField::Text(t) => f.write_str(t.trim()),
            ManifestField::Number(n) => write!(f, "{n}"),
        }
    }
}

/// `info.json` written next to the build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoManifest {
    pub version: ManifestField,
    pub build: ManifestField,
    #[serde(flatten)]
    pub rest: serde_json::Value,
}

impl InfoManifest {
    pub fn load<T: AsRef<Path>>(path: T) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DeployError::MissingInput(format!("reading {} :: {e}", path.display()))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| DeployError::MissingInput(format!("parsing {} :: {e}", path.display())).into())
    }

    pub fn version_string(&self) -> String {
        format!("{}.{}", self.version, self.build)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSource {
    /// raw `<job>#<version>` label
    WrapperBuild(String),
    /// path to an `info.json`
    Manifest(PathBuf),
}

#[instrument(ret)]
pub fn resolve_version(source: &VersionSource) -> Result<String> {
    match source {
        VersionSource::WrapperBuild(label) => Ok(label.parse::<WrapperBuild>()?.version),
        VersionSource::Manifest(path) => validate_version(&InfoManifest::load(path)?.version_string()),
    }
}

fn validate_version(version: &str) -> Result<String> {
    if version.is_empty() || version == "." {
        return Err(DeployError::MissingInput("empty version".to_string()).into());
    }
    if version.contains('/') {
        return Err(DeployError::MissingInput(format!(
            "version [{version}] would break the storage key"
        ))
        .into());
    }
    Ok(version.to_string())
}

/// what a subcommand is releasing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTarget {
    pub platform: Platform,
    pub version: String,
}

/// Combines the build label, an optional manifest and an optional explicit
/// platform. The manifest wins for the version, the explicit platform wins
/// over the one named by the job.
pub fn resolve_build(
    wrapper_build: Option<&str>,
    manifest: Option<&Path>,
    platform: Option<Platform>,
) -> Result<BuildTarget> {
    let label = wrapper_build.map(str::parse::<WrapperBuild>).transpose()?;
    let source = match (manifest, wrapper_build) {
        (Some(path), _) => VersionSource::Manifest(path.to_path_buf()),
        (None, Some(raw)) => VersionSource::WrapperBuild(raw.to_string()),
        (None, None) => {
            return Err(DeployError::MissingInput(
                "WRAPPER_BUILD or an info.json path is required".to_string(),
            )
            .into())
        }
    };
    let version = resolve_version(&source)?;
    let platform = match (platform, &label) {
        (Some(platform), _) => platform,
        (None, Some(label)) => label.platform().wrap_err("detecting platform")?,
        (None, None) => {
            return Err(DeployError::MissingInput("platform is required".to_string()).into())
        }
    };
    Ok(BuildTarget { platform, version })
}

/// `3.4.1234` -> `3.4` + `1234`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemverParts {
    pub bundle_short_version: String,
    pub bundle_version: String,
}

impl SemverParts {
    pub fn parse(version: &str) -> Result<Self> {
        match version.split('.').collect::<Vec<_>>().as_slice() {
            [major, minor, build, ..] if !major.is_empty() && !minor.is_empty() && !build.is_empty() => {
                Ok(Self {
                    bundle_short_version: format!("{major}.{minor}"),
                    bundle_version: build.to_string(),
                })
            }
            _ => Err(DeployError::MissingInput(format!(
                "version [{version}] is not <major>.<minor>.<build>"
            ))
            .into()),
        }
    }
}
