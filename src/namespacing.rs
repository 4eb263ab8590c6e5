use eyre::{
    Result,
    WrapErr,
};
use tracing::instrument;

use crate::{
    config::S3Config,
    error::DeployError,
};

/// alias object the Squirrel updater polls for the latest windows release
pub const RELEASES_FILE: &str = "RELEASES";

/// ending shared by `WireSetup.exe` and `WireInternal-Setup.exe`
pub const SETUP_EXE_SUFFIX: &str = "Setup.exe";

/// debian repository metadata published alongside the `.deb`
pub const DEBIAN_REPOSITORY_FILES: &[&str] = &[
    "debian/dists/stable/Contents-amd64",
    "debian/dists/stable/Contents-amd64.bz2",
    "debian/dists/stable/Contents-amd64.gz",
    "debian/dists/stable/InRelease",
    "debian/dists/stable/Release",
    "debian/dists/stable/Release.gpg",
    "debian/dists/stable/main/binary-amd64/Packages",
    "debian/dists/stable/main/binary-amd64/Packages.bz2",
    "debian/dists/stable/main/binary-amd64/Packages.gz",
];

pub fn debian_pool_path(deb_file_name: &str) -> String {
    format!("debian/pool/main/{deb_file_name}")
}

/// `prefix/name` without doubled or leading slashes
#[instrument(ret)]
pub fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let name = name.trim_start_matches('/');
    let joined = if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    };
    let mut key = joined.replace("//", "/");
    while key.contains("//") {
        key = key.replace("//", "/");
    }
    key
}

fn capture_first(pattern: &str, file_name: &str) -> Result<Option<String>> {
    let regex = regex_lite::Regex::new(pattern).wrap_err("bad file name pattern")?;
    Ok(regex
        .captures(file_name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string()))
}

/// `wire-3.7.1234-full.nupkg` -> `wire`
#[instrument(ret)]
pub fn app_short_name(nupkg_file_name: &str) -> Result<String> {
    capture_first(r"(?i)^(.+)-[\d.]+-full\.nupkg$", nupkg_file_name)?.ok_or_else(|| {
        DeployError::NotFound(format!("app short name in [{nupkg_file_name}]")).into()
    })
}

/// `WireSetup.exe` or `Wire-Setup.exe` -> `Wire`
#[instrument(ret)]
pub fn app_full_name(setup_exe_file_name: &str) -> Result<String> {
    capture_first(r"(?i)^(.+?)-?Setup\.exe$", setup_exe_file_name)?.ok_or_else(|| {
        DeployError::NotFound(format!("app full name in [{setup_exe_file_name}]")).into()
    })
}

pub fn versioned_exe_name(app_short_name: &str, version: &str) -> String {
    format!("{app_short_name}-{version}.exe")
}

pub fn versioned_releases_name(app_short_name: &str, version: &str) -> String {
    format!("{app_short_name}-{version}-{RELEASES_FILE}")
}

/// public url of an object, for logs
pub fn s3_url(config: &S3Config, key: &str) -> String {
    format!("{}/{}", config.url_prefix(), key)
}
