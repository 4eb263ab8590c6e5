use eyre::{
    Result,
    WrapErr,
};
use itertools::Itertools;
use std::path::{
    Path,
    PathBuf,
};

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
        locate_by_name,
        locate_top_level,
    },
    error::DeployError,
    namespacing::{
        app_short_name,
        debian_pool_path,
        join_key,
        versioned_exe_name,
        versioned_releases_name,
        DEBIAN_REPOSITORY_FILES,
        RELEASES_FILE,
        SETUP_EXE_SUFFIX,
    },
    storage::ObjectStore,
    version::{
        BuildTarget,
        Platform,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub local_path: PathBuf,
    /// bucket-relative destination
    pub key: String,
}

impl Artifact {
    pub fn new(local_path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Uploaded,
    SkippedMissing,
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    pub entries: Vec<(Artifact, PublishOutcome)>,
}

impl PublishReport {
    fn count(&self, pred: impl Fn(&PublishOutcome) -> bool) -> usize {
        self.entries.iter().filter(|(_, outcome)| pred(outcome)).count()
    }

    pub fn uploaded(&self) -> usize {
        self.count(|o| *o == PublishOutcome::Uploaded)
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| *o == PublishOutcome::SkippedMissing)
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, PublishOutcome::Failed(_)))
    }

    /// any failed upload turns the whole batch into an error; skips do not
    pub fn into_result(self) -> Result<Self> {
        if self.failed() == 0 {
            return Ok(self);
        }
        let message = self
            .entries
            .iter()
            .filter_map(|(artifact, outcome)| match outcome {
                PublishOutcome::Failed(reason) => Some(format!("{} :: {reason}", artifact.key)),
                _ => None,
            })
            .join("; ");
        Err(DeployError::remote("uploading artifacts", None, message).into())
    }
}

async fn publish_one(store: &dyn ObjectStore, artifact: &Artifact) -> PublishOutcome {
    if !artifact.local_path.is_file() {
        warn!("{} not found, skipping", artifact.local_path.display());
        return PublishOutcome::SkippedMissing;
    }
    info!(
        "uploading \"{}\" to \"{}/{}\" ...",
        artifact.local_path.display(),
        store.bucket_name(),
        artifact.key
    );
    let upload = async {
        let content = tokio::fs::read(&artifact.local_path)
            .await
            .wrap_err(format!("reading {}", artifact.local_path.display()))?;
        store.put_object(&artifact.key, &content).await
    };
    match upload.await {
        Ok(()) => {
            info!("uploaded \"{}/{}\"", store.bucket_name(), artifact.key);
            PublishOutcome::Uploaded
        }
        Err(e) => {
            error!("uploading \"{}\" failed :: {e:?}", artifact.key);
            PublishOutcome::Failed(format!("{e:#}"))
        }
    }
}

/// Uploads each artifact independently, in order. Missing local files are
/// skipped, failed uploads are recorded and the batch goes on; nothing that
/// already went up is rolled back.
pub async fn publish(store: &dyn ObjectStore, artifacts: &[Artifact]) -> PublishReport {
    let mut report = PublishReport::default();
    for artifact in artifacts {
        let outcome = publish_one(store, artifact).await;
        report.entries.push((artifact.clone(), outcome));
    }
    info!(
        "{} uploaded, {} skipped, {} failed",
        report.uploaded(),
        report.skipped(),
        report.failed()
    );
    report
}

/// The files a platform build publishes. Primary artifacts, including the
/// windows `RELEASES` feed, must exist below `base_path`; the debian
/// repository metadata is optional.
pub fn upload_plan<T: AsRef<Path>>(
    target: &BuildTarget,
    base_path: T,
    prefix: &str,
    strict: bool,
) -> Result<Vec<Artifact>> {
    let base_path = base_path.as_ref();
    let plan = match target.platform {
        Platform::Linux => {
            let app_image = locate_top_level(base_path, ".AppImage", strict)?;
            let deb = locate_top_level(base_path, ".deb", strict)?;
            let pool_path = debian_pool_path(&deb.file_name);
            DEBIAN_REPOSITORY_FILES
                .iter()
                .copied()
                .chain(std::iter::once(pool_path.as_str()))
                .map(|name| Artifact::new(base_path.join(name), join_key(prefix, name)))
                .chain([
                    Artifact::new(&app_image.path, join_key(prefix, &app_image.file_name)),
                    Artifact::new(&deb.path, join_key(prefix, &deb.file_name)),
                ])
                .collect_vec()
        }
        Platform::Windows => {
            let nupkg = locate(base_path, "-full.nupkg", strict)?;
            let setup_exe = locate(base_path, SETUP_EXE_SUFFIX, strict)?;
            let short_name = app_short_name(&nupkg.file_name)?;
            let releases = locate_by_name(base_path, RELEASES_FILE, strict)?.path;
            vec![
                Artifact::new(&nupkg.path, join_key(prefix, &nupkg.file_name)),
                Artifact::new(
                    releases,
                    join_key(prefix, &versioned_releases_name(&short_name, &target.version)),
                ),
                Artifact::new(
                    &setup_exe.path,
                    join_key(prefix, &versioned_exe_name(&short_name, &target.version)),
                ),
            ]
        }
        Platform::MacOs => {
            let pkg = locate(base_path, ".pkg", strict)?;
            vec![Artifact::new(&pkg.path, join_key(prefix, &pkg.file_name))]
        }
    };
    debug!("upload plan :: {plan:#?}");
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use pretty_assertions::assert_eq;

    fn write(dir: &Path, name: &str, content: &str) -> Result<PathBuf> {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    #[tokio::test]
    async fn missing_file_is_skipped_not_fatal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let present = write(dir.path(), "wire-3.7.exe", "exe")?;
        let store = MemoryStore::default();
        let report = publish(
            &store,
            &[
                Artifact::new(&present, "win/wire-3.7.exe"),
                Artifact::new(dir.path().join("absent.nupkg"), "win/absent.nupkg"),
            ],
        )
        .await;
        assert_eq!((report.uploaded(), report.skipped(), report.failed()), (1, 1, 0));
        assert_eq!(store.objects.lock().unwrap().len(), 1);
        assert_eq!(store.object("win/wire-3.7.exe"), Some(b"exe".to_vec()));
        report.into_result()?;
        Ok(())
    }

    #[tokio::test]
    async fn publishing_twice_gives_same_object() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write(dir.path(), "wire.pkg", "pkg-bytes")?;
        let store = MemoryStore::default();
        let batch = [Artifact::new(&path, "macos/wire.pkg")];
        publish(&store, &batch).await.into_result()?;
        let first = store.object("macos/wire.pkg");
        publish(&store, &batch).await.into_result()?;
        assert_eq!(store.object("macos/wire.pkg"), first);
        assert_eq!(first, Some(b"pkg-bytes".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn failed_upload_does_not_halt_batch() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = write(dir.path(), "a.deb", "a")?;
        let b = write(dir.path(), "b.AppImage", "b")?;
        let store = MemoryStore::default();
        store.fail_on("upload", "linux/a.deb");
        let report = publish(
            &store,
            &[Artifact::new(&a, "linux/a.deb"), Artifact::new(&b, "linux/b.AppImage")],
        )
        .await;
        assert!(matches!(report.entries[0].1, PublishOutcome::Failed(_)));
        assert_eq!(report.entries[1].1, PublishOutcome::Uploaded);
        assert_eq!(store.object("linux/b.AppImage"), Some(b"b".to_vec()));
        let err = report.into_result().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::RemoteFailure { .. })
        ));
        Ok(())
    }

    #[test]
    fn windows_plan_renames_installer_and_releases() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(dir.path(), "wire-3.7.1234-full.nupkg", "")?;
        write(dir.path(), "Wire-Setup.exe", "")?;
        write(dir.path(), "RELEASES", "")?;
        let target = BuildTarget {
            platform: Platform::Windows,
            version: "3.7.1234".to_string(),
        };
        let plan = upload_plan(&target, dir.path(), "win/prod/", true)?;
        assert_eq!(
            plan,
            vec![
                Artifact::new(
                    dir.path().join("wire-3.7.1234-full.nupkg"),
                    "win/prod/wire-3.7.1234-full.nupkg"
                ),
                Artifact::new(dir.path().join("RELEASES"), "win/prod/wire-3.7.1234-RELEASES"),
                Artifact::new(dir.path().join("Wire-Setup.exe"), "win/prod/wire-3.7.1234.exe"),
            ]
        );
        Ok(())
    }

    #[test]
    fn windows_plan_accepts_setup_exe_without_dash() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(dir.path(), "wire-3.7.1234-full.nupkg", "")?;
        write(dir.path(), "WireSetup.exe", "")?;
        write(dir.path(), "RELEASES", "")?;
        let target = BuildTarget {
            platform: Platform::Windows,
            version: "3.7.1234".to_string(),
        };
        let plan = upload_plan(&target, dir.path(), "win/prod", true)?;
        assert_eq!(
            plan[2],
            Artifact::new(dir.path().join("WireSetup.exe"), "win/prod/wire-3.7.1234.exe")
        );
        Ok(())
    }

    #[test]
    fn releases_feed_is_matched_by_exact_name() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(dir.path(), "wire-3.7.1234-full.nupkg", "")?;
        write(dir.path(), "WireSetup.exe", "")?;
        write(dir.path(), "notes/OLD-RELEASES", "stale")?;
        let target = BuildTarget {
            platform: Platform::Windows,
            version: "3.7.1234".to_string(),
        };
        for strict in [true, false] {
            let err = upload_plan(&target, dir.path(), "win/prod", strict).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<DeployError>(),
                Some(DeployError::NotFound(_))
            ));
        }

        write(dir.path(), "RELEASES", "fresh")?;
        let plan = upload_plan(&target, dir.path(), "win/prod", true)?;
        assert_eq!(
            plan[1],
            Artifact::new(dir.path().join("RELEASES"), "win/prod/wire-3.7.1234-RELEASES")
        );
        Ok(())
    }

    #[test]
    fn linux_plan_includes_repository_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(dir.path(), "wire-3.7.1-x86_64.AppImage", "")?;
        write(dir.path(), "wire_3.7.1_amd64.deb", "")?;
        write(dir.path(), "debian/pool/main/wire_3.7.1_amd64.deb", "")?;
        let target = BuildTarget {
            platform: Platform::Linux,
            version: "3.7.1".to_string(),
        };
        let plan = upload_plan(&target, dir.path(), "linux", true)?;
        assert_eq!(plan.len(), DEBIAN_REPOSITORY_FILES.len() + 3);
        let keys = plan.iter().map(|a| a.key.as_str()).collect_vec();
        assert!(keys.contains(&"linux/debian/pool/main/wire_3.7.1_amd64.deb"));
        assert!(keys.contains(&"linux/debian/dists/stable/Release"));
        assert!(keys.contains(&"linux/wire-3.7.1-x86_64.AppImage"));
        assert!(keys.contains(&"linux/wire_3.7.1_amd64.deb"));
        Ok(())
    }

    #[test]
    fn missing_primary_artifact_is_fatal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = BuildTarget {
            platform: Platform::MacOs,
            version: "3.7.1".to_string(),
        };
        let err = upload_plan(&target, dir.path(), "", false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::NotFound(_))
        ));
        Ok(())
    }
}
