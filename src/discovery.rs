use eyre::{
    Result,
    WrapErr,
};
use itertools::Itertools;
use std::path::{
    Path,
    PathBuf,
};
use tracing::instrument;

#[allow(unused_imports)]
use tracing::{
    debug,
    info,
    warn,
};

use crate::error::DeployError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundFile {
    /// includes directory AND file name
    pub path: PathBuf,
    pub file_name: String,
}

fn ends_with_ignore_case(file_name: &str, suffix: &str) -> bool {
    file_name.to_lowercase().ends_with(&suffix.to_lowercase())
}

fn walk(
    root: &Path,
    label: &str,
    max_depth: Option<usize>,
    matches: impl Fn(&str) -> bool,
) -> Result<Vec<FoundFile>> {
    if !root.is_dir() {
        return Err(DeployError::NotFound(format!("search directory {}", root.display())).into());
    }
    let mut walker = walkdir::WalkDir::new(root).sort_by_file_name();
    if let Some(depth) = max_depth {
        walker = walker.max_depth(depth);
    }
    let found = walker
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .wrap_err("reading search dir entries")?
        .into_iter()
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let file_name = entry.file_name().to_string_lossy().to_string();
            matches(&file_name).then(|| FoundFile {
                path: entry.into_path(),
                file_name,
            })
        })
        .collect_vec();
    debug!("{} match(es) for [{label}]", found.len());
    Ok(found)
}

/// zero matches is `NotFound`; several are `Ambiguous` in strict mode and the
/// first one otherwise
fn pick(mut found: Vec<FoundFile>, root: &Path, label: &str, strict: bool) -> Result<FoundFile> {
    match found.len() {
        0 => Err(DeployError::NotFound(format!("no file matching [{label}] below {}", root.display())).into()),
        n if n > 1 && strict => Err(DeployError::Ambiguous {
            suffix: label.to_string(),
            candidates: found.into_iter().map(|f| f.file_name).collect(),
        }
        .into()),
        n => {
            if n > 1 {
                warn!(
                    "{n} files match [{label}], using the first one :: {}",
                    found.iter().map(|f| f.path.display()).join(", ")
                );
            }
            let first = found.remove(0);
            info!("found [{label}] :: {}", first.path.display());
            Ok(first)
        }
    }
}

/// every file below `root` whose name ends with `suffix`, ignoring case, in
/// file-name order of the walk
#[instrument(skip(root), fields(root = %root.as_ref().display()))]
pub fn find_all_by_suffix<T: AsRef<Path>>(root: T, suffix: &str) -> Result<Vec<FoundFile>> {
    walk(root.as_ref(), suffix, None, |name| ends_with_ignore_case(name, suffix))
}

/// like [`locate`], but only looks at the files directly inside `root`
pub fn locate_top_level<T: AsRef<Path>>(root: T, suffix: &str, strict: bool) -> Result<FoundFile> {
    let root = root.as_ref();
    let found = walk(root, suffix, Some(1), |name| ends_with_ignore_case(name, suffix))?;
    pick(found, root, suffix, strict)
}

/// Files anywhere below `root` named exactly `file_name`, for fixed names
/// such as `RELEASES` that other files may end with.
pub fn locate_by_name<T: AsRef<Path>>(root: T, file_name: &str, strict: bool) -> Result<FoundFile> {
    let root = root.as_ref();
    let found = walk(root, file_name, None, |name| name == file_name)?;
    pick(found, root, file_name, strict)
}

/// first match of the walk; the walk is sorted so this is stable for an
/// unchanged tree
pub fn find_by_suffix<T: AsRef<Path>>(root: T, suffix: &str) -> Result<Option<FoundFile>> {
    let mut found = find_all_by_suffix(root, suffix)?;
    if found.len() > 1 {
        warn!(
            "{} files match [{suffix}], using the first one :: {}",
            found.len(),
            found.iter().map(|f| f.path.display()).join(", ")
        );
    }
    Ok((!found.is_empty()).then(|| found.remove(0)))
}

/// the single match for `suffix`, refusing to pick between several
pub fn find_unique_by_suffix<T: AsRef<Path>>(root: T, suffix: &str) -> Result<FoundFile> {
    let root = root.as_ref();
    pick(find_all_by_suffix(root, suffix)?, root, suffix, true)
}

/// Looks up a primary artifact. Not finding it is always an error; finding
/// several is an error only in strict mode.
pub fn locate<T: AsRef<Path>>(root: T, suffix: &str, strict: bool) -> Result<FoundFile> {
    let root = root.as_ref();
    if strict {
        return find_unique_by_suffix(root, suffix);
    }
    let found = find_by_suffix(root, suffix)?.ok_or_else(|| {
        DeployError::NotFound(format!("no file ending with [{suffix}] below {}", root.display()))
    })?;
    info!("found [{suffix}] :: {}", found.path.display());
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn touch(dir: &Path, name: &str) -> Result<()> {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, name)?;
        Ok(())
    }

    #[test]
    fn suffix_match_ignores_case() -> Result<()> {
        let dir = tempfile::tempdir()?;
        touch(dir.path(), "a.AppImage")?;
        touch(dir.path(), "b.appimage")?;
        touch(dir.path(), "c.deb")?;

        let all = find_all_by_suffix(dir.path(), ".AppImage")?;
        assert_eq!(
            all.iter().map(|f| f.file_name.as_str()).collect_vec(),
            vec!["a.AppImage", "b.appimage"]
        );

        let first = find_by_suffix(dir.path(), ".AppImage")?;
        let again = find_by_suffix(dir.path(), ".AppImage")?;
        assert!(first.is_some());
        assert_eq!(first, again);
        Ok(())
    }

    #[test]
    fn walk_descends_into_subdirectories() -> Result<()> {
        let dir = tempfile::tempdir()?;
        touch(dir.path(), "build/nested/Wire-Setup.exe")?;
        let found = locate(dir.path(), "-Setup.exe", true)?;
        assert_eq!(found.file_name, "Wire-Setup.exe");
        assert_eq!(found.path, dir.path().join("build/nested/Wire-Setup.exe"));
        Ok(())
    }

    #[test]
    fn nothing_found_is_not_found() -> Result<()> {
        let dir = tempfile::tempdir()?;
        touch(dir.path(), "readme.txt")?;
        assert_eq!(find_by_suffix(dir.path(), ".pkg")?, None);
        let err = locate(dir.path(), ".pkg", false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn strict_lookup_refuses_several_candidates() -> Result<()> {
        let dir = tempfile::tempdir()?;
        touch(dir.path(), "a.AppImage")?;
        touch(dir.path(), "b.appimage")?;
        let err = locate(dir.path(), ".AppImage", true).unwrap_err();
        assert_eq!(
            err.downcast_ref::<DeployError>(),
            Some(&DeployError::Ambiguous {
                suffix: ".AppImage".to_string(),
                candidates: vec!["a.AppImage".to_string(), "b.appimage".to_string()],
            })
        );
        assert_eq!(locate(dir.path(), ".AppImage", false)?.file_name, "a.AppImage");
        Ok(())
    }

    #[test]
    fn top_level_lookup_ignores_nested_copies() -> Result<()> {
        let dir = tempfile::tempdir()?;
        touch(dir.path(), "debian/pool/main/wire_3.7_amd64.deb")?;
        touch(dir.path(), "wire_3.7_amd64.deb")?;
        let found = locate_top_level(dir.path(), ".deb", true)?;
        assert_eq!(found.path, dir.path().join("wire_3.7_amd64.deb"));
        assert!(locate(dir.path(), ".deb", true).is_err());
        Ok(())
    }

    #[test]
    fn name_lookup_ignores_files_ending_with_the_name() -> Result<()> {
        let dir = tempfile::tempdir()?;
        touch(dir.path(), "notes/OLD-RELEASES")?;
        let err = locate_by_name(dir.path(), "RELEASES", true).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::NotFound(_))
        ));

        touch(dir.path(), "squirrel/RELEASES")?;
        let found = locate_by_name(dir.path(), "RELEASES", true)?;
        assert_eq!(found.path, dir.path().join("squirrel/RELEASES"));

        touch(dir.path(), "RELEASES")?;
        assert!(locate_by_name(dir.path(), "RELEASES", true).is_err());
        assert_eq!(locate_by_name(dir.path(), "RELEASES", false)?.path, dir.path().join("RELEASES"));
        Ok(())
    }

    #[test]
    fn missing_root_is_not_found() {
        let err = find_all_by_suffix("/definitely/not/here", ".pkg").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::NotFound(_))
        ));
    }
}
