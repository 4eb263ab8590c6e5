//! Post-processing of the translation files downloaded from Crowdin into the
//! module format the desktop app loads.

use eyre::{
    Result,
    WrapErr,
};
use itertools::Itertools;
use std::path::Path;
use tracing::instrument;

#[allow(unused_imports)]
use tracing::{
    debug,
    info,
    warn,
};

use crate::{
    error::DeployError,
    metadata::run_command,
};

pub const SUPPORTED_LOCALES: [&str; 20] = [
    "cs", "da", "de", "el", "es", "fi", "fr", "hr", "hu", "it", "lt", "nl", "pl", "pt", "ro", "ru", "sk", "sl",
    "tr", "uk",
];

pub const SOURCE_FILE: &str = "strings.js";
pub const ENGLISH_FILE: &str = "strings-en.js";

const MODULE_HEADER: &str = "'use strict';\n\nlet string = {};\n\n";
const MODULE_FOOTER: &str = "\nmodule.exports = string;\n";
const RIGHT_SINGLE_QUOTE: &str = "\u{2019}";

/// `strings-de.js` -> `de`; anything that is not a two letter locale file is `None`
pub fn locale_of(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix("strings-")
        .and_then(|rest| rest.strip_suffix(".js"))
        .filter(|locale| locale.chars().count() == 2)
}

/// Typographic apostrophes inside the outermost pair of `'` of a line.
pub fn fix_apostrophe(line: &str) -> String {
    match (line.find('\''), line.rfind('\'')) {
        (Some(first), Some(last)) if first != last => format!(
            "{}{}{}",
            &line[..=first],
            line[first + 1..last].replace('\'', RIGHT_SINGLE_QUOTE),
            &line[last..]
        ),
        _ => line.to_string(),
    }
}

pub fn normalize_locale_source(source: &str) -> String {
    let body = source
        .replace('=', " = ")
        .replace("'use = strict';\n\n", "")
        .replace("'use strict';\n\n", "");
    let body = body
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .map(fix_apostrophe)
        .join("\n");
    format!("{MODULE_HEADER}{body}{MODULE_FOOTER}")
}

fn english_module(source: &str) -> String {
    format!(
        "{MODULE_HEADER}{}{MODULE_FOOTER}",
        source.replace("'use strict';\n\n", "")
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocaleReport {
    pub removed: Vec<String>,
    pub normalized: Vec<String>,
    pub english_written: bool,
}

/// Drops unsupported locales, rewrites the supported ones in place and
/// derives `strings-en.js` from `strings.js`. Files are visited in name order.
#[instrument(skip(dir), fields(dir = %dir.as_ref().display()))]
pub fn transform_locale_dir<T: AsRef<Path>>(dir: T, supported: &[&str]) -> Result<LocaleReport> {
    let dir = dir.as_ref();
    let file_names = std::fs::read_dir(dir)
        .map_err(|e| DeployError::NotFound(format!("locale directory {} :: {e}", dir.display())))?
        .collect::<Result<Vec<_>, _>>()
        .wrap_err("reading locale dir entries")?
        .into_iter()
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .sorted()
        .collect_vec();

    let mut report = LocaleReport::default();
    for file_name in &file_names {
        // generated below, not a download
        if file_name == ENGLISH_FILE {
            continue;
        }
        let locale = match locale_of(file_name) {
            Some(locale) => locale,
            None => continue,
        };
        let path = dir.join(file_name);
        if !supported.contains(&locale) {
            info!("removing unsupported locale \"{locale}\" ({})", path.display());
            std::fs::remove_file(&path).wrap_err(format!("removing {}", path.display()))?;
            report.removed.push(file_name.clone());
            continue;
        }
        let source = std::fs::read_to_string(&path).wrap_err(format!("reading {}", path.display()))?;
        std::fs::write(&path, normalize_locale_source(&source))
            .wrap_err(format!("writing {}", path.display()))?;
        debug!("normalized {}", path.display());
        report.normalized.push(file_name.clone());
    }

    let source_path = dir.join(SOURCE_FILE);
    if source_path.is_file() {
        let source =
            std::fs::read_to_string(&source_path).wrap_err(format!("reading {}", source_path.display()))?;
        std::fs::write(dir.join(ENGLISH_FILE), english_module(&source)).wrap_err("writing english strings")?;
        report.english_written = true;
    } else {
        warn!("{} not found, {ENGLISH_FILE} not written", source_path.display());
    }
    info!(
        "{} locale(s) normalized, {} removed",
        report.normalized.len(),
        report.removed.len()
    );
    Ok(report)
}

/// pushes the source strings to Crowdin and pulls the translations
pub fn sync_with_crowdin<T: AsRef<Path>>(identity: &Path, cwd: T, dry_run: bool) -> Result<()> {
    let identity_arg = format!("--identity={}", identity.display());
    for action in [&["upload", "sources"][..], &["download"][..]] {
        let args = std::iter::once(identity_arg.as_str())
            .chain(action.iter().copied())
            .collect_vec();
        if dry_run {
            info!("[dry run] crowdin-cli {}", args.join(" "));
            continue;
        }
        info!("crowdin-cli {} ...", action.join(" "));
        run_command("crowdin-cli", &args, cwd.as_ref()).wrap_err("syncing with crowdin")?;
    }
    Ok(())
}
