//! Points the well-known "latest" keys of a bucket at a freshly uploaded
//! versioned build.
//!
//! The historical pipeline deleted the alias and then copied the versioned
//! object onto it, leaving a window in which the alias does not exist.
//! [`PromotionStrategy::Overwrite`] skips the delete and lets the server-side
//! copy replace the alias in one request; readers see either the old or the
//! new build. [`PromotionStrategy::DeleteThenCopy`] is kept for buckets whose
//! policy forbids overwriting.

use enum_iterator::IntoEnumIterator;
use eyre::Result;
use itertools::Itertools;
use serde::{
    Deserialize,
    Serialize,
};
use std::str::FromStr;

#[allow(unused_imports)]
use tracing::{
    debug,
    error,
    info,
    warn,
};

use crate::{
    error::DeployError,
    namespacing::{
        join_key,
        versioned_exe_name,
        versioned_releases_name,
        RELEASES_FILE,
    },
    storage::ObjectStore,
};

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, IntoEnumIterator,
)]
#[serde(rename_all = "kebab-case")]
pub enum PromotionStrategy {
    /// copy over the alias, no delete
    Overwrite,
    /// delete the alias, then copy (alias briefly missing)
    DeleteThenCopy,
}

impl Default for PromotionStrategy {
    fn default() -> Self {
        Self::Overwrite
    }
}

impl FromStr for PromotionStrategy {
    type Err = eyre::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        matched_variant!(Self, s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromoteOptions {
    pub strategy: PromotionStrategy,
    /// with [`PromotionStrategy::DeleteThenCopy`]: a failed delete skips the copy
    /// and counts as a failure instead of being logged and ignored
    pub strict_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasPair {
    /// stable key, e.g. `win/prod/RELEASES`
    pub alias_key: String,
    /// immutable key of one build, e.g. `win/prod/wire-3.7.1234-RELEASES`
    pub versioned_key: String,
}

impl AliasPair {
    pub fn new(alias_key: impl Into<String>, versioned_key: impl Into<String>) -> Self {
        Self {
            alias_key: alias_key.into(),
            versioned_key: versioned_key.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromoteOutcome {
    Promoted,
    /// lenient mode: delete failed, copy went through anyway
    PromotedDespiteDeleteFailure(String),
    /// strict mode: delete failed, copy not attempted
    DeleteFailed(String),
    /// alias is absent (delete-then-copy) or still stale (overwrite)
    CopyFailed(String),
}

impl PromoteOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, PromoteOutcome::DeleteFailed(_) | PromoteOutcome::CopyFailed(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromoteReport {
    pub entries: Vec<(AliasPair, PromoteOutcome)>,
}

impl PromoteReport {
    pub fn failures(&self) -> Vec<&(AliasPair, PromoteOutcome)> {
        self.entries
            .iter()
            .filter(|(_, outcome)| outcome.is_failure())
            .collect()
    }

    pub fn into_result(self) -> Result<Self> {
        let failures = self.failures();
        if failures.is_empty() {
            return Ok(self);
        }
        let message = failures
            .iter()
            .map(|(pair, outcome)| format!("{} :: {:?}", pair.alias_key, outcome))
            .join("; ");
        Err(DeployError::remote("promoting aliases", None, message).into())
    }
}

async fn promote_pair(
    store: &dyn ObjectStore,
    pair: &AliasPair,
    options: PromoteOptions,
) -> PromoteOutcome {
    let mut delete_failure = None;
    if options.strategy == PromotionStrategy::DeleteThenCopy {
        info!("deleting \"{}\" ...", pair.alias_key);
        if let Err(e) = store.delete_object(&pair.alias_key).await {
            if options.strict_delete {
                error!("deleting \"{}\" failed, not copying :: {e:?}", pair.alias_key);
                return PromoteOutcome::DeleteFailed(e.to_string());
            }
            warn!("deleting \"{}\" failed, copying anyway :: {e}", pair.alias_key);
            delete_failure = Some(e.to_string());
        }
    }

    info!(
        "copying \"{0}/{1}\" to \"{0}/{2}\" ...",
        store.bucket_name(),
        pair.versioned_key,
        pair.alias_key
    );
    match store.copy_object(&pair.versioned_key, &pair.alias_key).await {
        Ok(()) => match delete_failure {
            Some(reason) => PromoteOutcome::PromotedDespiteDeleteFailure(reason),
            None => PromoteOutcome::Promoted,
        },
        Err(e) => {
            error!(
                "copying \"{}\" to \"{}\" failed :: {e:?}",
                pair.versioned_key, pair.alias_key
            );
            PromoteOutcome::CopyFailed(e.to_string())
        }
    }
}

/// Promotes every pair in order. A failing pair does not stop the others;
/// nothing is rolled back.
pub async fn promote(
    store: &dyn ObjectStore,
    pairs: &[AliasPair],
    options: PromoteOptions,
) -> PromoteReport {
    let mut report = PromoteReport::default();
    for pair in pairs {
        let outcome = promote_pair(store, pair, options).await;
        report.entries.push((pair.clone(), outcome));
    }
    info!(
        "promoted {}/{} alias(es) on {}",
        report.entries.len() - report.failures().len(),
        report.entries.len(),
        store.bucket_name()
    );
    report
}

/// `RELEASES` and installer aliases of a windows build; the installer alias
/// keeps the local file name (`WireSetup.exe`, `WireInternal-Setup.exe`)
pub fn windows_release_aliases(
    prefix: &str,
    app_short_name: &str,
    setup_exe_file_name: &str,
    version: &str,
) -> Vec<AliasPair> {
    vec![
        AliasPair::new(
            join_key(prefix, RELEASES_FILE),
            join_key(prefix, &versioned_releases_name(app_short_name, version)),
        ),
        AliasPair::new(
            join_key(prefix, setup_exe_file_name),
            join_key(prefix, &versioned_exe_name(app_short_name, version)),
        ),
    ]
}
