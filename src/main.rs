use clap::{
    Parser,
    Subcommand,
};
use eyre::{
    Result,
    WrapErr,
};
use std::path::{
    Path,
    PathBuf,
};

#[allow(unused_imports)]
use tracing::{
    debug,
    error,
    info,
    trace,
    warn,
};

macro_rules! env_required {
    ($env:literal) => {
        std::env::var($env)
            .map_err(|_| crate::error::DeployError::MissingInput(format!("{} missing", $env)))?
    };
}

macro_rules! matched_variant {
    ($Self:ty, $v:expr) => {{
        Self::into_enum_iter()
            .find(|v| serde_variant::to_variant_name(v).expect("bad variant?") == $v)
            .ok_or(eyre::eyre!(
                "{} hasn't matched any variant of {}",
                $v,
                std::any::type_name::<$Self>()
            ))
    }};
}

mod config;
mod discovery;
mod distribution;
mod error;
mod localization;
mod metadata;
mod namespacing;
mod promoter;
mod publisher;
mod release_draft;
mod storage;
mod version;

use crate::{
    config::DeployConfig,
    distribution::{
        DistributionApi,
        DryRunDistribution,
        HockeyClient,
        VersionMetadata,
    },
    error::DeployError,
    promoter::{
        PromoteOptions,
        PromotionStrategy,
    },
    release_draft::{
        DraftRequest,
        DryRunReleases,
        GitHubClient,
        ReleaseApi,
        DEFAULT_REPO_SLUG,
    },
    version::{
        resolve_build,
        BuildTarget,
        Platform,
    },
};

const DEFAULT_PUBLISH_PATH: &str = "./wrap";
const DEFAULT_LOCALE_DIR: &str = "electron/locale";
const DEFAULT_CROWDIN_IDENTITY: &str = "keys/crowdin.yaml";

#[derive(clap::Args, Debug)]
struct BuildArgs {
    /// build label, e.g. "Windows#3.7.1234"
    #[clap(short, long, env = "WRAPPER_BUILD", value_name = "JOB#VERSION")]
    wrapper_build: Option<String>,
    /// take the version from this info.json instead of the build label
    #[clap(long, value_name = "FILE")]
    info_json: Option<PathBuf>,
    /// override the platform named by the build label
    #[clap(long)]
    platform: Option<Platform>,
}

impl BuildArgs {
    fn resolve(&self) -> Result<BuildTarget> {
        let target = resolve_build(
            self.wrapper_build.as_deref(),
            self.info_json.as_deref(),
            self.platform,
        )
        .wrap_err("resolving build")?;
        info!("{} build {}", target.platform, target.version);
        Ok(target)
    }
}

#[derive(clap::Args, Debug)]
struct StorageArgs {
    /// S3 bucket to write to
    #[clap(short, long, env = "BUCKET")]
    bucket: Option<String>,
    /// base path inside the bucket, e.g. "win/prod"
    #[clap(short, long, env = "S3_PATH", default_value = "")]
    s3_path: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// upload the build artifacts of one platform to S3
    Publish {
        #[clap(flatten)]
        build: BuildArgs,
        #[clap(flatten)]
        storage: StorageArgs,
        /// directory searched for artifacts
        #[clap(short, long, value_name = "DIR", default_value = DEFAULT_PUBLISH_PATH)]
        path: PathBuf,
    },
    /// point the windows "latest" keys (RELEASES, <App>Setup.exe) at this build
    Promote {
        #[clap(flatten)]
        build: BuildArgs,
        #[clap(flatten)]
        storage: StorageArgs,
        #[clap(short, long, value_name = "DIR", default_value = ".")]
        path: PathBuf,
    },
    /// upload the installer to HockeyApp for internal testing
    Distribute {
        #[clap(flatten)]
        build: BuildArgs,
        #[clap(long, env = "HOCKEY_ID")]
        hockey_id: Option<String>,
        #[clap(long, env = "HOCKEY_TOKEN", hide_env_values = true)]
        hockey_token: Option<String>,
        #[clap(short, long, value_name = "DIR", default_value = ".")]
        path: PathBuf,
    },
    /// create a GitHub release draft and attach the installers; the draft is
    /// deleted again if an upload fails
    Draft {
        #[clap(flatten)]
        build: BuildArgs,
        #[clap(long, env = "GITHUB_ACCESS_TOKEN", hide_env_values = true)]
        github_token: Option<String>,
        /// owner/name of the repository
        #[clap(long, env = "GITHUB_REPO", default_value = DEFAULT_REPO_SLUG)]
        repo: String,
        #[clap(short, long, value_name = "DIR", default_value = ".")]
        path: PathBuf,
    },
    /// normalize the translation files downloaded from Crowdin
    Translate {
        #[clap(long, value_name = "DIR", default_value = DEFAULT_LOCALE_DIR)]
        locale_dir: PathBuf,
        /// upload sources to and download translations from Crowdin first
        #[clap(long)]
        sync: bool,
        #[clap(long, value_name = "FILE", default_value = DEFAULT_CROWDIN_IDENTITY)]
        crowdin_identity: PathBuf,
    },
}

/// CI helper publishing desktop app releases
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Args {
    /// just log what would be uploaded, copied or deleted
    #[clap(short, long, global = true)]
    dry_run: bool,
    /// fail when an artifact lookup matches more than one file
    #[clap(long, global = true)]
    strict_discovery: bool,
    #[clap(long, global = true, default_value = "overwrite", value_name = "STRATEGY")]
    /// how aliases are replaced: "overwrite" or "delete-then-copy"
    promotion_strategy: PromotionStrategy,
    /// with delete-then-copy: a failed delete skips the copy
    #[clap(long, global = true)]
    strict_delete: bool,
    #[clap(subcommand)]
    command: Command,
}

impl Args {
    fn deploy_config(&self) -> DeployConfig {
        DeployConfig {
            dry_run: self.dry_run,
            strict_discovery: self.strict_discovery,
            promote: PromoteOptions {
                strategy: self.promotion_strategy,
                strict_delete: self.strict_delete,
            },
        }
    }
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| DeployError::MissingInput(format!("{name} missing")).into())
}

async fn run_publish(
    config: &DeployConfig,
    build: &BuildArgs,
    storage_args: &StorageArgs,
    path: &Path,
) -> Result<()> {
    let target = build.resolve()?;
    let plan = publisher::upload_plan(&target, path, &storage_args.s3_path, config.strict_discovery)
        .wrap_err("finding artifacts")?;
    let store = storage::connect(config, storage_args.bucket.clone())?;
    publisher::publish(&*store, &plan)
        .await
        .into_result()
        .wrap_err("publishing artifacts")?;
    info!("done uploading to S3");
    Ok(())
}

async fn run_promote(
    config: &DeployConfig,
    build: &BuildArgs,
    storage_args: &StorageArgs,
    path: &Path,
) -> Result<()> {
    let target = build.resolve()?;
    if target.platform != Platform::Windows {
        return Err(DeployError::MissingInput(format!(
            "promoting aliases is supported only for Windows, not {}",
            target.platform
        ))
        .into());
    }
    let nupkg = discovery::locate(path, "-full.nupkg", config.strict_discovery)?;
    let setup_exe = discovery::locate(path, namespacing::SETUP_EXE_SUFFIX, config.strict_discovery)?;
    let short_name = namespacing::app_short_name(&nupkg.file_name)?;
    let full_name = namespacing::app_full_name(&setup_exe.file_name)?;
    info!("promoting {full_name} ({short_name}) {}", target.version);
    let pairs = promoter::windows_release_aliases(
        &storage_args.s3_path,
        &short_name,
        &setup_exe.file_name,
        &target.version,
    );
    let store = storage::connect(config, storage_args.bucket.clone())?;
    promoter::promote(&*store, &pairs, config.promote)
        .await
        .into_result()
        .wrap_err("updating releases on S3")?;
    info!("done updating releases on S3");
    Ok(())
}

async fn run_distribute(
    config: &DeployConfig,
    build: &BuildArgs,
    hockey_id: Option<String>,
    hockey_token: Option<String>,
    path: &Path,
) -> Result<()> {
    let target = build.resolve()?;
    let api: Box<dyn DistributionApi> = if config.dry_run {
        Box::new(DryRunDistribution)
    } else {
        Box::new(HockeyClient::new(
            required(hockey_id, "HOCKEY_ID")?,
            required(hockey_token, "HOCKEY_TOKEN")?,
        ))
    };
    let installer = distribution::locate_installer(path, target.platform, config.strict_discovery)?;
    let metadata = VersionMetadata::from_version(&target.version)?;
    let archive = distribution::compress(&installer.path).wrap_err("compressing installer")?;
    let version_id = distribution::distribute(&*api, &metadata, &archive).await?;
    info!("done uploading version {version_id} to Hockey");
    Ok(())
}

async fn run_draft(
    config: &DeployConfig,
    build: &BuildArgs,
    github_token: Option<String>,
    repo: &str,
    path: &Path,
) -> Result<()> {
    let target = build.resolve()?;
    let api: Box<dyn ReleaseApi> = if config.dry_run {
        Box::new(DryRunReleases)
    } else {
        Box::new(GitHubClient::new(repo, required(github_token, "GITHUB_ACCESS_TOKEN")?)?)
    };
    let commitish = match metadata::commit_hash() {
        Ok(hash) => hash,
        Err(e) if config.dry_run => {
            warn!("no commit hash: {e:?}");
            "HEAD".to_string()
        }
        Err(e) => return Err(e.wrap_err("reading commit to tag")),
    };
    let changelog = release_draft::changelog_template(
        target.platform,
        &target.version,
        chrono::Utc::now().date_naive(),
    );
    let request = DraftRequest::new(target.platform, &target.version, &commitish, &changelog);
    let assets = release_draft::release_assets(path, target.platform)?;
    debug!(?assets);
    release_draft::create_draft_with_assets(&*api, &request, &assets).await?;
    info!("done creating GitHub draft");
    Ok(())
}

fn run_translate(config: &DeployConfig, locale_dir: &Path, sync: bool, crowdin_identity: &Path) -> Result<()> {
    if sync {
        localization::sync_with_crowdin(crowdin_identity, ".", config.dry_run)?;
    }
    if config.dry_run {
        info!("[dry run] would normalize {}", locale_dir.display());
        return Ok(());
    }
    localization::transform_locale_dir(locale_dir, &localization::SUPPORTED_LOCALES)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    color_eyre::install().ok();
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let config = args.deploy_config();
    debug!(?config);
    if config.dry_run {
        warn!("dry run, no remote state will change");
    }

    match &args.command {
        Command::Publish {
            build,
            storage,
            path,
        } => run_publish(&config, build, storage, path).await?,
        Command::Promote {
            build,
            storage,
            path,
        } => run_promote(&config, build, storage, path).await?,
        Command::Distribute {
            build,
            hockey_id,
            hockey_token,
            path,
        } => run_distribute(&config, build, hockey_id.clone(), hockey_token.clone(), path).await?,
        Command::Draft {
            build,
            github_token,
            repo,
            path,
        } => run_draft(&config, build, github_token.clone(), repo, path).await?,
        Command::Translate {
            locale_dir,
            sync,
            crowdin_identity,
        } => run_translate(&config, locale_dir, *sync, crowdin_identity)?,
    }
    info!("DONE");
    Ok(())
}
