use std::path::Path;
use thiserror::Error;
use tracing::{info, instrument, warn};
use vmstrap_cmd::CommandError;
use vmstrap_fs::{self as fs, FsError};

use crate::{
    config::{ConfigurationError, VmConfig},
    context::Context,
    lifecycle::{self, INSTALL_THRESHOLD_BYTES, LifecycleState},
    metadata::{self, DEFAULT_METADATA_PORT, MetadataError},
    provision::{self, ProvisionReport, SetupError},
    qemu::{LaunchCommand, build_launch_command},
    seed::{self, DEFAULT_CONTAINER_ENGINE, DEFAULT_CONTAINER_IMAGE, PasswordHash, SeedError, SeedOptions},
};

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Seed(#[from] SeedError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("virtual machine exited with an error: {0}")]
    Engine(#[source] CommandError),

    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Inputs only a bootstrap needs.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub hostname: String,
    pub username: String,
    pub password_hash: Option<PasswordHash>,
    pub container_engine: String,
    pub container_image: String,
    pub metadata_port: u16,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            hostname: seed::DEFAULT_HOSTNAME.to_owned(),
            username: seed::DEFAULT_USERNAME.to_owned(),
            password_hash: None,
            container_engine: DEFAULT_CONTAINER_ENGINE.to_owned(),
            container_image: DEFAULT_CONTAINER_IMAGE.to_owned(),
            metadata_port: DEFAULT_METADATA_PORT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub state: LifecycleState,
    pub provision: ProvisionReport,
}

/// Provision, then install or boot the vm, returning once qemu exits.
#[instrument(skip_all, fields(vm = %config.name))]
pub async fn run(
    ctx: &Context,
    config: &VmConfig,
    options: RunOptions,
) -> Result<RunOutcome, RunError> {
    // Fails for unsupported architectures before anything touches disk.
    let launch = build_launch_command(config)?;

    let provision = provision::ensure(config, ctx.fetcher(), ctx.allocator()).await?;

    let state = LifecycleState::detect(ctx.paths(), config).await?;
    info!("vm state: {state}");

    match state {
        LifecycleState::Resume => launch_engine(ctx, &launch).await?,
        LifecycleState::Bootstrap => bootstrap(ctx, config, options, launch).await?,
    }

    Ok(RunOutcome { state, provision })
}

async fn bootstrap(
    ctx: &Context,
    config: &VmConfig,
    options: RunOptions,
    launch: LaunchCommand,
) -> Result<(), RunError> {
    let RunOptions {
        hostname,
        username,
        password_hash,
        container_engine,
        container_image,
        metadata_port,
    } = options;

    let password_hash = password_hash.ok_or(ConfigurationError::MissingCredential)?;
    let seed_options = SeedOptions {
        hostname,
        username,
        password_hash,
        container_engine,
        container_image,
    };
    seed_options.validate()?;

    let paths = ctx.paths();
    let scratch_dir = paths.scratch_dir(&config.name);
    let seed_image = paths.seed_image_file(&config.name);

    lifecycle::mark_bootstrap_started(paths, &config.name).await?;

    let service = metadata::start(ctx.metadata(), metadata_port, scratch_dir.clone()).await?;

    let result = install(ctx, config, &seed_options, launch).await;

    let stopped = service.stop().await;
    let result = match (result, stopped) {
        (Ok(()), stopped) => stopped.map_err(RunError::from),
        (Err(error), Ok(())) => Err(error),
        (Err(error), Err(stop_error)) => {
            warn!("metadata service failed: {stop_error}");
            Err(error)
        }
    };

    discard_seed(&seed_image, &scratch_dir).await;
    result?;

    if lifecycle::disk_is_installed(config).await? {
        lifecycle::mark_install_complete(paths, &config.name).await?;
        info!("install complete");
    } else {
        warn!(
            "installer exited before the disk reached {INSTALL_THRESHOLD_BYTES} bytes, vm {} will install again on the next run",
            config.name
        );
    }

    Ok(())
}

/// The seed belongs to a single bootstrap attempt.
async fn discard_seed(seed_image: &Path, scratch_dir: &Path) {
    if let Err(error) = fs::remove_file_if_exists(seed_image).await {
        warn!("failed to remove seed image: {error}");
    }
    if fs::path_exists(scratch_dir).await.unwrap_or(true) {
        if let Err(error) = fs::remove_dir(scratch_dir).await {
            warn!("failed to remove seed scratch directory: {error}");
        }
    }
}

async fn install(
    ctx: &Context,
    config: &VmConfig,
    seed_options: &SeedOptions,
    launch: LaunchCommand,
) -> Result<(), RunError> {
    let paths = ctx.paths();
    let seed = seed::generate(
        ctx.runner(),
        seed_options,
        &paths.scratch_dir(&config.name),
        &paths.seed_image_file(&config.name),
    )
    .await?;

    let launch = launch
        .with_install_medium(&config.image_path)
        .with_seed_drive(&seed);
    launch_engine(ctx, &launch).await
}

async fn launch_engine(ctx: &Context, launch: &LaunchCommand) -> Result<(), RunError> {
    info!("starting vm...");
    ctx.runner()
        .run(launch.to_command())
        .await
        .map_err(RunError::Engine)?;
    Ok(())
}
