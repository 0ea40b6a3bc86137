use clap::Parser;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;
use vmstrap_system::{CpuCount, Size};
use vmstrap_vm::{
    CatalogError, ConfigurationError, Context, ContextError, DEFAULT_CONTAINER_ENGINE,
    DEFAULT_CONTAINER_IMAGE, DEFAULT_FIRMWARE_DIR, DEFAULT_HOSTNAME, DEFAULT_USERNAME,
    ImageCatalog, PasswordHash, Paths, ResolveOptions, RunError, RunOptions, SeedError, resolve,
};

#[derive(Parser, Debug)]
#[command(name = "vmstrap", version, about = "Install and boot a local qemu virtual machine")]
pub struct Cli {
    /// Name of the vm, which also names its disk
    pub vm_name: String,

    /// Memory size, e.g. 4G
    #[arg(long, default_value = "4G")]
    pub memory: Size,

    /// Number of virtual CPUs
    #[arg(long = "nof-cpu", default_value = "4")]
    pub cpus: CpuCount,

    /// Size of the vm disk, e.g. 20G
    #[arg(long, default_value = "20G")]
    pub disk_size: Size,

    /// Base image id from the image catalog
    #[arg(long, default_value = "ubuntu-server-arm64")]
    pub base_image: String,

    /// Host port forwarded to the guest's ssh port
    #[arg(long, default_value_t = 2225)]
    pub ssh_port: u16,

    /// Directory holding base images, disks and scratch files
    #[arg(long, env = "VMSTRAP_ROOT", default_value = ".")]
    pub root: PathBuf,

    /// Image catalog file, defaults to <root>/images.toml or the built-in catalog
    #[arg(long = "catalog", env = "VMSTRAP_CATALOG")]
    pub catalog_path: Option<PathBuf>,

    /// Directory containing the UEFI firmware
    #[arg(long, env = "VMSTRAP_FIRMWARE_DIR", default_value = DEFAULT_FIRMWARE_DIR)]
    pub firmware_dir: PathBuf,

    /// Host name of the installed system
    #[arg(long, default_value = DEFAULT_HOSTNAME)]
    pub hostname: String,

    /// User created on the installed system
    #[arg(long, default_value = DEFAULT_USERNAME)]
    pub username: String,

    /// crypt(3) password hash for the user, required to install
    #[arg(long, env = "VMSTRAP_PASSWORD_HASH", hide_env_values = true, value_parser = parse_password_hash)]
    pub password_hash: Option<PasswordHash>,

    /// Port of the metadata service run during install
    #[arg(long, default_value_t = vmstrap_vm::DEFAULT_METADATA_PORT)]
    pub metadata_port: u16,

    /// Container engine used to build the seed image
    #[arg(long, env = "VMSTRAP_CONTAINER_ENGINE", default_value = DEFAULT_CONTAINER_ENGINE)]
    pub container_engine: String,

    #[arg(long = "log", default_value = "info")]
    pub log: String,
}

fn parse_password_hash(value: &str) -> Result<PasswordHash, SeedError> {
    PasswordHash::new(value)
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("failed to resolve root directory {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Run(#[from] RunError),
}

pub async fn run(cli: Cli) -> Result<(), AppError> {
    let Cli {
        vm_name,
        memory,
        cpus,
        disk_size,
        base_image,
        ssh_port,
        root,
        catalog_path,
        firmware_dir,
        hostname,
        username,
        password_hash,
        metadata_port,
        container_engine,
        log: _,
    } = cli;

    let root = std::path::absolute(&root).map_err(|source| AppError::Root {
        path: root.clone(),
        source,
    })?;
    let paths = Paths::new(root);

    let catalog = ImageCatalog::discover(catalog_path.as_deref(), &paths).await?;
    let config = resolve(
        &paths,
        &catalog,
        ResolveOptions {
            vm_name,
            memory,
            cpus,
            disk_size,
            base_image,
            ssh_port,
            firmware_dir,
        },
    )?;

    let ctx = Context::new(paths)?;
    let options = RunOptions {
        hostname,
        username,
        password_hash,
        container_engine,
        container_image: DEFAULT_CONTAINER_IMAGE.to_owned(),
        metadata_port,
    };

    let outcome = vmstrap_vm::run(&ctx, &config, options).await?;
    info!("vm {} exited after {}", config.name, outcome.state);

    Ok(())
}
