use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;
use vmstrap_system::{Arch, CpuCount, ParseArchError, Size};

use crate::{images::ImageCatalog, paths::Paths};

pub const DEFAULT_FIRMWARE_DIR: &str = "/opt/homebrew/share/qemu";

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("unknown base image '{image}', available: {available}")]
    UnknownImage { image: String, available: String },

    #[error("base image '{image}' has an unknown architecture: {source}")]
    UnknownArch {
        image: String,
        #[source]
        source: ParseArchError,
    },

    #[error("architecture '{arch}' is not supported")]
    UnsupportedArch { arch: Arch },

    #[error("invalid vm name '{name}': {reason}")]
    InvalidVmName { name: String, reason: &'static str },

    #[error("ssh port must be a positive integer")]
    InvalidSshPort,

    #[error("no password hash given, one is required to install a new vm")]
    MissingCredential,
}

/// Disks are always qcow2: the file starts small and grows as the guest
/// writes, which the install-size check depends on.
pub const DISK_FORMAT: &str = "qcow2";

/// A fully-resolved virtual machine. Immutable once built by [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    pub name: String,
    pub memory: Size,
    pub cpus: CpuCount,
    pub disk_size: Size,
    pub arch: Arch,
    pub image: String,
    pub image_url: String,
    pub image_path: PathBuf,
    pub disk_path: PathBuf,
    pub ssh_port: u16,
    pub firmware_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub vm_name: String,
    pub memory: Size,
    pub cpus: CpuCount,
    pub disk_size: Size,
    pub base_image: String,
    pub ssh_port: u16,
    pub firmware_dir: PathBuf,
}

/// Merge command-line intent with the image catalog.
pub fn resolve(
    paths: &Paths,
    catalog: &ImageCatalog,
    options: ResolveOptions,
) -> Result<VmConfig, ConfigurationError> {
    let ResolveOptions {
        vm_name,
        memory,
        cpus,
        disk_size,
        base_image,
        ssh_port,
        firmware_dir,
    } = options;

    validate_vm_name(&vm_name)?;
    if ssh_port == 0 {
        return Err(ConfigurationError::InvalidSshPort);
    }

    let Some(entry) = catalog.get(&base_image) else {
        return Err(ConfigurationError::UnknownImage {
            image: base_image,
            available: catalog.ids().collect::<Vec<_>>().join(", "),
        });
    };

    let arch = entry
        .arch
        .parse::<Arch>()
        .map_err(|source| ConfigurationError::UnknownArch {
            image: base_image.clone(),
            source,
        })?;

    let config = VmConfig {
        memory,
        cpus,
        disk_size,
        arch,
        image_url: entry.url.clone(),
        image_path: paths.image_file(&base_image),
        disk_path: paths.disk_file(&vm_name),
        image: base_image,
        name: vm_name,
        ssh_port,
        firmware_dir,
    };

    debug!("resolved vm config: {config:?}");

    Ok(config)
}

fn validate_vm_name(name: &str) -> Result<(), ConfigurationError> {
    let invalid = |reason| ConfigurationError::InvalidVmName {
        name: name.to_owned(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.starts_with('.') {
        return Err(invalid("must not start with '.'"));
    }
    if name.contains(['/', '\\']) {
        return Err(invalid("must not contain path separators"));
    }
    Ok(())
}
