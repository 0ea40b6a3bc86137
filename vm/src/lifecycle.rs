use std::fmt::Display;
use tracing::{debug, warn};
use vmstrap_fs::{self as fs, FsError};

use crate::{config::VmConfig, paths::Paths};

/// A disk at or above this many bytes has an installed system on it.
pub const INSTALL_THRESHOLD_BYTES: u64 = 200_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Install the guest from the base image.
    Bootstrap,
    /// Boot the installed guest.
    Resume,
}

impl LifecycleState {
    /// Classify by disk size alone. A missing disk needs a bootstrap.
    pub fn from_disk_size(size: Option<u64>) -> Self {
        match size {
            Some(size) if size >= INSTALL_THRESHOLD_BYTES => LifecycleState::Resume,
            _ => LifecycleState::Bootstrap,
        }
    }

    /// Decide what this run has to do for `config`.
    ///
    /// An interrupted bootstrap (pending marker present) always bootstraps
    /// again, whatever the disk size. Otherwise the disk size decides; an
    /// install marker never lifts a disk below the threshold to Resume.
    pub async fn detect(paths: &Paths, config: &VmConfig) -> Result<Self, FsError> {
        if fs::path_exists(paths.pending_marker_file(&config.name)).await? {
            debug!("previous install did not complete");
            return Ok(LifecycleState::Bootstrap);
        }

        let size = fs::file_size(&config.disk_path).await?;
        debug!("disk size: {size:?}");
        let state = Self::from_disk_size(size);

        if state == LifecycleState::Bootstrap
            && fs::path_exists(paths.installed_marker_file(&config.name)).await?
        {
            warn!(
                "vm is marked installed but its disk is below {INSTALL_THRESHOLD_BYTES} bytes, installing again"
            );
        }

        Ok(state)
    }
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LifecycleState::Bootstrap => "bootstrap",
            LifecycleState::Resume => "resume",
        })
    }
}

pub async fn mark_bootstrap_started(paths: &Paths, vm_name: &str) -> Result<(), FsError> {
    let marker = paths.pending_marker_file(vm_name);
    fs::create_parent_dir(&marker).await?;
    fs::write_file(&marker, b"").await?;
    fs::remove_file_if_exists(paths.installed_marker_file(vm_name)).await
}

/// Whether the disk is large enough to hold an installed system.
pub async fn disk_is_installed(config: &VmConfig) -> Result<bool, FsError> {
    let size = fs::file_size(&config.disk_path).await?;
    Ok(LifecycleState::from_disk_size(size) == LifecycleState::Resume)
}

pub async fn mark_install_complete(paths: &Paths, vm_name: &str) -> Result<(), FsError> {
    let marker = paths.installed_marker_file(vm_name);
    fs::create_parent_dir(&marker).await?;
    fs::write_file_atomic(&marker, b"").await?;
    fs::remove_file_if_exists(paths.pending_marker_file(vm_name)).await
}
