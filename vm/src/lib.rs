mod config;
mod context;
mod images;
mod lifecycle;
mod metadata;
mod paths;
mod provision;
mod qemu;
mod run;
mod seed;

#[cfg(test)]
mod testing;

pub use crate::config::{
    ConfigurationError, DEFAULT_FIRMWARE_DIR, DISK_FORMAT, ResolveOptions, VmConfig, resolve,
};
pub use crate::context::{Context, ContextError};
pub use crate::images::{CatalogEntry, CatalogError, ImageCatalog};
pub use crate::lifecycle::{INSTALL_THRESHOLD_BYTES, LifecycleState};
pub use crate::metadata::{
    CloudInitServer, DEFAULT_METADATA_PORT, MetadataError, MetadataHandle, MetadataService,
};
pub use crate::paths::Paths;
pub use crate::provision::{DiskAllocator, ImageFetcher, ProvisionReport, QemuImg, SetupError};
pub use crate::qemu::{LaunchCommand, LaunchProfile, build_launch_command};
pub use crate::run::{RunError, RunOptions, RunOutcome, run};
pub use crate::seed::{
    DEFAULT_CONTAINER_ENGINE, DEFAULT_CONTAINER_IMAGE, DEFAULT_HOSTNAME, DEFAULT_USERNAME,
    PasswordHash, SeedError, SeedOptions,
};
