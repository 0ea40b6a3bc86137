use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};
use vmstrap_cmd::{Command, CommandError, CommandRunner};
use vmstrap_fs::{self as fs, FsError};
use vmstrap_http::{HttpClient, HttpError};
use vmstrap_system::Size;

use crate::config::{DISK_FORMAT, VmConfig};

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("failed to download base image from {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: HttpError,
    },

    #[error("failed to allocate disk {path}: {source}")]
    Allocate {
        path: PathBuf,
        #[source]
        source: CommandError,
    },

    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Retrieves a base image to a local path.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), SetupError>;
}

#[async_trait]
impl ImageFetcher for HttpClient {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), SetupError> {
        self.download_file(url, dest)
            .await
            .map_err(|source| SetupError::Download {
                url: url.to_owned(),
                source,
            })
    }
}

/// Creates a sparse virtual disk.
#[async_trait]
pub trait DiskAllocator: Send + Sync {
    async fn allocate(&self, path: &Path, size: &Size) -> Result<(), SetupError>;
}

/// Allocates disks with `qemu-img create`.
#[derive(Clone)]
pub struct QemuImg {
    runner: Arc<dyn CommandRunner>,
}

impl QemuImg {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl DiskAllocator for QemuImg {
    async fn allocate(&self, path: &Path, size: &Size) -> Result<(), SetupError> {
        let mut command = Command::new("qemu-img");
        command
            .arg("create")
            .args(["-f", DISK_FORMAT])
            .arg(path)
            .arg(size.to_string())
            .capture(true);

        self.runner
            .run(command)
            .await
            .map_err(|source| SetupError::Allocate {
                path: path.to_owned(),
                source,
            })?;

        Ok(())
    }
}

/// What [`ensure`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProvisionReport {
    pub image_fetched: bool,
    pub disk_created: bool,
}

/// Make sure the base image and the vm disk exist.
///
/// Each step is skipped when its file is already present. Presence is the
/// only check: a file is never re-validated.
#[instrument(skip_all, fields(vm = %config.name, image = %config.image))]
pub async fn ensure(
    config: &VmConfig,
    fetcher: &dyn ImageFetcher,
    allocator: &dyn DiskAllocator,
) -> Result<ProvisionReport, SetupError> {
    let mut report = ProvisionReport::default();

    if !fs::path_exists(&config.image_path).await? {
        fs::create_parent_dir(&config.image_path).await?;
        info!("downloading image...");
        fetcher.fetch(&config.image_url, &config.image_path).await?;
        report.image_fetched = true;
    }

    if !fs::path_exists(&config.disk_path).await? {
        fs::create_parent_dir(&config.disk_path).await?;
        info!("creating {DISK_FORMAT} disk of {}", config.disk_size);
        allocator
            .allocate(&config.disk_path, &config.disk_size)
            .await?;
        report.disk_created = true;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_config, CountingAllocator, CountingFetcher, RecordingRunner};
    use tempfile::TempDir;

    #[tokio::test]
    async fn second_call_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), "dev");
        let fetcher = CountingFetcher::default();
        let allocator = CountingAllocator::default();

        let first = ensure(&config, &fetcher, &allocator).await.unwrap();
        let second = ensure(&config, &fetcher, &allocator).await.unwrap();

        assert_eq!(
            first,
            ProvisionReport {
                image_fetched: true,
                disk_created: true
            }
        );
        assert_eq!(second, ProvisionReport::default());
        assert_eq!(fetcher.count(), 1);
        assert_eq!(allocator.count(), 1);
    }

    #[tokio::test]
    async fn existing_image_still_gets_a_disk() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), "dev");
        fs::create_parent_dir(&config.image_path).await.unwrap();
        fs::write_file(&config.image_path, b"iso").await.unwrap();

        let fetcher = CountingFetcher::default();
        let allocator = CountingAllocator::default();
        let report = ensure(&config, &fetcher, &allocator).await.unwrap();

        assert!(!report.image_fetched);
        assert!(report.disk_created);
        assert_eq!(fetcher.count(), 0);
        assert!(fs::path_exists(&config.disk_path).await.unwrap());
    }

    #[tokio::test]
    async fn qemu_img_invocation() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), "dev");
        let runner = Arc::new(RecordingRunner::default());
        let allocator = QemuImg::new(runner.clone());

        allocator
            .allocate(&config.disk_path, &config.disk_size)
            .await
            .unwrap();

        assert_eq!(
            runner.commands(),
            vec![vec![
                "qemu-img".to_owned(),
                "create".to_owned(),
                "-f".to_owned(),
                "qcow2".to_owned(),
                config.disk_path.display().to_string(),
                "20G".to_owned(),
            ]]
        );
    }

    #[tokio::test]
    async fn allocation_failure_is_a_setup_error() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), "dev");
        let runner = Arc::new(RecordingRunner::default());
        runner.fail_when("qemu-img");

        let fetcher = CountingFetcher::default();
        let err = ensure(&config, &fetcher, &QemuImg::new(runner))
            .await
            .unwrap_err();

        assert!(matches!(err, SetupError::Allocate { .. }));
    }
}
