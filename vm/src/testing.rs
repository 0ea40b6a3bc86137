//! Fakes for the process, network and disk seams.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use vmstrap_cmd::{Command, CommandError, CommandOutput, CommandRunner};
use vmstrap_system::{Arch, Size};

use crate::{
    config::VmConfig,
    lifecycle::INSTALL_THRESHOLD_BYTES,
    metadata::{MetadataError, MetadataService},
    paths::Paths,
    provision::{DiskAllocator, ImageFetcher, SetupError},
};

pub(crate) const TEST_IMAGE: &str = "ubuntu-server-arm64";

pub(crate) fn test_config(root: &Path, name: &str) -> VmConfig {
    let paths = Paths::new(root);
    VmConfig {
        name: name.to_owned(),
        memory: "4G".parse().unwrap(),
        cpus: "4".parse().unwrap(),
        disk_size: "20G".parse().unwrap(),
        arch: Arch::Arm64,
        image: TEST_IMAGE.to_owned(),
        image_url: format!("http://example.test/{TEST_IMAGE}.iso"),
        image_path: paths.image_file(TEST_IMAGE),
        disk_path: paths.disk_file(name),
        ssh_port: 2225,
        firmware_dir: PathBuf::from("/fw"),
    }
}

#[derive(Default)]
pub(crate) struct CountingFetcher {
    calls: AtomicUsize,
}

impl CountingFetcher {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageFetcher for CountingFetcher {
    async fn fetch(&self, _url: &str, dest: &Path) -> Result<(), SetupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        vmstrap_fs::write_file(dest, b"iso").await?;
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct CountingAllocator {
    calls: AtomicUsize,
}

impl CountingAllocator {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiskAllocator for CountingAllocator {
    async fn allocate(&self, path: &Path, _size: &Size) -> Result<(), SetupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        vmstrap_fs::create_parent_dir(path).await?;
        vmstrap_fs::write_file(path, b"").await?;
        Ok(())
    }
}

#[derive(Default)]
struct RecordedState {
    commands: Vec<Vec<String>>,
    fail_prefixes: Vec<String>,
    copied_in: BTreeMap<String, String>,
    quit_installer: bool,
}

/// Records every command and plays the part of qemu-img, the container
/// engine and qemu well enough for the callers to make progress.
///
/// An installer run (qemu with `-cdrom`) grows the vm disk past the
/// install threshold, unless [`RecordingRunner::quit_installer`] was called.
#[derive(Default)]
pub(crate) struct RecordingRunner {
    state: Mutex<RecordedState>,
}

impl RecordingRunner {
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.commands().iter().map(|argv| argv.join(" ")).collect()
    }

    /// Fail every command whose joined argv starts with `prefix`.
    pub fn fail_when(&self, prefix: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_prefixes
            .push(prefix.to_owned());
    }

    /// Installer runs exit cleanly without writing the disk.
    pub fn quit_installer(&self) {
        self.state.lock().unwrap().quit_installer = true;
    }

    /// Contents of a file copied into the container, by file name.
    pub fn copied_in(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().copied_in.get(name).cloned()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: Command) -> Result<CommandOutput, CommandError> {
        let argv = command.argv();
        let line = argv.join(" ");

        let mut state = self.state.lock().unwrap();
        state.commands.push(argv.clone());

        if state.fail_prefixes.iter().any(|p| line.starts_with(p)) {
            return Err(CommandError::Failure {
                command: line,
                code: Some(1),
                stdout: String::new(),
                stderr: "simulated failure".to_owned(),
            });
        }

        let arg = |i: usize| argv.get(i).map(String::as_str);
        let stdout = match (arg(0), arg(1), arg(2)) {
            (Some("qemu-img"), Some("create"), _) => {
                let disk = Path::new(&argv[4]);
                std::fs::create_dir_all(disk.parent().unwrap()).unwrap();
                std::fs::write(disk, b"").unwrap();
                String::new()
            }
            (Some(program), _, _) if program.starts_with("qemu-system") => {
                let installing = argv.iter().any(|a| a == "-cdrom");
                if installing && !state.quit_installer {
                    // the vm disk is the only drive given as a bare file=
                    let disk = argv
                        .iter()
                        .filter_map(|a| a.strip_prefix("file="))
                        .find(|f| !f.contains(','))
                        .unwrap();
                    let installed = vec![0u8; INSTALL_THRESHOLD_BYTES as usize];
                    std::fs::write(disk, installed).unwrap();
                }
                String::new()
            }
            (_, Some("volume"), Some("create")) => "vol-1\n".to_owned(),
            (_, Some("create"), _) => "ctr-1\n".to_owned(),
            (_, Some("cp"), Some(src)) if src.contains(':') => {
                std::fs::write(&argv[3], b"seed").unwrap();
                String::new()
            }
            (_, Some("cp"), Some(src)) => {
                let src = Path::new(src);
                let name = src.file_name().unwrap().to_string_lossy().into_owned();
                let contents = std::fs::read_to_string(src).unwrap();
                state.copied_in.insert(name, contents);
                String::new()
            }
            _ => String::new(),
        };

        Ok(CommandOutput {
            stdout,
            stderr: String::new(),
        })
    }
}

/// Accepts the listener and holds it until shutdown.
#[derive(Default)]
pub(crate) struct RecordingMetadata {
    served: AtomicUsize,
}

impl RecordingMetadata {
    pub fn served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataService for RecordingMetadata {
    async fn serve(
        &self,
        listener: TcpListener,
        _content_dir: PathBuf,
        shutdown: CancellationToken,
    ) -> Result<(), MetadataError> {
        self.served.fetch_add(1, Ordering::SeqCst);
        shutdown.cancelled().await;
        drop(listener);
        Ok(())
    }
}
