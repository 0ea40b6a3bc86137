use std::path::Path;
use tracing::{debug, warn};
use vmstrap_cmd::{Command, CommandRunner};

use super::SeedError;

/// A container and its volume, created for one seed build.
///
/// Call [`Sandbox::release`] on every path. If the sandbox is dropped
/// without it (the future was cancelled), the drop handler removes both
/// resources with blocking engine calls.
pub(super) struct Sandbox<'a> {
    runner: &'a dyn CommandRunner,
    engine: String,
    volume: String,
    container: String,
    released: bool,
}

impl<'a> Sandbox<'a> {
    pub async fn acquire(
        runner: &'a dyn CommandRunner,
        engine: &str,
        image: &str,
        script: &str,
    ) -> Result<Sandbox<'a>, SeedError> {
        let mut create_volume = Command::new(engine);
        create_volume.args(["volume", "create"]);
        let volume = run_for_id(runner, create_volume, "create volume").await?;
        debug!("created volume {volume}");

        let mut create_container = Command::new(engine);
        create_container
            .arg("create")
            .args(["-v", &format!("{volume}:/root")])
            .args(["-w", "/root"])
            .arg(image)
            .args(["sh", script]);

        let container = match run_for_id(runner, create_container, "create container").await {
            Ok(container) => container,
            Err(error) => {
                if let Err(release_error) = remove_volume(runner, engine, &volume).await {
                    warn!("failed to remove volume {volume}: {release_error}");
                }
                return Err(error);
            }
        };
        debug!("created container {container}");

        Ok(Sandbox {
            runner,
            engine: engine.to_owned(),
            volume,
            container,
            released: false,
        })
    }

    pub async fn copy_in(&self, file: &Path, guest_dir: &str) -> Result<(), SeedError> {
        let mut command = self.command();
        command
            .arg("cp")
            .arg(file)
            .arg(format!("{}:{guest_dir}", self.container))
            .capture(true);
        self.exec(command, "copy file into container").await
    }

    /// Start the container attached, blocking until its script exits.
    pub async fn run(&self) -> Result<(), SeedError> {
        let mut command = self.command();
        command.args(["start", "-a", &self.container]);
        self.exec(command, "run seed script").await
    }

    pub async fn copy_out(&self, guest_file: &str, host_path: &Path) -> Result<(), SeedError> {
        let mut command = self.command();
        command
            .arg("cp")
            .arg(format!("{}:{guest_file}", self.container))
            .arg(host_path)
            .capture(true);
        self.exec(command, "copy seed image out").await
    }

    /// Remove the container, then the volume. Both are attempted even if the
    /// first removal fails; the first error is returned.
    pub async fn release(mut self) -> Result<(), SeedError> {
        let mut remove_container = self.command();
        remove_container
            .args(["container", "rm", "-f", &self.container])
            .capture(true);
        let container_result = self.exec(remove_container, "remove container").await;

        let volume_result = remove_volume(self.runner, &self.engine, &self.volume).await;

        // Only now: a release cancelled midway still falls back to the drop guard.
        self.released = true;
        container_result.and(volume_result)
    }

    fn command(&self) -> Command {
        Command::new(&self.engine)
    }

    async fn exec(&self, command: Command, step: &'static str) -> Result<(), SeedError> {
        self.runner
            .run(command)
            .await
            .map_err(|source| SeedError::Command { step, source })?;
        Ok(())
    }
}

impl Drop for Sandbox<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        warn!(
            "seed environment dropped before release, removing container {} and volume {}",
            self.container, self.volume
        );
        let _ = std::process::Command::new(&self.engine)
            .args(["container", "rm", "-f", &self.container])
            .output();
        let _ = std::process::Command::new(&self.engine)
            .args(["volume", "rm", &self.volume])
            .output();
    }
}

async fn run_for_id(
    runner: &dyn CommandRunner,
    mut command: Command,
    step: &'static str,
) -> Result<String, SeedError> {
    command.capture(true);
    let output = runner
        .run(command)
        .await
        .map_err(|source| SeedError::Command { step, source })?;

    let id = output.stdout.trim();
    if id.is_empty() {
        return Err(SeedError::MissingId { step });
    }
    Ok(id.to_owned())
}

async fn remove_volume(
    runner: &dyn CommandRunner,
    engine: &str,
    volume: &str,
) -> Result<(), SeedError> {
    let mut command = Command::new(engine);
    command.args(["volume", "rm", volume]).capture(true);
    runner
        .run(command)
        .await
        .map_err(|source| SeedError::Command {
            step: "remove volume",
            source,
        })?;
    Ok(())
}
