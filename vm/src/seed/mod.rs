//! Installer seed images.
//!
//! The seed is a small ISO labelled `cidata` holding a `user-data`
//! autoinstall document and an empty `meta-data` file. It is assembled with
//! `cloud-localds` inside a throwaway Alpine container, so the host only
//! needs a container engine.

mod sandbox;

use std::fmt::{self, Debug};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, instrument, warn};
use vmstrap_cmd::{CommandError, CommandRunner};
use vmstrap_fs::{self as fs, FsError};

use self::sandbox::Sandbox;

pub const DEFAULT_HOSTNAME: &str = "bubuntu";
pub const DEFAULT_USERNAME: &str = "bubuntu";
pub const DEFAULT_CONTAINER_ENGINE: &str = "docker";
pub const DEFAULT_CONTAINER_IMAGE: &str = "alpine:latest";

pub const USER_DATA_FILE: &str = "user-data";
pub const META_DATA_FILE: &str = "meta-data";
const SCRIPT_FILE: &str = "gen_iso.sh";

const GUEST_DIR: &str = "/root";
const GUEST_SEED_FILE: &str = "seed.iso";

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("invalid password hash: {0}")]
    InvalidPasswordHash(&'static str),

    #[error("invalid {field} '{value}': only letters, digits, '-', '_' and '.' are allowed")]
    InvalidIdentity { field: &'static str, value: String },

    #[error("failed to {step}: {source}")]
    Command {
        step: &'static str,
        #[source]
        source: CommandError,
    },

    #[error("{step} did not print an id")]
    MissingId { step: &'static str },

    #[error("seed image was not produced at {0}")]
    MissingArtifact(PathBuf),

    #[error(transparent)]
    Fs(#[from] FsError),
}

/// A crypt(3) password hash for the installed user.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(hash: impl Into<String>) -> Result<Self, SeedError> {
        let hash = hash.into();
        if hash.is_empty() {
            return Err(SeedError::InvalidPasswordHash("must not be empty"));
        }
        if hash.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
            return Err(SeedError::InvalidPasswordHash(
                "must not contain whitespace or quotes",
            ));
        }
        Ok(Self(hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordHash(..)")
    }
}

#[derive(Debug, Clone)]
pub struct SeedOptions {
    pub hostname: String,
    pub username: String,
    pub password_hash: PasswordHash,
    pub container_engine: String,
    pub container_image: String,
}

impl SeedOptions {
    pub fn new(password_hash: PasswordHash) -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME.to_owned(),
            username: DEFAULT_USERNAME.to_owned(),
            password_hash,
            container_engine: DEFAULT_CONTAINER_ENGINE.to_owned(),
            container_image: DEFAULT_CONTAINER_IMAGE.to_owned(),
        }
    }

    pub fn validate(&self) -> Result<(), SeedError> {
        validate_identity("hostname", &self.hostname)?;
        validate_identity("username", &self.username)?;
        Ok(())
    }
}

fn validate_identity(field: &'static str, value: &str) -> Result<(), SeedError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(SeedError::InvalidIdentity {
            field,
            value: value.to_owned(),
        })
    }
}

/// The autoinstall document, see
/// https://ubuntu.com/server/docs/install/autoinstall-quickstart
pub fn render_user_data(options: &SeedOptions) -> String {
    let SeedOptions {
        hostname,
        username,
        password_hash,
        ..
    } = options;
    let password = password_hash.as_str();

    format!(
        "\
        #cloud-config\n\
        autoinstall:\n\
        \u{20}\u{20}version: 1\n\
        \u{20}\u{20}identity:\n\
        \u{20}\u{20}\u{20}\u{20}hostname: {hostname}\n\
        \u{20}\u{20}\u{20}\u{20}password: {password}\n\
        \u{20}\u{20}\u{20}\u{20}username: {username}\n\
        "
    )
}

/// Runs inside the container, in `GUEST_DIR`.
pub fn render_script() -> String {
    format!(
        "\
        #!/usr/bin/env sh\n\
        set -e\n\
        apk add --no-cache cloud-utils-localds\n\
        cloud-localds {GUEST_DIR}/{GUEST_SEED_FILE} {USER_DATA_FILE} {META_DATA_FILE}\n\
        "
    )
}

/// Write `user-data`, `meta-data` and the generation script into `scratch_dir`.
pub async fn materialize(scratch_dir: &Path, options: &SeedOptions) -> Result<Vec<PathBuf>, SeedError> {
    options.validate()?;
    fs::create_dir(scratch_dir).await?;

    let files = [
        (META_DATA_FILE, String::new()),
        (USER_DATA_FILE, render_user_data(options)),
        (SCRIPT_FILE, render_script()),
    ];

    let mut written = Vec::with_capacity(files.len());
    for (name, contents) in files {
        let path = scratch_dir.join(name);
        fs::write_file(&path, contents.as_bytes()).await?;
        written.push(path);
    }
    written.sort();

    Ok(written)
}

/// Produce the seed image at `output`.
///
/// The container and its volume are removed on every path out of this
/// function once they have been created, whether generation succeeded or not.
#[instrument(skip(runner, options), fields(hostname = %options.hostname, username = %options.username))]
pub async fn generate(
    runner: &dyn CommandRunner,
    options: &SeedOptions,
    scratch_dir: &Path,
    output: &Path,
) -> Result<PathBuf, SeedError> {
    let files = materialize(scratch_dir, options).await?;

    info!("generating seed image...");

    let sandbox = Sandbox::acquire(
        runner,
        &options.container_engine,
        &options.container_image,
        &format!("{GUEST_DIR}/{SCRIPT_FILE}"),
    )
    .await?;

    let result = build_in(&sandbox, &files, output).await;
    let released = sandbox.release().await;

    match (result, released) {
        (Ok(()), Ok(())) => {}
        (Ok(()), Err(error)) => return Err(error),
        (Err(error), Ok(())) => return Err(error),
        (Err(error), Err(release_error)) => {
            warn!("failed to release seed environment: {release_error}");
            return Err(error);
        }
    }

    if !fs::path_exists(output).await? {
        return Err(SeedError::MissingArtifact(output.to_owned()));
    }

    info!("seed image ready at {}", output.display());

    Ok(output.to_owned())
}

async fn build_in(sandbox: &Sandbox<'_>, files: &[PathBuf], output: &Path) -> Result<(), SeedError> {
    for file in files {
        sandbox.copy_in(file, GUEST_DIR).await?;
    }
    sandbox.run().await?;
    fs::create_parent_dir(output).await?;
    sandbox
        .copy_out(&format!("{GUEST_DIR}/{GUEST_SEED_FILE}"), output)
        .await
}
