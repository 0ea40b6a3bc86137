use async_trait::async_trait;
use std::ffi::OsStr;
use std::fmt::Display;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command as BaseCommand;
use tracing::info;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to spawn command: {command}")]
    Spawn {
        command: String,
        #[source]
        error: std::io::Error,
    },

    #[error("command failed ({}): {command}\n{stderr}", exit_label(.code))]
    Failure {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_owned(),
    }
}

/// Text collected from a finished command.
///
/// Both fields are empty when the command streamed to the operator's terminal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug)]
pub struct Command {
    cmd: BaseCommand,
    capture: bool,
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

impl Command {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            cmd: BaseCommand::new(program),
            capture: false,
        }
    }

    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.cmd.arg(arg);
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.cmd.args(args);
        self
    }

    /// Collect stdout and stderr as text instead of streaming them.
    pub fn capture(&mut self, capture: bool) -> &mut Self {
        self.capture = capture;
        self
    }

    /// Program followed by its arguments, lossily converted to text.
    pub fn argv(&self) -> Vec<String> {
        let cmd = self.cmd.as_std();
        std::iter::once(cmd.get_program())
            .chain(cmd.get_args())
            .map(|part| part.to_string_lossy().into_owned())
            .collect()
    }

    pub async fn run(&mut self) -> Result<CommandOutput, CommandError> {
        info!("> {self}");

        if self.capture {
            self.run_captured().await
        } else {
            self.run_streamed().await
        }
    }

    async fn run_captured(&mut self) -> Result<CommandOutput, CommandError> {
        let output = self
            .cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|error| CommandError::Spawn {
                command: self.to_string(),
                error,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            Ok(CommandOutput { stdout, stderr })
        } else {
            Err(CommandError::Failure {
                command: self.to_string(),
                code: output.status.code(),
                stdout,
                stderr,
            })
        }
    }

    async fn run_streamed(&mut self) -> Result<CommandOutput, CommandError> {
        let status = self
            .cmd
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|error| CommandError::Spawn {
                command: self.to_string(),
                error,
            })?;

        if status.success() {
            Ok(CommandOutput::default())
        } else {
            Err(CommandError::Failure {
                command: self.to_string(),
                code: status.code(),
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }
}

/// Executes commands on behalf of the higher layers.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: Command) -> Result<CommandOutput, CommandError>;
}

/// Runs commands as child processes of this one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, mut command: Command) -> Result<CommandOutput, CommandError> {
        command.run().await
    }
}
