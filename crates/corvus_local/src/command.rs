//! Run a local command to completion and capture its output.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use corvus_core::prelude::*;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

const ADAPTOR: &str = "local";

/// Output of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs a single local command synchronously from the caller's point of view.
///
/// Both output pipes are drained by their own task before stdin is written and
/// before the exit is awaited, so a child filling a pipe buffer can never block on
/// a parent that is waiting for it to exit.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    command: String,
    args: Vec<String>,
    stdin: Option<String>,
    working_directory: Option<PathBuf>,
}

impl CommandRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            stdin: None,
            working_directory: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub async fn run(self) -> Result<CommandOutput, SchedulerError> {
        let program = resolve_executable(&self.command, self.working_directory.as_deref());
        debug!(command = %program.display(), args = ?self.args, "Running local command");

        let mut cmd = Command::new(&program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_directory {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            SchedulerError::adaptor(
                ADAPTOR,
                format!("Failed to run command {}: {e}", program.display()),
            )
        })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        if let Some(mut input) = child.stdin.take() {
            if let Some(text) = &self.stdin {
                input
                    .write_all(text.as_bytes())
                    .await
                    .map_err(|e| SchedulerError::io(ADAPTOR, e))?;
            }
            // dropping stdin closes it so the child sees EOF
        }

        let status = child
            .wait()
            .await
            .map_err(|e| SchedulerError::io(ADAPTOR, e))?;

        Ok(CommandOutput {
            stdout: join_output(stdout).await?,
            stderr: join_output(stderr).await?,
            exit_code: exit_code(status),
        })
    }

    /// Like [`CommandRunner::run`], but a non-zero exit code becomes an error
    /// carrying the command's stderr.
    pub async fn run_checked(self) -> Result<CommandOutput, SchedulerError> {
        let command = self.command.clone();
        let output = self.run().await?;
        if !output.success() {
            return Err(SchedulerError::adaptor(
                ADAPTOR,
                format!(
                    "Command {command} failed with exit code {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
            ));
        }
        Ok(output)
    }
}

fn drain<R>(reader: Option<R>) -> JoinHandle<std::io::Result<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            reader.read_to_end(&mut buf).await?;
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    })
}

async fn join_output(
    handle: JoinHandle<std::io::Result<String>>,
) -> Result<String, SchedulerError> {
    handle
        .await
        .map_err(|e| SchedulerError::adaptor(ADAPTOR, format!("Output reader failed: {e}")))?
        .map_err(|e| SchedulerError::io(ADAPTOR, e))
}

/// Maps an exit status to a code. Processes killed by a signal report `128 + signal`,
/// like a shell does.
pub fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}

/// Finds the program to start for `name`.
///
/// Names containing a `/` are taken as paths (relative ones resolved against the
/// working directory). A bare name is used from the working directory when a file
/// of that name exists there, and otherwise looked up on `PATH`.
pub fn resolve_executable(name: &str, working_directory: Option<&Path>) -> PathBuf {
    let path = Path::new(name);

    if name.contains('/') {
        return match working_directory {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        };
    }

    if let Some(dir) = working_directory {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return candidate;
        }
    }

    find_in_path(name).unwrap_or_else(|| path.to_path_buf())
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
