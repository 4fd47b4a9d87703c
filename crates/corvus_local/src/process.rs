use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use corvus_core::prelude::*;
use futures::future::BoxFuture;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::command::{exit_code, resolve_executable};

/// A child process on the local machine.
pub struct LocalProcess {
    adaptor: String,
    child: Child,
    streams: Option<ProcessStreams>,
}

impl Process for LocalProcess {
    fn take_streams(&mut self) -> Option<ProcessStreams> {
        self.streams.take()
    }

    fn wait(&mut self) -> BoxFuture<'_, Result<i32, SchedulerError>> {
        Box::pin(async move {
            let status = self
                .child
                .wait()
                .await
                .map_err(|e| SchedulerError::io(&self.adaptor, e))?;
            Ok(exit_code(status))
        })
    }

    fn kill(&mut self) -> BoxFuture<'_, Result<(), SchedulerError>> {
        Box::pin(async move {
            match self.child.kill().await {
                Ok(()) => Ok(()),
                // already reaped
                Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
                Err(e) => Err(SchedulerError::io(&self.adaptor, e)),
            }
        })
    }
}

/// Starts jobs as child processes of the current process.
#[derive(Debug, Clone)]
pub struct LocalProcessFactory {
    adaptor: String,
}

impl Default for LocalProcessFactory {
    fn default() -> Self {
        Self::new("local")
    }
}

impl LocalProcessFactory {
    pub fn new(adaptor: impl Into<String>) -> Self {
        Self {
            adaptor: adaptor.into(),
        }
    }

    fn open_input(&self, dir: &Path, name: Option<&str>) -> Result<Stdio, SchedulerError> {
        match name {
            Some(name) => File::open(resolve(dir, name))
                .map(Stdio::from)
                .map_err(|e| SchedulerError::io(&self.adaptor, e)),
            None => Ok(Stdio::null()),
        }
    }

    fn open_output(&self, dir: &Path, name: Option<&str>) -> Result<Stdio, SchedulerError> {
        match name {
            Some(name) => OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(resolve(dir, name))
                .map(Stdio::from)
                .map_err(|e| SchedulerError::io(&self.adaptor, e)),
            None => Ok(Stdio::null()),
        }
    }
}

impl ProcessFactory for LocalProcessFactory {
    fn adaptor_name(&self) -> &str {
        &self.adaptor
    }

    fn location(&self) -> &str {
        "localhost"
    }

    async fn start_process(&self, spec: ProcessSpec) -> Result<Box<dyn Process>, SchedulerError> {
        let desc = &spec.description;
        let dir = PathBuf::from(&spec.working_directory);

        let executable = desc
            .executable
            .as_deref()
            .ok_or_else(|| SchedulerError::incomplete(&self.adaptor, "Executable missing"))?;
        let program = resolve_executable(executable, Some(dir.as_path()));

        let mut cmd = Command::new(&program);
        cmd.args(&desc.arguments)
            .envs(&desc.environment)
            .current_dir(&dir)
            .kill_on_drop(true);

        if spec.interactive {
            cmd.stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        } else {
            cmd.stdin(self.open_input(&dir, desc.stdin.as_deref())?)
                .stdout(self.open_output(&dir, desc.stdout.as_deref())?)
                .stderr(self.open_output(&dir, desc.stderr.as_deref())?);
        }

        debug!(job_id = %spec.job_id, program = %program.display(), "Starting local process");

        let mut child = cmd.spawn().map_err(|e| {
            SchedulerError::adaptor(
                &self.adaptor,
                format!("Failed to start process {}: {e}", program.display()),
            )
        })?;

        let streams = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => Some(ProcessStreams {
                stdin: Box::new(stdin),
                stdout: Box::new(stdout),
                stderr: Box::new(stderr),
            }),
            _ => None,
        };

        Ok(Box::new(LocalProcess {
            adaptor: self.adaptor.clone(),
            child,
            streams,
        }))
    }

    async fn close(&self) -> Result<(), SchedulerError> {
        Ok(())
    }
}

fn resolve(dir: &Path, name: &str) -> PathBuf {
    let path = Path::new(name);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}
