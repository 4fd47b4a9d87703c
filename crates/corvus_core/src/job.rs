use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::constants::{states, streams};
use crate::error::SchedulerError;

/// Everything needed to start a job on a [`Scheduler`](crate::traits::Scheduler).
///
/// Schedulers clone the description on submission, so changing it afterwards has no
/// effect on the submitted job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobDescription {
    /// Path (or bare name) of the program to run.
    pub executable: Option<String>,
    pub arguments: Vec<String>,
    pub environment: HashMap<String, String>,
    /// File to read stdin from. Batch jobs only.
    pub stdin: Option<String>,
    /// File stdout is redirected to.
    ///
    /// Interactive jobs may only carry the canonical [`streams::STDOUT`] name.
    pub stdout: Option<String>,
    /// File stderr is redirected to.
    ///
    /// Interactive jobs may only carry the canonical [`streams::STDERR`] name.
    pub stderr: Option<String>,
    /// Relative paths are resolved against the scheduler's working directory.
    pub working_directory: Option<String>,
    /// [`None`] selects the scheduler's default queue.
    pub queue_name: Option<String>,
    pub node_count: u32,
    pub processes_per_node: u32,
    /// Start the executable once instead of once per process (no `srun` wrapper).
    pub start_single_process: bool,
    /// Maximum run time in minutes. `0` means no limit.
    pub max_runtime: u32,
    /// Adaptor specific options, validated against the adaptor's vocabulary.
    pub job_options: HashMap<String, String>,
}

impl Default for JobDescription {
    fn default() -> Self {
        Self {
            executable: None,
            arguments: Vec::new(),
            environment: HashMap::new(),
            stdin: None,
            stdout: None,
            stderr: None,
            working_directory: None,
            queue_name: None,
            node_count: 1,
            processes_per_node: 1,
            start_single_process: false,
            max_runtime: 0,
            job_options: HashMap::new(),
        }
    }
}

impl JobDescription {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: Some(executable.into()),
            ..Default::default()
        }
    }

    pub fn with_arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue_name = Some(queue.into());
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.job_options.insert(key.into(), value.into());
        self
    }

    /// Executable and arguments joined with spaces, for log lines.
    pub fn command_line(&self) -> String {
        let mut line = self.executable.clone().unwrap_or_default();
        for arg in &self.arguments {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Checks the stdio rules shared by every interactive back-end: no stdin
    /// redirection, and stdout/stderr are either unset or the canonical names.
    pub fn check_interactive_streams(&self, adaptor: &str) -> Result<(), SchedulerError> {
        if self.stdin.is_some() {
            return Err(SchedulerError::invalid(
                adaptor,
                "Illegal stdin redirect for interactive job",
            ));
        }

        if let Some(out) = &self.stdout {
            if out != streams::STDOUT {
                return Err(SchedulerError::invalid(
                    adaptor,
                    format!("Illegal stdout redirect for interactive job: {out}"),
                ));
            }
        }

        if let Some(err) = &self.stderr {
            if err != streams::STDERR {
                return Err(SchedulerError::invalid(
                    adaptor,
                    format!("Illegal stderr redirect for interactive job: {err}"),
                ));
            }
        }

        Ok(())
    }
}

/// Identifies the scheduler instance a job or queue belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchedulerRef {
    pub adaptor: String,
    pub location: String,
}

impl SchedulerRef {
    pub fn new(adaptor: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            adaptor: adaptor.into(),
            location: location.into(),
        }
    }
}

impl fmt::Display for SchedulerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.adaptor, self.location)
    }
}

/// A submitted job. Created once at submission and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub id: String,
    pub scheduler: SchedulerRef,
    pub description: JobDescription,
    pub interactive: bool,
    pub batch: bool,
}

impl JobHandle {
    pub fn new(
        id: impl Into<String>,
        scheduler: SchedulerRef,
        description: JobDescription,
        interactive: bool,
    ) -> Self {
        Self {
            id: id.into(),
            scheduler,
            description,
            interactive,
            batch: !interactive,
        }
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scheduler, self.id)
    }
}

/// Snapshot of a job's state, produced fresh by every status query.
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub job: JobHandle,
    /// Scheduler native state label, e.g. `RUNNING` or `CANCELLED by 0`.
    pub state: String,
    pub exit_code: Option<i32>,
    pub error: Option<SchedulerError>,
    pub running: bool,
    pub done: bool,
    pub info: HashMap<String, String>,
}

impl JobStatus {
    /// Status carrying only an error, used when a lookup for this job failed
    /// inside a batch query.
    pub fn from_error(job: JobHandle, error: SchedulerError) -> Self {
        Self {
            job,
            state: states::UNKNOWN.to_string(),
            exit_code: None,
            error: Some(error),
            running: false,
            done: true,
            info: HashMap::new(),
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// `true` when the job is done and ended without an error.
    pub fn is_success(&self) -> bool {
        self.done && self.error.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct QueueStatus {
    pub scheduler: SchedulerRef,
    pub queue_name: String,
    pub error: Option<SchedulerError>,
    pub info: HashMap<String, String>,
}

impl QueueStatus {
    pub fn from_error(scheduler: SchedulerRef, queue_name: &str, error: SchedulerError) -> Self {
        Self {
            scheduler,
            queue_name: queue_name.to_string(),
            error: Some(error),
            info: HashMap::new(),
        }
    }
}

pub type StdinStream = Box<dyn AsyncWrite + Send + Unpin>;
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// The raw standard streams of a started process.
pub struct ProcessStreams {
    pub stdin: StdinStream,
    pub stdout: OutputStream,
    pub stderr: OutputStream,
}

/// The live standard streams of an interactive job.
///
/// Valid until the caller drops them. Dropping `stdin` closes the job's input.
pub struct Streams {
    pub job: JobHandle,
    pub stdin: StdinStream,
    pub stdout: OutputStream,
    pub stderr: OutputStream,
}

impl Streams {
    pub fn new(job: JobHandle, streams: ProcessStreams) -> Self {
        Self {
            job,
            stdin: streams.stdin,
            stdout: streams.stdout,
            stderr: streams.stderr,
        }
    }
}

impl fmt::Debug for Streams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Streams").field("job", &self.job.id).finish()
    }
}
