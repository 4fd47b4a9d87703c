use std::collections::HashMap;
use std::time::Duration;

use corvus_core::prelude::*;
use corvus_local::command::CommandOutput;
use corvus_local::config::QueueConfig;
use corvus_local::queue::JobQueues;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::runner::RemoteCommandRunner;

/// The plumbing every CLI-driven scheduler adaptor shares.
///
/// Composed into concrete adaptors rather than inherited: a Slurm scheduler owns a
/// `ScriptingConnection` and calls into it for command execution, validation and
/// polling. Commands run as helper jobs on the connection's own [`JobQueues`], which
/// also host the helper processes of interactive jobs.
pub struct ScriptingConnection<F: ProcessFactory> {
    adaptor: String,
    scheduler: SchedulerRef,
    queues: JobQueues<F>,
    poll_delay: Duration,
}

impl<F: ProcessFactory> ScriptingConnection<F> {
    pub fn new(
        adaptor: impl Into<String>,
        factory: F,
        working_directory: impl Into<String>,
        poll_delay: Duration,
        config: QueueConfig,
    ) -> Result<Self, SchedulerError> {
        let adaptor = adaptor.into();
        let scheduler = SchedulerRef::new(&adaptor, factory.location());
        let queues = JobQueues::new(factory, working_directory, config)?;

        info!(adaptor = %adaptor, location = %scheduler.location, "Scripting connection opened");

        Ok(Self {
            adaptor,
            scheduler,
            queues,
            poll_delay,
        })
    }

    pub fn adaptor_name(&self) -> &str {
        &self.adaptor
    }

    pub fn location(&self) -> &str {
        &self.scheduler.location
    }

    pub fn scheduler_ref(&self) -> &SchedulerRef {
        &self.scheduler
    }

    /// The queues commands and interactive helper jobs run on.
    pub fn queues(&self) -> &JobQueues<F> {
        &self.queues
    }

    pub fn poll_delay(&self) -> Duration {
        self.poll_delay
    }

    pub fn is_open(&self) -> bool {
        self.queues.is_open()
    }

    pub async fn run_command<I, S>(
        &self,
        command: &str,
        args: I,
        stdin: Option<&str>,
    ) -> Result<CommandOutput, SchedulerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RemoteCommandRunner::new(&self.queues)
            .run(command, args, stdin)
            .await
    }

    /// Like [`run_command`](Self::run_command), but a non-zero exit code is an error
    /// carrying the command's stderr.
    pub async fn run_checked_command<I, S>(
        &self,
        command: &str,
        args: I,
        stdin: Option<&str>,
    ) -> Result<CommandOutput, SchedulerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let output = self.run_command(command, args, stdin).await?;
        if !output.success() {
            return Err(SchedulerError::adaptor(
                &self.adaptor,
                format!(
                    "{command} failed with exit code {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
            ));
        }
        Ok(output)
    }

    /// Rejects any job option whose key is not in `valid_keys`.
    pub fn verify_job_options(
        &self,
        options: &HashMap<String, String>,
        valid_keys: &[&str],
    ) -> Result<(), SchedulerError> {
        let mut keys: Vec<_> = options.keys().collect();
        keys.sort();

        for key in keys {
            if !valid_keys.contains(&key.as_str()) {
                return Err(SchedulerError::invalid(
                    &self.adaptor,
                    format!("Unsupported job option: {key}"),
                ));
            }
        }
        Ok(())
    }

    /// Checks the description fields every scheduler agrees on.
    ///
    /// Interactive jobs get the shared stdio rules, and may only carry environment
    /// variables when `allow_interactive_env` is set.
    pub fn verify_job_description(
        &self,
        description: &JobDescription,
        queue_names: &[String],
        interactive: bool,
        allow_interactive_env: bool,
    ) -> Result<(), SchedulerError> {
        if let Some(queue) = &description.queue_name {
            if !queue_names.contains(queue) {
                return Err(SchedulerError::invalid(
                    &self.adaptor,
                    format!("Queue {queue} not available"),
                ));
            }
        }

        match description.executable.as_deref() {
            None | Some("") => {
                return Err(SchedulerError::incomplete(&self.adaptor, "Executable missing"));
            }
            Some(_) => {}
        }

        if description.node_count == 0 {
            return Err(SchedulerError::invalid(&self.adaptor, "Illegal node count: 0"));
        }

        if description.processes_per_node == 0 {
            return Err(SchedulerError::invalid(
                &self.adaptor,
                "Illegal processes per node count: 0",
            ));
        }

        if interactive {
            description.check_interactive_streams(&self.adaptor)?;

            if !allow_interactive_env && !description.environment.is_empty() {
                return Err(SchedulerError::invalid(
                    &self.adaptor,
                    "Environment variables not supported for interactive jobs",
                ));
            }
        }

        Ok(())
    }

    /// Fails with [`SchedulerError::NoSuchQueue`] on the first name not in `known`.
    pub fn check_queue_names(&self, names: &[&str], known: &[String]) -> Result<(), SchedulerError> {
        match names.iter().find(|name| !known.iter().any(|k| k == *name)) {
            Some(name) => Err(SchedulerError::no_such_queue(&self.adaptor, *name)),
            None => Ok(()),
        }
    }

    /// Calls `poll` every poll delay until the returned status is done or `timeout`
    /// runs out ([`Duration::ZERO`] polls forever). Running out of time is not an
    /// error; the last status is returned.
    pub async fn poll_until_done<P, Fut>(
        &self,
        timeout: Duration,
        poll: P,
    ) -> Result<JobStatus, SchedulerError>
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = Result<JobStatus, SchedulerError>>,
    {
        self.poll_until(timeout, |status| status.done, poll).await
    }

    /// Like [`poll_until_done`](Self::poll_until_done), but also stops as soon as the
    /// job is running.
    pub async fn poll_until_running<P, Fut>(
        &self,
        timeout: Duration,
        poll: P,
    ) -> Result<JobStatus, SchedulerError>
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = Result<JobStatus, SchedulerError>>,
    {
        self.poll_until(timeout, |status| status.running || status.done, poll)
            .await
    }

    async fn poll_until<P, Fut>(
        &self,
        timeout: Duration,
        condition: fn(&JobStatus) -> bool,
        mut poll: P,
    ) -> Result<JobStatus, SchedulerError>
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = Result<JobStatus, SchedulerError>>,
    {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);

        loop {
            let status = poll().await?;
            if condition(&status) {
                return Ok(status);
            }

            let delay = match deadline {
                None => self.poll_delay,
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        debug!(job_id = %status.job.id, state = %status.state, "Polling timed out");
                        return Ok(status);
                    }
                    left.min(self.poll_delay)
                }
            };
            tokio::time::sleep(delay).await;
        }
    }

    /// Stops the helper queues. Running helper jobs are killed.
    pub fn end(&self) {
        self.queues.end();
    }
}
