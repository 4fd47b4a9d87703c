use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::error::*;
use crate::job::*;

/// The capability every back-end exposes: submit, monitor and cancel jobs.
///
/// Implemented by the local process pool, the SSH process pool and the scripting
/// adaptors (e.g. Slurm). Client code written against this trait runs unmodified on
/// any of them.
pub trait Scheduler: Send + Sync + 'static {
    fn adaptor_name(&self) -> &str;

    fn location(&self) -> &str;

    fn scheduler_ref(&self) -> SchedulerRef {
        SchedulerRef::new(self.adaptor_name(), self.location())
    }

    fn queue_names(&self) -> Vec<String>;

    fn default_queue_name(&self) -> Option<String>;

    fn is_open(&self) -> bool;

    /// Submits a job whose stdio is redirected to files.
    fn submit_batch_job(
        &self,
        description: JobDescription,
    ) -> impl Future<Output = Result<JobHandle, SchedulerError>> + Send;

    /// Submits a job whose stdio the caller drives through [`Scheduler::get_streams`].
    ///
    /// Returns once the job is running, so the streams can be used straight away.
    fn submit_interactive_job(
        &self,
        description: JobDescription,
    ) -> impl Future<Output = Result<JobHandle, SchedulerError>> + Send;

    /// Lists the jobs in the given queues, or in all queues if `queues` is empty.
    fn get_jobs(
        &self,
        queues: &[&str],
    ) -> impl Future<Output = Result<Vec<JobHandle>, SchedulerError>> + Send;

    fn get_job_status(
        &self,
        job: &JobHandle,
    ) -> impl Future<Output = Result<JobStatus, SchedulerError>> + Send;

    /// Statuses for many jobs at once. Never fails as a whole: a failed lookup is
    /// reported in that job's [`JobStatus::error`].
    fn get_job_statuses(&self, jobs: &[JobHandle]) -> impl Future<Output = Vec<JobStatus>> + Send {
        async move {
            let mut result = Vec::with_capacity(jobs.len());
            for job in jobs {
                let status = match self.get_job_status(job).await {
                    Ok(status) => status,
                    Err(e) => JobStatus::from_error(job.clone(), e),
                };
                result.push(status);
            }
            result
        }
    }

    /// Requests cancellation and returns the status observed afterwards.
    fn cancel_job(
        &self,
        job: &JobHandle,
    ) -> impl Future<Output = Result<JobStatus, SchedulerError>> + Send;

    /// Waits until the job is done or `timeout` elapses. [`Duration::ZERO`] waits
    /// forever. Running out of time is not an error: the last status is returned.
    fn wait_until_done(
        &self,
        job: &JobHandle,
        timeout: Duration,
    ) -> impl Future<Output = Result<JobStatus, SchedulerError>> + Send;

    /// Waits until the job is running (or already done), with the same timeout
    /// rules as [`Scheduler::wait_until_done`].
    fn wait_until_running(
        &self,
        job: &JobHandle,
        timeout: Duration,
    ) -> impl Future<Output = Result<JobStatus, SchedulerError>> + Send;

    fn get_queue_status(
        &self,
        queue: &str,
    ) -> impl Future<Output = Result<QueueStatus, SchedulerError>> + Send;

    /// Statuses for many queues. Queues that fail are reported with an error.
    fn get_queue_statuses(
        &self,
        queues: &[&str],
    ) -> impl Future<Output = Vec<QueueStatus>> + Send {
        async move {
            let names: Vec<String> = if queues.is_empty() {
                self.queue_names()
            } else {
                queues.iter().map(|q| q.to_string()).collect()
            };

            let mut result = Vec::with_capacity(names.len());
            for name in &names {
                let status = match self.get_queue_status(name).await {
                    Ok(status) => status,
                    Err(e) => QueueStatus::from_error(self.scheduler_ref(), name, e),
                };
                result.push(status);
            }
            result
        }
    }

    /// Hands out the live streams of an interactive job. Streams can be taken once.
    fn get_streams(
        &self,
        job: &JobHandle,
    ) -> impl Future<Output = Result<Streams, SchedulerError>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), SchedulerError>> + Send;
}

/// Everything a [`ProcessFactory`] needs to start one job's process.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub job_id: String,
    pub description: JobDescription,
    /// Absolute working directory, already resolved by the caller.
    pub working_directory: String,
    /// Interactive processes get piped stdio; batch processes use the redirect
    /// files named in the description.
    pub interactive: bool,
}

/// A started process, local or remote.
pub trait Process: Send {
    /// Takes the piped stdio of an interactive process. Returns [`None`] for batch
    /// processes or when the streams were already taken.
    fn take_streams(&mut self) -> Option<ProcessStreams>;

    /// Resolves with the exit code once the process ends.
    fn wait(&mut self) -> BoxFuture<'_, Result<i32, SchedulerError>>;

    /// Delivers a kill signal. Best effort: the process may already have ended.
    fn kill(&mut self) -> BoxFuture<'_, Result<(), SchedulerError>>;
}

/// Starts processes for a job queue.
///
/// The local implementation spawns child processes; the SSH implementation runs
/// commands on exec channels taken from a channel pool.
pub trait ProcessFactory: Send + Sync + 'static {
    fn adaptor_name(&self) -> &str;

    fn location(&self) -> &str;

    fn start_process(
        &self,
        spec: ProcessSpec,
    ) -> impl Future<Output = Result<Box<dyn Process>, SchedulerError>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), SchedulerError>> + Send;
}

/// The narrow file contract schedulers use to stage and inspect redirect files.
pub trait FileAccess: Send + Sync + 'static {
    fn read_file(&self, path: &str) -> impl Future<Output = Result<Bytes, SchedulerError>> + Send;

    fn write_file(
        &self,
        path: &str,
        data: Bytes,
    ) -> impl Future<Output = Result<(), SchedulerError>> + Send;

    /// The absolute directory relative paths are resolved against.
    fn working_directory(&self) -> impl Future<Output = Result<String, SchedulerError>> + Send;
}
