use std::time::Duration;

use corvus_core::prelude::*;
use tracing::info;

use crate::config::LocalConfig;
use crate::files::LocalFileAccess;
use crate::process::LocalProcessFactory;
use crate::queue::JobQueues;

pub const ADAPTOR: &str = "local";

/// Runs jobs as child processes of the current process, on the three local queues.
pub struct LocalScheduler {
    queues: JobQueues<LocalProcessFactory>,
}

impl LocalScheduler {
    /// Must be called from within a tokio runtime.
    pub fn new(config: LocalConfig) -> Result<Self, SchedulerError> {
        let dir = match config.working_directory {
            Some(dir) => dir,
            None => std::env::current_dir().map_err(|e| SchedulerError::io(ADAPTOR, e))?,
        };
        let dir = dir.to_string_lossy().into_owned();

        let queues = JobQueues::new(LocalProcessFactory::new(ADAPTOR), &dir, config.queues)?;
        info!(working_directory = %dir, "Local scheduler ready");

        Ok(Self { queues })
    }

    pub fn queues(&self) -> &JobQueues<LocalProcessFactory> {
        &self.queues
    }

    /// Files relative to this scheduler's working directory.
    pub fn file_access(&self) -> LocalFileAccess {
        LocalFileAccess::new(self.queues.working_directory())
    }
}

impl Scheduler for LocalScheduler {
    fn adaptor_name(&self) -> &str {
        ADAPTOR
    }

    fn location(&self) -> &str {
        "localhost"
    }

    fn queue_names(&self) -> Vec<String> {
        self.queues.queue_names()
    }

    fn default_queue_name(&self) -> Option<String> {
        Some(queues::SINGLE.to_string())
    }

    fn is_open(&self) -> bool {
        self.queues.is_open()
    }

    async fn submit_batch_job(&self, description: JobDescription) -> Result<JobHandle, SchedulerError> {
        self.queues.submit_batch_job(description)
    }

    async fn submit_interactive_job(
        &self,
        description: JobDescription,
    ) -> Result<JobHandle, SchedulerError> {
        self.queues.submit_interactive_job(description).await
    }

    async fn get_jobs(&self, queues: &[&str]) -> Result<Vec<JobHandle>, SchedulerError> {
        self.queues.get_jobs(queues)
    }

    async fn get_job_status(&self, job: &JobHandle) -> Result<JobStatus, SchedulerError> {
        self.queues.get_job_status(job)
    }

    async fn get_job_statuses(&self, jobs: &[JobHandle]) -> Vec<JobStatus> {
        self.queues.get_job_statuses(jobs)
    }

    async fn cancel_job(&self, job: &JobHandle) -> Result<JobStatus, SchedulerError> {
        self.queues.cancel_job(job).await
    }

    async fn wait_until_done(
        &self,
        job: &JobHandle,
        timeout: Duration,
    ) -> Result<JobStatus, SchedulerError> {
        self.queues.wait_until_done(job, timeout).await
    }

    async fn wait_until_running(
        &self,
        job: &JobHandle,
        timeout: Duration,
    ) -> Result<JobStatus, SchedulerError> {
        self.queues.wait_until_running(job, timeout).await
    }

    async fn get_queue_status(&self, queue: &str) -> Result<QueueStatus, SchedulerError> {
        self.queues.get_queue_status(queue)
    }

    async fn get_streams(&self, job: &JobHandle) -> Result<Streams, SchedulerError> {
        self.queues.get_streams(job)
    }

    async fn close(&self) -> Result<(), SchedulerError> {
        self.queues.end();
        Ok(())
    }
}
