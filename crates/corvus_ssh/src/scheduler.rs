use std::sync::Arc;
use std::time::Duration;

use corvus_core::prelude::*;
use corvus_local::queue::JobQueues;
use tracing::info;

use crate::ADAPTOR;
use crate::config::SshConfig;
use crate::files::SftpFileAccess;
use crate::pool::ChannelPool;
use crate::process::{SshPool, SshProcessFactory};
use crate::session::RusshConnector;

/// Runs jobs directly on a remote host, as commands on pooled SSH channels, using
/// the same three queues as the local scheduler.
pub struct SshScheduler {
    queues: JobQueues<SshProcessFactory>,
    location: String,
    root: String,
}

/// Builds the session pool described by `config`.
pub fn connect_pool(config: &SshConfig) -> Result<Arc<SshPool>, SchedulerError> {
    let target = config.target();
    let user = config.user_for(&target);
    let mut pool = ChannelPool::new(
        ADAPTOR,
        RusshConnector::new(config),
        target,
        user,
        config.max_channels,
    );

    if let Some(gateway) = config.gateway_endpoint()? {
        let user = config.user_for(&gateway);
        pool = pool.with_gateway(gateway, user);
    }

    Ok(Arc::new(pool))
}

impl SshScheduler {
    /// Connects to the host and resolves the remote working directory. Must be
    /// called from within a tokio runtime.
    pub async fn connect(config: SshConfig) -> Result<Self, SchedulerError> {
        let pool = connect_pool(&config)?;
        let location = config.location();

        let root = match &config.working_directory {
            Some(dir) => dir.clone(),
            None => {
                SftpFileAccess::new(pool.clone(), None)
                    .working_directory()
                    .await?
            }
        };

        let factory = SshProcessFactory::new(pool, &location);
        let queues = JobQueues::new(factory, &root, config.queues)?;
        info!(location = %location, working_directory = %root, "SSH scheduler ready");

        Ok(Self {
            queues,
            location,
            root,
        })
    }

    pub fn queues(&self) -> &JobQueues<SshProcessFactory> {
        &self.queues
    }

    pub fn pool(&self) -> &Arc<SshPool> {
        self.queues.factory().pool()
    }

    /// Files on the remote host, relative to this scheduler's working directory.
    pub fn file_access(&self) -> SftpFileAccess {
        SftpFileAccess::new(self.pool().clone(), Some(self.root.clone()))
    }
}

impl Scheduler for SshScheduler {
    fn adaptor_name(&self) -> &str {
        ADAPTOR
    }

    fn location(&self) -> &str {
        &self.location
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
        self.queues.factory().close().await
    }
}
