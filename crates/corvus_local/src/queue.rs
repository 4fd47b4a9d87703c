//! The local job queueing engine shared by every back-end without a native queue.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use corvus_core::files::job_directory;
use corvus_core::prelude::*;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::executor::{JobExecutor, lock};

/// What workers need to start a job. Kept apart from [`JobQueues`] so worker tasks
/// never hold the queues themselves.
struct Launcher<F> {
    factory: F,
    working_directory: String,
}

impl<F: ProcessFactory> Launcher<F> {
    async fn launch(&self, executor: &JobExecutor) {
        let dir = job_directory(&self.working_directory, &executor.job().description);
        executor.run(&self.factory, &dir).await;
    }
}

#[derive(Default)]
struct JobLists {
    single: Vec<Arc<JobExecutor>>,
    multi: Vec<Arc<JobExecutor>>,
    unlimited: Vec<Arc<JobExecutor>>,
    /// Jobs whose terminal status was observed, newest last.
    finished: VecDeque<Arc<JobExecutor>>,
}

impl JobLists {
    fn queue(&self, name: &str) -> Option<&Vec<Arc<JobExecutor>>> {
        match name {
            queues::SINGLE => Some(&self.single),
            queues::MULTI => Some(&self.multi),
            queues::UNLIMITED => Some(&self.unlimited),
            _ => None,
        }
    }

    fn queue_mut(&mut self, name: &str) -> Option<&mut Vec<Arc<JobExecutor>>> {
        match name {
            queues::SINGLE => Some(&mut self.single),
            queues::MULTI => Some(&mut self.multi),
            queues::UNLIMITED => Some(&mut self.unlimited),
            _ => None,
        }
    }

    fn live(&self) -> impl Iterator<Item = &Arc<JobExecutor>> {
        self.single
            .iter()
            .chain(self.multi.iter())
            .chain(self.unlimited.iter())
    }

    fn find(&self, id: &str) -> Option<Arc<JobExecutor>> {
        self.live()
            .chain(self.finished.iter())
            .find(|executor| executor.job().id == id)
            .cloned()
    }

    /// Moves a finished job out of its queue list into the bounded finished memory.
    fn retire(&mut self, id: &str, memory: usize) {
        for list in [&mut self.single, &mut self.multi, &mut self.unlimited] {
            if let Some(index) = list.iter().position(|e| e.job().id == id) {
                let executor = list.remove(index);
                if memory > 0 {
                    if self.finished.len() == memory {
                        self.finished.pop_front();
                    }
                    self.finished.push_back(executor);
                }
                return;
            }
        }
    }
}

struct Pools {
    single: UnboundedSender<Arc<JobExecutor>>,
    multi: UnboundedSender<Arc<JobExecutor>>,
    unlimited: UnboundedSender<Arc<JobExecutor>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Three named queues of jobs, each drained by its own pool of tokio tasks:
///
/// - `single`: one worker, strict FIFO.
/// - `multi`: a fixed number of workers.
/// - `unlimited`: every job gets its own task as soon as it is submitted.
///
/// Jobs are started through a [`ProcessFactory`], so the same engine runs local
/// child processes and commands on remote exec channels.
pub struct JobQueues<F: ProcessFactory> {
    adaptor: String,
    scheduler: SchedulerRef,
    launcher: Arc<Launcher<F>>,
    lists: Mutex<JobLists>,
    pools: Mutex<Option<Pools>>,
    next_id: AtomicU64,
    config: QueueConfig,
}

impl<F: ProcessFactory> JobQueues<F> {
    /// Creates the queues and spawns their workers. Must be called from within a
    /// tokio runtime.
    pub fn new(
        factory: F,
        working_directory: impl Into<String>,
        config: QueueConfig,
    ) -> Result<Self, SchedulerError> {
        let adaptor = factory.adaptor_name().to_string();
        if config.multi_queue_size == 0 {
            return Err(SchedulerError::adaptor(
                &adaptor,
                "Number of workers in the multi queue must be at least 1",
            ));
        }

        let scheduler = SchedulerRef::new(&adaptor, factory.location());
        let launcher = Arc::new(Launcher {
            factory,
            working_directory: working_directory.into(),
        });

        let (single, single_rx) = mpsc::unbounded_channel();
        let (multi, multi_rx) = mpsc::unbounded_channel();
        let (unlimited, unlimited_rx) = mpsc::unbounded_channel();

        let mut tasks = spawn_workers(&launcher, single_rx, 1);
        tasks.extend(spawn_workers(&launcher, multi_rx, config.multi_queue_size));
        tasks.push(tokio::spawn(dispatch(launcher.clone(), unlimited_rx)));

        debug!(
            adaptor = %adaptor,
            multi_queue_size = config.multi_queue_size,
            "Job queues started"
        );

        Ok(Self {
            adaptor,
            scheduler,
            launcher,
            lists: Mutex::new(JobLists::default()),
            pools: Mutex::new(Some(Pools {
                single,
                multi,
                unlimited,
                tasks,
            })),
            next_id: AtomicU64::new(0),
            config,
        })
    }

    pub fn adaptor_name(&self) -> &str {
        &self.adaptor
    }

    pub fn scheduler_ref(&self) -> &SchedulerRef {
        &self.scheduler
    }

    pub fn factory(&self) -> &F {
        &self.launcher.factory
    }

    pub fn working_directory(&self) -> &str {
        &self.launcher.working_directory
    }

    pub fn queue_names(&self) -> Vec<String> {
        queues::ALL.iter().map(|q| q.to_string()).collect()
    }

    pub fn is_open(&self) -> bool {
        lock(&self.pools).is_some()
    }

    /// Validates `description` for this engine and returns the queue it goes to.
    pub fn check_description(
        &self,
        description: &JobDescription,
        interactive: bool,
    ) -> Result<&'static str, SchedulerError> {
        let queue = match description.queue_name.as_deref() {
            None => queues::SINGLE,
            Some(name) => queues::ALL
                .into_iter()
                .find(|q| *q == name)
                .ok_or_else(|| {
                    SchedulerError::invalid(
                        &self.adaptor,
                        format!("Queue {name} not available locally"),
                    )
                })?,
        };

        match description.executable.as_deref() {
            None | Some("") => {
                return Err(SchedulerError::incomplete(&self.adaptor, "Executable missing"));
            }
            Some(_) => {}
        }

        if description.node_count != 1 {
            return Err(SchedulerError::invalid(
                &self.adaptor,
                format!("Illegal node count: {}", description.node_count),
            ));
        }

        if description.processes_per_node != 1 {
            return Err(SchedulerError::invalid(
                &self.adaptor,
                format!(
                    "Illegal processes per node count: {}",
                    description.processes_per_node
                ),
            ));
        }

        if let Some(key) = description.job_options.keys().next() {
            return Err(SchedulerError::invalid(
                &self.adaptor,
                format!("Unsupported job option: {key}"),
            ));
        }

        if interactive {
            description.check_interactive_streams(&self.adaptor)?;
        }

        Ok(queue)
    }

    /// Queues a batch job. Returns as soon as the job is queued.
    pub fn submit_batch_job(&self, description: JobDescription) -> Result<JobHandle, SchedulerError> {
        let executor = self.submit(description, false)?;
        Ok(executor.job().clone())
    }

    /// Queues an interactive job and waits until it runs, so its streams can be
    /// taken straight away. A job that fails to start is reported as an error.
    pub async fn submit_interactive_job(
        &self,
        description: JobDescription,
    ) -> Result<JobHandle, SchedulerError> {
        let executor = self.submit(description, true)?;
        let status = executor.wait_until_running(Duration::ZERO).await;

        if let (true, Some(error)) = (status.done, status.error) {
            lock(&self.lists).retire(&executor.job().id, 0);
            return Err(error);
        }

        Ok(executor.job().clone())
    }

    fn submit(
        &self,
        description: JobDescription,
        interactive: bool,
    ) -> Result<Arc<JobExecutor>, SchedulerError> {
        let queue = self.check_description(&description, interactive)?;

        let id = format!(
            "{}-{}",
            self.adaptor,
            self.next_id.fetch_add(1, Ordering::Relaxed)
        );
        let job = JobHandle::new(id, self.scheduler.clone(), description, interactive);
        let executor = Arc::new(JobExecutor::new(job, &self.adaptor));

        let pools = lock(&self.pools);
        let Some(pools) = pools.as_ref() else {
            return Err(SchedulerError::Closed {
                adaptor: self.adaptor.clone(),
            });
        };

        if let Some(list) = lock(&self.lists).queue_mut(queue) {
            list.push(executor.clone());
        }

        let sender = match queue {
            queues::SINGLE => &pools.single,
            queues::MULTI => &pools.multi,
            _ => &pools.unlimited,
        };
        if sender.send(executor.clone()).is_err() {
            executor.abandon();
        }

        info!(job_id = %executor.job().id, queue, interactive, "Job submitted");
        Ok(executor)
    }

    /// The executor driving `job`, if this engine still knows it.
    pub fn executor(&self, job: &JobHandle) -> Result<Arc<JobExecutor>, SchedulerError> {
        lock(&self.lists)
            .find(&job.id)
            .ok_or_else(|| SchedulerError::no_such_job(&self.adaptor, &job.id))
    }

    /// Handles of the jobs in the given queues, or in every queue when `queues` is
    /// empty. Jobs already retired by a terminal status query are not listed.
    pub fn get_jobs(&self, names: &[&str]) -> Result<Vec<JobHandle>, SchedulerError> {
        let lists = lock(&self.lists);

        if names.is_empty() {
            return Ok(lists.live().map(|e| e.job().clone()).collect());
        }

        let mut jobs = Vec::new();
        for name in names {
            let list = lists
                .queue(name)
                .ok_or_else(|| SchedulerError::no_such_queue(&self.adaptor, *name))?;
            jobs.extend(list.iter().map(|e| e.job().clone()));
        }
        Ok(jobs)
    }

    /// Snapshot of a job's status. A terminal status retires the job from its
    /// queue list; it stays queryable from the finished memory afterwards.
    pub fn get_job_status(&self, job: &JobHandle) -> Result<JobStatus, SchedulerError> {
        let executor = self.executor(job)?;
        let status = executor.status();
        if status.done {
            self.retire(&job.id);
        }
        Ok(status)
    }

    pub fn get_job_statuses(&self, jobs: &[JobHandle]) -> Vec<JobStatus> {
        jobs.iter()
            .map(|job| {
                self.get_job_status(job)
                    .unwrap_or_else(|e| JobStatus::from_error(job.clone(), e))
            })
            .collect()
    }

    pub async fn wait_until_done(
        &self,
        job: &JobHandle,
        timeout: Duration,
    ) -> Result<JobStatus, SchedulerError> {
        let executor = self.executor(job)?;
        let status = executor.wait_until_done(timeout).await;
        if status.done {
            self.retire(&job.id);
        }
        Ok(status)
    }

    pub async fn wait_until_running(
        &self,
        job: &JobHandle,
        timeout: Duration,
    ) -> Result<JobStatus, SchedulerError> {
        let executor = self.executor(job)?;
        Ok(executor.wait_until_running(timeout).await)
    }

    /// Kills the job and returns the status observed afterwards.
    pub async fn cancel_job(&self, job: &JobHandle) -> Result<JobStatus, SchedulerError> {
        let executor = self.executor(job)?;
        let signalled = executor.kill().await;
        debug!(job_id = %job.id, signalled, "Job cancelled");
        Ok(executor.status())
    }

    /// Takes the streams of a running interactive job.
    pub fn get_streams(&self, job: &JobHandle) -> Result<Streams, SchedulerError> {
        let executor = self.executor(job)?;

        if !executor.job().interactive {
            return Err(SchedulerError::invalid(
                &self.adaptor,
                format!("Job {} is not interactive", job.id),
            ));
        }

        executor.take_streams().ok_or_else(|| {
            SchedulerError::adaptor(
                &self.adaptor,
                format!("Streams of job {} are not available", job.id),
            )
        })
    }

    pub fn get_queue_status(&self, queue: &str) -> Result<QueueStatus, SchedulerError> {
        let lists = lock(&self.lists);
        let list = lists
            .queue(queue)
            .ok_or_else(|| SchedulerError::no_such_queue(&self.adaptor, queue))?;

        let (mut running, mut pending) = (0usize, 0usize);
        for executor in list {
            let status = executor.status();
            if status.running {
                running += 1;
            } else if !status.done {
                pending += 1;
            }
        }

        let workers = match queue {
            queues::SINGLE => "1".to_string(),
            queues::MULTI => self.config.multi_queue_size.to_string(),
            _ => "unlimited".to_string(),
        };

        let info = HashMap::from([
            ("running".to_string(), running.to_string()),
            ("pending".to_string(), pending.to_string()),
            ("workers".to_string(), workers),
        ]);

        Ok(QueueStatus {
            scheduler: self.scheduler.clone(),
            queue_name: queue.to_string(),
            error: None,
            info,
        })
    }

    fn retire(&self, id: &str) {
        lock(&self.lists).retire(id, self.config.finished_job_memory);
    }

    /// Stops every queue immediately. Running jobs are killed and queued jobs never
    /// start. Idempotent.
    pub fn end(&self) {
        let Some(pools) = lock(&self.pools).take() else {
            return;
        };

        for task in &pools.tasks {
            task.abort();
        }

        let abandoned: Vec<_> = lock(&self.lists).live().cloned().collect();
        for executor in abandoned {
            if !executor.is_done() {
                warn!(job_id = %executor.job().id, "Abandoning job on shutdown");
                executor.abandon();
            }
        }

        info!(adaptor = %self.adaptor, "Job queues stopped");
    }
}

impl<F: ProcessFactory> Drop for JobQueues<F> {
    fn drop(&mut self) {
        self.end();
    }
}

fn spawn_workers<F: ProcessFactory>(
    launcher: &Arc<Launcher<F>>,
    rx: UnboundedReceiver<Arc<JobExecutor>>,
    count: usize,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    (0..count)
        .map(|_| tokio::spawn(work(launcher.clone(), rx.clone())))
        .collect()
}

/// Pulls jobs off a shared queue one at a time. Holding the receiver lock while
/// waiting keeps hand-out in submission order.
async fn work<F: ProcessFactory>(
    launcher: Arc<Launcher<F>>,
    rx: Arc<tokio::sync::Mutex<UnboundedReceiver<Arc<JobExecutor>>>>,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(executor) = next else {
            break;
        };
        launcher.launch(&executor).await;
    }
}

/// Spawns one task per job. Dropping the dispatcher aborts every job it started.
async fn dispatch<F: ProcessFactory>(
    launcher: Arc<Launcher<F>>,
    mut rx: UnboundedReceiver<Arc<JobExecutor>>,
) {
    let mut running = JoinSet::new();
    loop {
        tokio::select! {
            next = rx.recv() => {
                let Some(executor) = next else {
                    break;
                };
                let launcher = launcher.clone();
                running.spawn(async move { launcher.launch(&executor).await });
            }
            Some(_) = running.join_next(), if !running.is_empty() => {}
        }
    }

    while running.join_next().await.is_some() {}
}
