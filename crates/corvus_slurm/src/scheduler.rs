use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use corvus_core::prelude::*;
use corvus_local::executor::JobExecutor;
use corvus_script::connection::ScriptingConnection;
use corvus_script::parser::{self, Record};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ADAPTOR;
use crate::config::SlurmConfig;
use crate::script::{self, JOB_SCRIPT_OPTION, VALID_JOB_OPTIONS};
use crate::status;

// job names, reasons and comments may contain spaces
const SQUEUE_FORMAT: &str = "--format=%i|%P|%j|%u|%T|%M|%l|%D|%R|%k";
const SACCT_FORMAT: &str = "--format=JobID,JobName,Partition,NTasks,Elapsed,State,ExitCode,\
                            AllocCPUS,DerivedExitCode,Submit,Suspended,Start,User,End,NNodes,\
                            Timelimit,Comment,Priority";
const SINFO_QUEUE_FORMAT: &str = "--format=%P %a %l %F %N %C %D";

type Rows = HashMap<String, Record>;

/// A Slurm cluster, driven through `sbatch`, `squeue`, `sacct`, `scontrol`, `scancel`,
/// `sinfo` and `salloc`.
///
/// The commands run through the [`ProcessFactory`] the scheduler was connected with:
/// [`LocalProcessFactory`](corvus_local::process::LocalProcessFactory) on a login
/// node, or an SSH process factory from `corvus_ssh` for a remote cluster.
///
/// Interactive jobs run `salloc` as a helper job and are matched to their Slurm job
/// through a random tag in the job comment.
pub struct SlurmScheduler<F: ProcessFactory> {
    connection: ScriptingConnection<F>,
    config: SlurmConfig,
    version: String,
    accounting: bool,
    partitions: Vec<String>,
    default_partition: Option<String>,
    /// Slurm job id of an interactive job → the `salloc` helper owning its streams.
    helpers: Mutex<HashMap<String, Arc<JobExecutor>>>,
}

impl<F: ProcessFactory> SlurmScheduler<F> {
    /// Probes the cluster configuration and partitions. Fails on Slurm versions the
    /// adaptor does not support, unless [`SlurmConfig::ignore_version`] is set.
    ///
    /// `working_directory` is the directory relative job paths are resolved against,
    /// on the machine the commands run on.
    pub async fn connect(
        factory: F,
        working_directory: impl Into<String>,
        config: SlurmConfig,
    ) -> Result<Self, SchedulerError> {
        let connection = ScriptingConnection::new(
            ADAPTOR,
            factory,
            working_directory,
            config.poll_delay(),
            config.queues.clone(),
        )?;

        let output = connection
            .run_checked_command("scontrol", ["show", "config"], None)
            .await?;
        let settings = parser::parse_key_value_lines(&output.stdout, '=');

        let version = settings
            .get("SLURM_VERSION")
            .cloned()
            .ok_or_else(|| SchedulerError::adaptor(ADAPTOR, "Cannot determine Slurm version"))?;
        status::check_version(&version, config.ignore_version)?;
        if status::check_version(&version, false).is_err() {
            warn!(version = %version, "Using unsupported Slurm version");
        }

        let accounting = !config.disable_accounting && status::accounting_available(&settings);

        let output = connection
            .run_checked_command("sinfo", ["--noheader", "--format=%120P"], None)
            .await?;
        let (partitions, default_partition) = status::parse_partitions(&output.stdout);

        info!(
            location = %connection.location(),
            version = %version,
            accounting,
            partitions = ?partitions,
            "Connected to Slurm"
        );

        Ok(Self {
            connection,
            config,
            version,
            accounting,
            partitions,
            default_partition,
            helpers: Mutex::new(HashMap::new()),
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn accounting_enabled(&self) -> bool {
        self.accounting
    }

    pub fn connection(&self) -> &ScriptingConnection<F> {
        &self.connection
    }

    fn helper(&self, id: &str) -> Option<Arc<JobExecutor>> {
        lock(&self.helpers).get(id).cloned()
    }

    // ------------------------------------------------------------------
    // Information sources
    // ------------------------------------------------------------------

    /// Rows of `squeue`, keyed by job id. Only active jobs are listed.
    async fn squeue(&self, ids: &[&str]) -> Result<Rows, SchedulerError> {
        let mut args = vec![SQUEUE_FORMAT.to_string()];
        if !ids.is_empty() {
            args.push(format!("--jobs={}", ids.join(",")));
        }

        let output = self.connection.run_command("squeue", args, None).await?;
        if !output.success() {
            // older releases refuse the whole query if one id is unknown
            if output.stderr.contains("Invalid job id") {
                return Ok(Rows::new());
            }
            return Err(SchedulerError::adaptor(
                ADAPTOR,
                format!("squeue failed: {}", output.stderr.trim()),
            ));
        }

        parser::parse_separated_table(&output.stdout, '|', "JOBID")
            .map_err(|e| e.into_scheduler_error(ADAPTOR, "squeue"))
    }

    /// Rows of `sacct`, keyed by job id. Lists finished jobs too.
    async fn sacct(&self, ids: &[&str]) -> Result<Rows, SchedulerError> {
        let mut args = vec!["-X".to_string(), "-p".to_string(), SACCT_FORMAT.to_string()];
        if !ids.is_empty() {
            args.push(format!("--jobs={}", ids.join(",")));
        }

        let output = self.connection.run_checked_command("sacct", args, None).await?;
        parser::parse_separated_table(&output.stdout, '|', "JobID")
            .map_err(|e| e.into_scheduler_error(ADAPTOR, "sacct"))
    }

    /// `scontrol show job <id>`, one command per job.
    async fn scontrol(&self, id: &str) -> Lookup<Record> {
        let output = match self
            .connection
            .run_command("scontrol", ["show", "job", id], None)
            .await
        {
            Ok(output) => output,
            Err(e) => return Lookup::Failed(e),
        };

        if !output.success() {
            if output.stderr.contains("Invalid job id") {
                return Lookup::NotFound;
            }
            return Lookup::Failed(SchedulerError::adaptor(
                ADAPTOR,
                format!("scontrol failed: {}", output.stderr.trim()),
            ));
        }

        parser::parse_key_value_records(&output.stdout)
            .into_iter()
            .find(|record| record.get("JobId").map(String::as_str) == Some(id))
            .into()
    }

    /// Statuses of `jobs`, one `squeue` and one `sacct` round trip for all of them,
    /// then `scontrol` for every job neither of those knows.
    async fn statuses(&self, jobs: &[JobHandle]) -> Vec<Result<JobStatus, SchedulerError>> {
        if jobs.is_empty() {
            return Vec::new();
        }

        let ids: Vec<&str> = jobs.iter().map(|job| job.id.as_str()).collect();

        let live = self.squeue(&ids).await;
        if let Err(e) = &live {
            warn!(error = %e, "Cannot list active jobs");
        }

        let accounted = if self.accounting {
            Some(self.sacct(&ids).await)
        } else {
            None
        };
        if let Some(Err(e)) = &accounted {
            warn!(error = %e, "Cannot read accounting");
        }

        let mut result = Vec::with_capacity(jobs.len());
        for job in jobs {
            let status = self.reconcile(job, &live, accounted.as_ref()).await;
            if let Ok(status) = &status {
                self.forget_finished(status);
            }
            result.push(status);
        }
        result
    }

    /// First source that knows the job wins.
    async fn reconcile(
        &self,
        job: &JobHandle,
        live: &Result<Rows, SchedulerError>,
        accounted: Option<&Result<Rows, SchedulerError>>,
    ) -> Result<JobStatus, SchedulerError> {
        if let Some(row) = live.as_ref().ok().and_then(|rows| rows.get(&job.id)) {
            return status::status_from_squeue(job, row);
        }

        if let Some(Ok(rows)) = accounted {
            if let Some(row) = rows.get(&job.id) {
                return status::status_from_sacct(job, row);
            }
        }

        match self.scontrol(&job.id).await {
            Lookup::Found(record) => status::status_from_scontrol(job, &record),
            Lookup::Failed(e) => Err(e),
            Lookup::NotFound => {
                // a source that could not be asked may still know the job
                if let Err(e) = live {
                    return Err(e.clone());
                }
                if let Some(Err(e)) = accounted {
                    return Err(e.clone());
                }
                Err(SchedulerError::no_such_job(ADAPTOR, &job.id))
            }
        }
    }

    /// Drops the helper of a finished interactive job once the helper is gone too.
    fn forget_finished(&self, status: &JobStatus) {
        if !status.done {
            return;
        }
        let mut helpers = lock(&self.helpers);
        if helpers.get(&status.job.id).is_some_and(|helper| helper.is_done()) {
            helpers.remove(&status.job.id);
        }
    }

    // ------------------------------------------------------------------
    // Interactive jobs
    // ------------------------------------------------------------------

    /// Polls for the job carrying `tag` until it shows up, the helper ends without it
    /// showing up, or the interactive timeout runs out. A failed lookup is retried
    /// until then; the last such failure is handed back for the diagnosis.
    async fn find_tagged_job(
        &self,
        tag: &str,
        helper: &JobExecutor,
    ) -> Result<String, Option<SchedulerError>> {
        // a timeout too large to represent never runs out
        let deadline = Instant::now().checked_add(self.config.interactive_timeout());
        let mut last_error = None;

        loop {
            let helper_done = helper.is_done();

            match self.lookup_tag(tag).await {
                Ok(Some(id)) => return Ok(id),
                Ok(None) => last_error = None,
                Err(e) => {
                    warn!(tag, error = %e, "Cannot look up interactive job, retrying");
                    last_error = Some(e);
                }
            }

            if helper_done {
                debug!(tag, "Helper ended before its job showed up");
                return Err(last_error);
            }

            let mut delay = self.connection.poll_delay();
            if let Some(deadline) = deadline {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Err(last_error);
                }
                delay = delay.min(left);
            }
            tokio::time::sleep(delay).await;
        }
    }

    async fn lookup_tag(&self, tag: &str) -> Result<Option<String>, SchedulerError> {
        let live = self.squeue(&[]).await?;
        if let Some(id) = find_comment(&live, "COMMENT", tag) {
            return Ok(Some(id));
        }

        if self.accounting {
            let accounted = self.sacct(&[]).await?;
            return Ok(find_comment(&accounted, "Comment", tag));
        }

        Ok(None)
    }

    /// The most specific reason the job of `tag` never showed up.
    async fn diagnose(
        &self,
        tag: &str,
        helper: &JobExecutor,
        lookup_error: Option<SchedulerError>,
    ) -> SchedulerError {
        let status = helper.status();
        if !status.done {
            helper.kill().await;
        }
        if let Err(e) = self.connection.queues().get_job_status(helper.job()) {
            debug!(error = %e, "Helper already gone");
        }

        if let Some(error) = status.error {
            return error;
        }

        if status.exit_code == Some(1) {
            return SchedulerError::adaptor(
                ADAPTOR,
                format!(
                    "Interactive job with tag {tag} failed: salloc exited with exit code 1, \
                     likely invalid job options"
                ),
            );
        }

        if let Some(error) = lookup_error {
            return error;
        }

        SchedulerError::adaptor(
            ADAPTOR,
            format!(
                "Cannot find interactive job with tag {tag}, helper state {}",
                status.state
            ),
        )
    }
}

fn find_comment(rows: &Rows, column: &str, tag: &str) -> Option<String> {
    rows.iter()
        .find(|(_, row)| row.get(column).map(String::as_str) == Some(tag))
        .map(|(id, _)| id.clone())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<F: ProcessFactory> Scheduler for SlurmScheduler<F> {
    fn adaptor_name(&self) -> &str {
        ADAPTOR
    }

    fn location(&self) -> &str {
        self.connection.location()
    }

    fn queue_names(&self) -> Vec<String> {
        self.partitions.clone()
    }

    fn default_queue_name(&self) -> Option<String> {
        self.default_partition.clone()
    }

    fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    async fn submit_batch_job(&self, description: JobDescription) -> Result<JobHandle, SchedulerError> {
        self.connection
            .verify_job_options(&description.job_options, &VALID_JOB_OPTIONS)?;

        let output = match description.job_options.get(JOB_SCRIPT_OPTION) {
            Some(path) => {
                debug!(script = %path, "Submitting existing job script");
                self.connection
                    .run_checked_command("sbatch", [path.as_str()], None)
                    .await?
            }
            None => {
                self.connection
                    .verify_job_description(&description, &self.partitions, false, true)?;
                let script = script::render_job_script(
                    &description,
                    self.connection.queues().working_directory(),
                    self.config.default_runtime,
                );
                self.connection
                    .run_checked_command("sbatch", Vec::<String>::new(), Some(script.as_str()))
                    .await?
            }
        };

        let id = status::parse_submitted_job_id(&output.stdout)?;
        info!(job_id = %id, command = %description.command_line(), "Batch job submitted");

        Ok(JobHandle::new(
            id,
            self.connection.scheduler_ref().clone(),
            description,
            false,
        ))
    }

    async fn submit_interactive_job(
        &self,
        description: JobDescription,
    ) -> Result<JobHandle, SchedulerError> {
        self.connection.verify_job_options(&description.job_options, &[])?;
        self.connection
            .verify_job_description(&description, &self.partitions, true, false)?;

        let tag = Uuid::new_v4().to_string();
        let args = script::salloc_arguments(
            &description,
            &tag,
            self.connection.queues().working_directory(),
            self.config.default_runtime,
        );
        let helper_description = JobDescription::new("salloc")
            .with_arguments(args)
            .with_queue(queues::UNLIMITED);

        let queues = self.connection.queues();
        let helper_job = queues.submit_interactive_job(helper_description).await?;
        let helper = queues.executor(&helper_job)?;
        debug!(tag = %tag, helper = %helper_job.id, "Interactive helper started");

        let id = match self.find_tagged_job(&tag, &helper).await {
            Ok(id) => id,
            Err(lookup_error) => return Err(self.diagnose(&tag, &helper, lookup_error).await),
        };

        lock(&self.helpers).insert(id.clone(), helper);
        info!(job_id = %id, tag = %tag, "Interactive job submitted");

        Ok(JobHandle::new(
            id,
            self.connection.scheduler_ref().clone(),
            description,
            true,
        ))
    }

    async fn get_jobs(&self, queues: &[&str]) -> Result<Vec<JobHandle>, SchedulerError> {
        self.connection.check_queue_names(queues, &self.partitions)?;

        let rows = self.squeue(&[]).await?;
        let helpers = lock(&self.helpers).keys().cloned().collect::<Vec<_>>();

        let mut jobs: Vec<JobHandle> = rows
            .into_iter()
            .filter(|(_, row)| {
                queues.is_empty()
                    || row
                        .get("PARTITION")
                        .is_some_and(|p| queues.contains(&p.as_str()))
            })
            .map(|(id, row)| {
                let description = JobDescription {
                    queue_name: row.get("PARTITION").cloned(),
                    ..Default::default()
                };
                let interactive = helpers.contains(&id);
                JobHandle::new(
                    id,
                    self.connection.scheduler_ref().clone(),
                    description,
                    interactive,
                )
            })
            .collect();

        jobs.sort_by(|a, b| (a.id.len(), &a.id).cmp(&(b.id.len(), &b.id)));
        Ok(jobs)
    }

    async fn get_job_status(&self, job: &JobHandle) -> Result<JobStatus, SchedulerError> {
        self.statuses(std::slice::from_ref(job))
            .await
            .pop()
            .unwrap_or_else(|| Err(SchedulerError::no_such_job(ADAPTOR, &job.id)))
    }

    async fn get_job_statuses(&self, jobs: &[JobHandle]) -> Vec<JobStatus> {
        self.statuses(jobs)
            .await
            .into_iter()
            .zip(jobs)
            .map(|(status, job)| status.unwrap_or_else(|e| JobStatus::from_error(job.clone(), e)))
            .collect()
    }

    async fn cancel_job(&self, job: &JobHandle) -> Result<JobStatus, SchedulerError> {
        let output = self
            .connection
            .run_command("scancel", [job.id.as_str()], None)
            .await?;
        if !output.success() && output.stderr.contains("Invalid job id") {
            return Err(SchedulerError::no_such_job(ADAPTOR, &job.id));
        }
        parser::check_empty_output(&output, ADAPTOR, "scancel")?;

        if let Some(helper) = self.helper(&job.id) {
            helper.kill().await;
        }
        debug!(job_id = %job.id, "Job cancelled");

        self.get_job_status(job).await
    }

    async fn wait_until_done(
        &self,
        job: &JobHandle,
        timeout: Duration,
    ) -> Result<JobStatus, SchedulerError> {
        self.connection
            .poll_until_done(timeout, move || self.get_job_status(job))
            .await
    }

    async fn wait_until_running(
        &self,
        job: &JobHandle,
        timeout: Duration,
    ) -> Result<JobStatus, SchedulerError> {
        self.connection
            .poll_until_running(timeout, move || self.get_job_status(job))
            .await
    }

    async fn get_queue_status(&self, queue: &str) -> Result<QueueStatus, SchedulerError> {
        if !self.partitions.iter().any(|p| p == queue) {
            return Err(SchedulerError::no_such_queue(ADAPTOR, queue));
        }

        let output = self
            .connection
            .run_checked_command(
                "sinfo",
                [SINFO_QUEUE_FORMAT.to_string(), format!("--partition={queue}")],
                None,
            )
            .await?;
        let rows = parser::parse_whitespace_table(&output.stdout, "PARTITION")
            .map_err(|e| e.into_scheduler_error(ADAPTOR, "sinfo"))?;

        Ok(QueueStatus {
            scheduler: self.connection.scheduler_ref().clone(),
            queue_name: queue.to_string(),
            error: None,
            info: status::queue_info(rows),
        })
    }

    async fn get_streams(&self, job: &JobHandle) -> Result<Streams, SchedulerError> {
        let helper = self.helper(&job.id).ok_or_else(|| {
            if job.interactive {
                SchedulerError::no_such_job(ADAPTOR, &job.id)
            } else {
                SchedulerError::invalid(ADAPTOR, format!("Job {} is not interactive", job.id))
            }
        })?;

        let streams = helper.take_streams().ok_or_else(|| {
            SchedulerError::adaptor(ADAPTOR, format!("Streams of job {} are not available", job.id))
        })?;

        Ok(Streams {
            job: job.clone(),
            ..streams
        })
    }

    async fn close(&self) -> Result<(), SchedulerError> {
        lock(&self.helpers).clear();
        self.connection.end();
        info!(location = %self.connection.location(), "Slurm scheduler closed");
        self.connection.queues().factory().close().await
    }
}
