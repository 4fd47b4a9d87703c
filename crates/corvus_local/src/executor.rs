//! Per-job state machine driving one process to completion.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use corvus_core::prelude::*;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
enum ExecutorState {
    Created,
    Running,
    Done {
        exit_code: i32,
    },
    Failed {
        exit_code: Option<i32>,
        error: SchedulerError,
        killed: bool,
    },
}

impl ExecutorState {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Failed { .. })
    }

    fn has_started(&self) -> bool {
        !matches!(self, Self::Created)
    }
}

#[derive(Debug, Default)]
struct Timestamps {
    submitted: Option<DateTime<Utc>>,
    started: Option<DateTime<Utc>>,
    finished: Option<DateTime<Utc>>,
}

enum Outcome {
    Exited(Result<i32, SchedulerError>),
    Killed(&'static str),
}

/// Drives one job's process through `Created → Running → Done`, with `Failed`
/// reachable from either state.
///
/// The executor is shared between the queue that owns it and the worker that runs
/// it. All state changes go through a [`watch`] channel, which is also what the
/// `wait_until_*` operations block on.
pub struct JobExecutor {
    job: JobHandle,
    adaptor: String,
    state: watch::Sender<ExecutorState>,
    cancel: CancellationToken,
    streams: Mutex<Option<ProcessStreams>>,
    times: Mutex<Timestamps>,
}

impl JobExecutor {
    pub fn new(job: JobHandle, adaptor: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ExecutorState::Created);
        let times = Timestamps {
            submitted: Some(Utc::now()),
            ..Default::default()
        };

        Self {
            job,
            adaptor: adaptor.into(),
            state,
            cancel: CancellationToken::new(),
            streams: Mutex::new(None),
            times: Mutex::new(times),
        }
    }

    pub fn job(&self) -> &JobHandle {
        &self.job
    }

    pub fn is_done(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    /// Starts the process through `factory` and drives it until it exits, is killed
    /// or exceeds its maximum run time.
    ///
    /// Called by exactly one queue worker. Returns immediately if the job was killed
    /// before a worker picked it up.
    pub async fn run<F: ProcessFactory>(&self, factory: &F, working_directory: &str) {
        if self.state.borrow().has_started() {
            debug!(job_id = %self.job.id, "Job was killed before it started");
            return;
        }

        let _guard = AbandonGuard {
            state: &self.state,
            adaptor: &self.adaptor,
        };

        let spec = ProcessSpec {
            job_id: self.job.id.clone(),
            description: self.job.description.clone(),
            working_directory: working_directory.to_string(),
            interactive: self.job.interactive,
        };

        let mut process = match factory.start_process(spec).await {
            Ok(process) => process,
            Err(e) => {
                warn!(job_id = %self.job.id, error = %e, "Failed to start job");
                self.finish(ExecutorState::Failed {
                    exit_code: None,
                    error: e,
                    killed: false,
                });
                return;
            }
        };

        if let Some(streams) = process.take_streams() {
            *lock(&self.streams) = Some(streams);
        }

        let started = self.state.send_if_modified(|state| {
            if matches!(state, ExecutorState::Created) {
                *state = ExecutorState::Running;
                true
            } else {
                false
            }
        });

        if !started {
            // killed while the process was being started
            if let Err(e) = process.kill().await {
                warn!(job_id = %self.job.id, error = %e, "Failed to kill process");
            }
            return;
        }

        lock(&self.times).started = Some(Utc::now());
        info!(job_id = %self.job.id, command = %self.job.description.command_line(), "Job running");

        let max_runtime = match self.job.description.max_runtime {
            0 => None,
            minutes => Some(Duration::from_secs(u64::from(minutes) * 60)),
        };

        let outcome = tokio::select! {
            result = process.wait() => Outcome::Exited(result),
            _ = self.cancel.cancelled() => Outcome::Killed("Process cancelled by user"),
            _ = expire(max_runtime) => Outcome::Killed("Process timed out"),
        };

        let next = match outcome {
            Outcome::Exited(Ok(exit_code)) => ExecutorState::Done { exit_code },
            Outcome::Exited(Err(error)) => ExecutorState::Failed {
                exit_code: None,
                error,
                killed: false,
            },
            Outcome::Killed(reason) => {
                if let Err(e) = process.kill().await {
                    warn!(job_id = %self.job.id, error = %e, "Failed to kill process");
                }
                let exit_code = process.wait().await.ok();
                ExecutorState::Failed {
                    exit_code,
                    error: SchedulerError::canceled(&self.adaptor, reason),
                    killed: true,
                }
            }
        };

        self.finish(next);
    }

    fn finish(&self, next: ExecutorState) {
        lock(&self.times).finished = Some(Utc::now());
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = next;
            true
        });
        debug!(job_id = %self.job.id, "Job finished");
    }

    /// Non-blocking snapshot of the job's state.
    pub fn status(&self) -> JobStatus {
        let state = self.state.borrow().clone();
        let (label, exit_code, error, running, done) = match state {
            ExecutorState::Created => (states::PENDING, None, None, false, false),
            ExecutorState::Running => (states::RUNNING, None, None, true, false),
            ExecutorState::Done { exit_code } => (states::DONE, Some(exit_code), None, false, true),
            ExecutorState::Failed {
                exit_code,
                error,
                killed,
            } => {
                let label = if killed { states::KILLED } else { states::ERROR };
                (label, exit_code, Some(error), false, true)
            }
        };

        let mut info = HashMap::new();
        let times = lock(&self.times);
        for (key, time) in [
            ("submitted", times.submitted),
            ("started", times.started),
            ("finished", times.finished),
        ] {
            if let Some(time) = time {
                info.insert(key.to_string(), time.to_rfc3339());
            }
        }

        JobStatus {
            job: self.job.clone(),
            state: label.to_string(),
            exit_code,
            error,
            running,
            done,
            info,
        }
    }

    /// Blocks until the job is done or `timeout` elapses ([`Duration::ZERO`] waits
    /// forever), then returns the current snapshot.
    pub async fn wait_until_done(&self, timeout: Duration) -> JobStatus {
        self.wait_for(timeout, ExecutorState::is_terminal).await
    }

    /// Blocks until the job has left the `Created` state or `timeout` elapses.
    pub async fn wait_until_running(&self, timeout: Duration) -> JobStatus {
        self.wait_for(timeout, ExecutorState::has_started).await
    }

    async fn wait_for(&self, timeout: Duration, condition: fn(&ExecutorState) -> bool) -> JobStatus {
        let mut rx = self.state.subscribe();
        {
            let wait = rx.wait_for(condition);
            if timeout.is_zero() {
                let _ = wait.await;
            } else {
                let _ = tokio::time::timeout(timeout, wait).await;
            }
        }
        self.status()
    }

    /// Kills the job. Idempotent.
    ///
    /// Returns `true` only if a live process was signalled. A job that has not
    /// started yet is marked killed and never starts; a finished job is left alone.
    pub async fn kill(&self) -> bool {
        let killed_before_start = self.state.send_if_modified(|state| {
            if matches!(state, ExecutorState::Created) {
                *state = ExecutorState::Failed {
                    exit_code: None,
                    error: SchedulerError::canceled(&self.adaptor, "Process cancelled by user"),
                    killed: true,
                };
                true
            } else {
                false
            }
        });

        if killed_before_start {
            self.cancel.cancel();
            return false;
        }

        if !matches!(*self.state.borrow(), ExecutorState::Running) {
            return false;
        }

        self.cancel.cancel();
        self.wait_until_done(Duration::ZERO).await;
        true
    }

    /// Marks a job that will never run (or finish) because its queue shut down.
    pub(crate) fn abandon(&self) {
        abandon(&self.state, &self.adaptor);
        self.cancel.cancel();
    }

    /// Takes the live streams of an interactive job. Available once the job is
    /// running; `None` after they have been taken.
    pub fn take_streams(&self) -> Option<Streams> {
        lock(&self.streams)
            .take()
            .map(|streams| Streams::new(self.job.clone(), streams))
    }
}

/// Marks the job as failed if its worker is dropped mid-run (e.g. the queue was
/// shut down), so waiters never block on a job nobody drives any more.
struct AbandonGuard<'a> {
    state: &'a watch::Sender<ExecutorState>,
    adaptor: &'a str,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        abandon(self.state, self.adaptor);
    }
}

fn abandon(state: &watch::Sender<ExecutorState>, adaptor: &str) {
    state.send_if_modified(|state| {
        if state.is_terminal() {
            return false;
        }
        *state = ExecutorState::Failed {
            exit_code: None,
            error: SchedulerError::canceled(adaptor, "Job abandoned on shutdown"),
            killed: true,
        };
        true
    });
}

async fn expire(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
