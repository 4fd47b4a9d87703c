//! The Slurm scheduler against a fake cluster that replays recorded command output.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use corvus_core::prelude::*;
use corvus_slurm::prelude::*;
use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const CONFIG: &str = include_str!("fixtures/scontrol_show_config.txt");
const CONFIG_NO_ACCOUNTING: &str = include_str!("fixtures/scontrol_show_config_no_accounting.txt");
const CONFIG_OLD: &str = include_str!("fixtures/scontrol_show_config_old.txt");
const PARTITIONS: &str = include_str!("fixtures/sinfo_partitions.txt");
const SQUEUE_JOBS: &str = include_str!("fixtures/squeue_jobs.txt");
const SQUEUE_EMPTY: &str = include_str!("fixtures/squeue_empty.txt");
const SACCT_JOBS: &str = include_str!("fixtures/sacct_jobs.txt");
const SACCT_EMPTY: &str = include_str!("fixtures/sacct_empty.txt");
const SCONTROL_JOB: &str = include_str!("fixtures/scontrol_show_job.txt");
const SINFO_QUEUE: &str = include_str!("fixtures/sinfo_queue.txt");

const INVALID_JOB: &str = "slurm_load_jobs error: Invalid job id specified\n";

// ============================================================================
// Fake cluster
// ============================================================================

#[derive(Clone)]
enum Reply {
    Output {
        stdout: String,
        stderr: String,
        exit_code: i32,
    },
    /// An `salloc` session: echoes stdin to stdout until killed.
    Session,
}

fn ok(stdout: &str) -> Reply {
    Reply::Output {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: 0,
    }
}

fn fail(stderr: &str, exit_code: i32) -> Reply {
    Reply::Output {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code,
    }
}

struct Rule {
    command: String,
    needle: String,
    replies: VecDeque<Reply>,
}

#[derive(Default)]
struct Cluster {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
    inputs: Mutex<Vec<String>>,
    tag: Mutex<String>,
    sessions: Mutex<Vec<CancellationToken>>,
}

/// Replies to commands by matching on the command name and a substring of the
/// command line. The last reply of a rule repeats; earlier ones are used once.
/// `{tag}` in a reply is replaced by the comment of the latest `salloc` call.
#[derive(Clone, Default)]
struct FakeCluster(Arc<Cluster>);

impl FakeCluster {
    fn with_config(config: &str) -> Self {
        let cluster = Self::default();
        cluster.on("scontrol", "show config", ok(config));
        cluster.on("sinfo", "%120P", ok(PARTITIONS));
        cluster
    }

    fn on(&self, command: &str, needle: &str, reply: Reply) {
        let mut rules = self.0.rules.lock().unwrap();
        match rules
            .iter_mut()
            .find(|r| r.command == command && r.needle == needle)
        {
            Some(rule) => rule.replies.push_back(reply),
            None => rules.push(Rule {
                command: command.to_string(),
                needle: needle.to_string(),
                replies: VecDeque::from([reply]),
            }),
        }
    }

    fn calls(&self, command: &str) -> Vec<String> {
        self.0
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.split(' ').next() == Some(command))
            .cloned()
            .collect()
    }

    /// Whether every `salloc` session started so far has been killed.
    fn sessions_killed(&self) -> bool {
        self.0
            .sessions
            .lock()
            .unwrap()
            .iter()
            .all(CancellationToken::is_cancelled)
    }

    fn inputs(&self) -> Vec<String> {
        self.0.inputs.lock().unwrap().clone()
    }

    fn reply(&self, command: &str, line: &str) -> Reply {
        let mut rules = self.0.rules.lock().unwrap();
        let rule = rules
            .iter_mut()
            .filter(|r| r.command == command && line.contains(&r.needle))
            .max_by_key(|r| r.needle.len());

        match rule {
            Some(rule) if rule.replies.len() > 1 => rule.replies.pop_front().unwrap(),
            Some(rule) => rule.replies[0].clone(),
            None => fail(&format!("{command}: command not found"), 127),
        }
    }
}

enum Exit {
    Output {
        input: Option<JoinHandle<()>>,
        exit_code: i32,
    },
    Session(CancellationToken),
}

struct FakeProcess {
    streams: Option<ProcessStreams>,
    exit: Exit,
}

impl Process for FakeProcess {
    fn take_streams(&mut self) -> Option<ProcessStreams> {
        self.streams.take()
    }

    fn wait(&mut self) -> BoxFuture<'_, Result<i32, SchedulerError>> {
        Box::pin(async move {
            match &mut self.exit {
                Exit::Output { input, exit_code } => {
                    if let Some(task) = input.take() {
                        let _ = task.await;
                    }
                    Ok(*exit_code)
                }
                Exit::Session(token) => {
                    token.cancelled().await;
                    Ok(0)
                }
            }
        })
    }

    fn kill(&mut self) -> BoxFuture<'_, Result<(), SchedulerError>> {
        match &mut self.exit {
            Exit::Output { input, .. } => {
                if let Some(task) = input.take() {
                    task.abort();
                }
            }
            Exit::Session(token) => token.cancel(),
        }
        Box::pin(async { Ok(()) })
    }
}

impl ProcessFactory for FakeCluster {
    fn adaptor_name(&self) -> &str {
        "slurm"
    }

    fn location(&self) -> &str {
        "fake-cluster"
    }

    async fn start_process(&self, spec: ProcessSpec) -> Result<Box<dyn Process>, SchedulerError> {
        let desc = &spec.description;
        let command = desc.executable.clone().unwrap_or_default();
        let line = desc.command_line();
        self.0.calls.lock().unwrap().push(line.clone());

        if command == "salloc" {
            if let Some(tag) = desc.arguments.iter().find_map(|a| a.strip_prefix("--comment=")) {
                *self.0.tag.lock().unwrap() = tag.to_string();
            }
        }

        let process = match self.reply(&command, &line) {
            Reply::Session => {
                let (stdin, stdout) = tokio::io::duplex(4096);
                let token = CancellationToken::new();
                self.0.sessions.lock().unwrap().push(token.clone());
                FakeProcess {
                    streams: Some(ProcessStreams {
                        stdin: Box::new(stdin),
                        stdout: Box::new(stdout),
                        stderr: Box::new(Cursor::new(Vec::<u8>::new())),
                    }),
                    exit: Exit::Session(token),
                }
            }
            Reply::Output {
                stdout,
                stderr,
                exit_code,
            } => {
                let stdout = stdout.replace("{tag}", &self.0.tag.lock().unwrap());

                // only sbatch reads a script from stdin
                let (stdin, input) = if command == "sbatch" {
                    let (stdin, mut reader) = tokio::io::duplex(1 << 16);
                    let cluster = self.0.clone();
                    let task = tokio::spawn(async move {
                        let mut text = String::new();
                        let _ = reader.read_to_string(&mut text).await;
                        if !text.is_empty() {
                            cluster.inputs.lock().unwrap().push(text);
                        }
                    });
                    (Box::new(stdin) as StdinStream, Some(task))
                } else {
                    (Box::new(tokio::io::sink()) as StdinStream, None)
                };

                FakeProcess {
                    streams: Some(ProcessStreams {
                        stdin,
                        stdout: Box::new(Cursor::new(stdout.into_bytes())),
                        stderr: Box::new(Cursor::new(stderr.into_bytes())),
                    }),
                    exit: Exit::Output { input, exit_code },
                }
            }
        };

        Ok(Box::new(process))
    }

    async fn close(&self) -> Result<(), SchedulerError> {
        Ok(())
    }
}

fn config() -> SlurmConfig {
    SlurmConfig::default()
        .with_poll_delay(Duration::from_millis(10))
        .with_interactive_timeout(Duration::from_secs(2))
}

async fn connect(cluster: &FakeCluster) -> SlurmScheduler<FakeCluster> {
    SlurmScheduler::connect(cluster.clone(), "/home/alice", config())
        .await
        .expect("Failed to connect to fake cluster")
}

fn handle(slurm: &SlurmScheduler<FakeCluster>, id: &str) -> JobHandle {
    JobHandle::new(id, slurm.scheduler_ref(), JobDescription::new("a.out"), false)
}

// ============================================================================
// Connecting
// ============================================================================

#[tokio::test]
async fn connect_probes_version_and_partitions() {
    let cluster = FakeCluster::with_config(CONFIG);
    let slurm = connect(&cluster).await;

    assert_eq!(slurm.version(), "23.02.7");
    assert!(slurm.accounting_enabled());
    assert_eq!(slurm.queue_names(), ["debug", "batch", "gpu"]);
    assert_eq!(slurm.default_queue_name().as_deref(), Some("debug"));
    assert_eq!(slurm.scheduler_ref(), SchedulerRef::new("slurm", "fake-cluster"));
    assert_eq!(cluster.calls("scontrol"), ["scontrol show config"]);
}

#[tokio::test]
async fn unsupported_version_is_refused() {
    let cluster = FakeCluster::with_config(CONFIG_OLD);
    let err = SlurmScheduler::connect(cluster.clone(), "/home/alice", config())
        .await
        .err()
        .expect("old version accepted");
    assert!(matches!(err, SchedulerError::IncompatibleVersion { .. }), "{err}");

    let ignoring = SlurmConfig {
        ignore_version: true,
        ..config()
    };
    let slurm = SlurmScheduler::connect(cluster, "/home/alice", ignoring)
        .await
        .unwrap();
    assert_eq!(slurm.version(), "15.08.7");
}

#[tokio::test]
async fn clusters_without_accounting_are_never_asked() {
    let cluster = FakeCluster::with_config(CONFIG_NO_ACCOUNTING);
    cluster.on("squeue", "", ok(SQUEUE_EMPTY));
    cluster.on("scontrol", "show job", fail(INVALID_JOB, 1));
    let slurm = connect(&cluster).await;
    assert!(!slurm.accounting_enabled());

    let err = slurm.get_job_status(&handle(&slurm, "99")).await.unwrap_err();
    assert!(err.is_no_such_job(), "{err}");
    assert!(cluster.calls("sacct").is_empty());
}

#[tokio::test]
async fn accounting_can_be_switched_off() {
    let cluster = FakeCluster::with_config(CONFIG);
    let config = SlurmConfig {
        disable_accounting: true,
        ..config()
    };
    let slurm = SlurmScheduler::connect(cluster, "/home/alice", config)
        .await
        .unwrap();
    assert!(!slurm.accounting_enabled());
}

// ============================================================================
// Batch submission
// ============================================================================

#[tokio::test]
async fn job_script_is_piped_to_sbatch() -> anyhow::Result<()> {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("sbatch", "", ok("Submitted batch job 4711\n"));
    let slurm = connect(&cluster).await;

    let desc = JobDescription::new("./simulate")
        .with_arguments(["--steps", "100"])
        .with_queue("batch");
    let job = slurm.submit_batch_job(desc).await?;

    assert_eq!(job.id, "4711");
    assert!(job.batch);
    assert_eq!(cluster.calls("sbatch"), ["sbatch"]);

    let inputs = cluster.inputs();
    assert_eq!(inputs.len(), 1);
    assert!(inputs[0].starts_with("#!/bin/sh\n"));
    assert!(inputs[0].contains("#SBATCH --partition=batch\n"));
    assert!(inputs[0].contains("#SBATCH --time=15\n"));
    assert!(inputs[0].contains("srun ./simulate --steps 100\n"));
    Ok(())
}

#[tokio::test]
async fn existing_script_is_submitted_verbatim() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("sbatch", "", ok("Submitted batch job 4712\n"));
    let slurm = connect(&cluster).await;

    // other fields are not looked at
    let desc = JobDescription::new("ignored")
        .with_queue("not-a-partition")
        .with_option(JOB_SCRIPT_OPTION, "/home/alice/job.sh");
    let job = slurm.submit_batch_job(desc).await.unwrap();

    assert_eq!(job.id, "4712");
    assert_eq!(cluster.calls("sbatch"), ["sbatch /home/alice/job.sh"]);
    assert!(cluster.inputs().is_empty());
}

#[tokio::test]
async fn invalid_descriptions_never_reach_sbatch() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("sbatch", "", ok("Submitted batch job 1\n"));
    let slurm = connect(&cluster).await;

    let err = slurm
        .submit_batch_job(JobDescription::new("a.out").with_queue("nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidJobDescription { .. }), "{err}");

    let err = slurm
        .submit_batch_job(JobDescription::new("a.out").with_option("mem", "4G"))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidJobDescription { .. }), "{err}");

    let err = slurm
        .submit_batch_job(JobDescription::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::IncompleteJobDescription { .. }), "{err}");

    assert!(cluster.calls("sbatch").is_empty());
}

#[tokio::test]
async fn sbatch_failure_is_reported() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("sbatch", "", fail("sbatch: error: Batch job submission failed\n", 1));
    let slurm = connect(&cluster).await;

    let err = slurm
        .submit_batch_job(JobDescription::new("a.out"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Batch job submission failed"), "{err}");
}

// ============================================================================
// Status
// ============================================================================

#[tokio::test]
async fn live_queue_wins_over_accounting() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("squeue", "", ok(SQUEUE_JOBS));
    cluster.on("sacct", "", ok(SACCT_JOBS));
    let slurm = connect(&cluster).await;

    let status = slurm.get_job_status(&handle(&slurm, "4711")).await.unwrap();
    assert_eq!(status.state, "RUNNING");
    assert!(status.running);
    assert!(!status.done);

    let status = slurm.get_job_status(&handle(&slurm, "4712")).await.unwrap();
    assert_eq!(status.state, "PENDING");
    assert!(!status.running && !status.done);
}

#[tokio::test]
async fn finished_jobs_come_from_accounting() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("squeue", "", ok(SQUEUE_EMPTY));
    cluster.on("sacct", "", ok(SACCT_JOBS));
    let slurm = connect(&cluster).await;

    let failed = slurm.get_job_status(&handle(&slurm, "4713")).await.unwrap();
    assert!(failed.done && failed.has_error());

    let nonzero = slurm.get_job_status(&handle(&slurm, "4714")).await.unwrap();
    assert!(nonzero.done);
    assert_eq!(nonzero.exit_code, Some(2));
    assert!(!nonzero.has_error());

    let cancelled = slurm.get_job_status(&handle(&slurm, "4715")).await.unwrap();
    assert!(cancelled.error.is_some_and(|e| e.is_canceled()));

    assert!(cluster.calls("scontrol").iter().all(|c| !c.contains("show job")));
}

#[tokio::test]
async fn scontrol_is_the_last_resort() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("squeue", "", ok(SQUEUE_EMPTY));
    cluster.on("sacct", "", ok(SACCT_EMPTY));
    cluster.on("scontrol", "show job", ok(SCONTROL_JOB));
    let slurm = connect(&cluster).await;

    let status = slurm.get_job_status(&handle(&slurm, "4720")).await.unwrap();
    assert_eq!(status.state, "FAILED");
    assert!(status.done);
    assert_eq!(status.exit_code, Some(1));
    assert!(!status.has_error(), "{:?}", status.error);
}

#[tokio::test]
async fn unknown_everywhere_is_no_such_job() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("squeue", "", fail(INVALID_JOB, 1));
    cluster.on("sacct", "", ok(SACCT_EMPTY));
    cluster.on("scontrol", "show job", fail(INVALID_JOB, 1));
    let slurm = connect(&cluster).await;

    let err = slurm.get_job_status(&handle(&slurm, "31337")).await.unwrap_err();
    assert!(err.is_no_such_job(), "{err}");
}

#[tokio::test]
async fn failing_source_is_not_reported_as_unknown_job() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("squeue", "", fail("squeue: error: slurm_receive_msg: Socket timed out\n", 1));
    cluster.on("sacct", "", ok(SACCT_EMPTY));
    cluster.on("scontrol", "show job", fail(INVALID_JOB, 1));
    let slurm = connect(&cluster).await;

    let err = slurm.get_job_status(&handle(&slurm, "4711")).await.unwrap_err();
    assert!(!err.is_no_such_job());
    assert!(err.to_string().contains("Socket timed out"), "{err}");
}

#[tokio::test]
async fn batch_status_queries_share_round_trips() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("squeue", "", ok(SQUEUE_JOBS));
    cluster.on("sacct", "", ok(SACCT_JOBS));
    cluster.on("scontrol", "show job", fail(INVALID_JOB, 1));
    let slurm = connect(&cluster).await;

    let jobs = ["4711", "4714", "9999"].map(|id| handle(&slurm, id));
    let statuses = slurm.get_job_statuses(&jobs).await;

    assert_eq!(statuses.len(), 3);
    assert_eq!(statuses[0].state, "RUNNING");
    assert_eq!(statuses[1].exit_code, Some(2));
    assert!(statuses[2].error.as_ref().is_some_and(|e| e.is_no_such_job()));

    assert_eq!(cluster.calls("squeue").len(), 1);
    assert!(cluster.calls("squeue")[0].ends_with("--jobs=4711,4714,9999"));
    assert_eq!(cluster.calls("sacct").len(), 1);
    let detail: Vec<_> = cluster
        .calls("scontrol")
        .into_iter()
        .filter(|c| c.contains("show job"))
        .collect();
    assert_eq!(detail, ["scontrol show job 9999"]);
}

#[tokio::test]
async fn wait_polls_until_the_job_is_done() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("squeue", "", ok(SQUEUE_JOBS));
    cluster.on("squeue", "", ok(SQUEUE_EMPTY));
    cluster.on("sacct", "", ok(SACCT_JOBS));
    let slurm = connect(&cluster).await;

    let status = slurm
        .wait_until_done(&handle(&slurm, "4711"), Duration::from_secs(5))
        .await
        .unwrap();
    assert!(status.is_success());
    assert_eq!(status.state, "COMPLETED");
    assert_eq!(cluster.calls("squeue").len(), 2);
}

#[tokio::test]
async fn wait_timeout_returns_the_last_status() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("squeue", "", ok(SQUEUE_JOBS));
    cluster.on("sacct", "", ok(SACCT_EMPTY));
    let slurm = connect(&cluster).await;

    let status = slurm
        .wait_until_done(&handle(&slurm, "4712"), Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(status.state, "PENDING");
    assert!(!status.done);
}

#[tokio::test]
async fn jobs_are_listed_per_partition() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("squeue", "", ok(SQUEUE_JOBS));
    let slurm = connect(&cluster).await;

    let all: Vec<_> = slurm.get_jobs(&[]).await.unwrap().into_iter().map(|j| j.id).collect();
    assert_eq!(all, ["4711", "4712"]);

    let batch = slurm.get_jobs(&["batch"]).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, "4712");

    let err = slurm.get_jobs(&["nope"]).await.unwrap_err();
    assert!(matches!(err, SchedulerError::NoSuchQueue { .. }));
}

// ============================================================================
// Cancellation and queues
// ============================================================================

#[tokio::test]
async fn cancel_reports_the_cancelled_state() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("scancel", "", ok(""));
    cluster.on("squeue", "", ok(SQUEUE_EMPTY));
    cluster.on("sacct", "", ok(SACCT_JOBS));
    let slurm = connect(&cluster).await;

    let status = slurm.cancel_job(&handle(&slurm, "4715")).await.unwrap();
    assert!(status.done);
    assert!(status.error.is_some_and(|e| e.is_canceled()));
    assert_eq!(cluster.calls("scancel"), ["scancel 4715"]);
}

#[tokio::test]
async fn chatty_scancel_is_an_unexpected_response() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("scancel", "", ok("scancel: Terminating job 4711\n"));
    let slurm = connect(&cluster).await;

    let err = slurm.cancel_job(&handle(&slurm, "4711")).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Adaptor { .. }));
    assert!(err.to_string().contains("unexpected response"), "{err}");
}

#[tokio::test]
async fn queue_status_comes_from_sinfo() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("sinfo", "--partition=", ok(SINFO_QUEUE));
    let slurm = connect(&cluster).await;

    let status = slurm.get_queue_status("debug").await.unwrap();
    assert_eq!(status.queue_name, "debug");
    assert_eq!(status.info["AVAIL"], "up");
    assert_eq!(status.info["NODES(A/I/O/T)"], "1/3/0/4");

    let err = slurm.get_queue_status("nope").await.unwrap_err();
    assert!(matches!(err, SchedulerError::NoSuchQueue { .. }));
}

// ============================================================================
// Interactive jobs
// ============================================================================

const TAGGED_SQUEUE: &str = "JOBID|PARTITION|NAME|USER|STATE|TIME|TIME_LIMIT|NODES|NODELIST(REASON)|COMMENT\n\
                             4711|debug|corvus|alice|RUNNING|1:02|15:00|1|node01|(null)\n\
                             4790|gpu|my run|bob|PENDING|0:00|1:00:00|2|(ReqNodeNotAvail, UnavailableNodes:gpu[01-02])|(null)\n\
                             4800|debug|bash|alice|RUNNING|0:01|15:00|1|node02|{tag}\n";

#[tokio::test]
async fn interactive_job_is_found_by_its_tag() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("salloc", "", Reply::Session);
    cluster.on("squeue", "", ok(TAGGED_SQUEUE));
    cluster.on("scancel", "", ok(""));
    let slurm = connect(&cluster).await;

    let desc = JobDescription::new("bash").with_queue("debug");
    let job = slurm.submit_interactive_job(desc).await.unwrap();
    assert_eq!(job.id, "4800");
    assert!(job.interactive);

    let salloc = cluster.calls("salloc");
    assert_eq!(salloc.len(), 1);
    assert!(salloc[0].starts_with("salloc --quiet --comment="));
    assert!(salloc[0].contains("--partition=debug --nodes=1 --ntasks-per-node=1"));
    assert!(salloc[0].ends_with(" bash"));

    let mut streams = slurm.get_streams(&job).await.unwrap();
    assert_eq!(streams.job.id, "4800");
    streams.stdin.write_all(b"ping\n").await.unwrap();
    let mut echoed = [0u8; 5];
    streams.stdout.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"ping\n");

    assert!(slurm.get_streams(&job).await.is_err());

    let status = slurm.get_job_status(&job).await.unwrap();
    assert!(status.running);

    slurm.cancel_job(&job).await.unwrap();
    assert_eq!(cluster.calls("scancel"), ["scancel 4800"]);
}

#[tokio::test]
async fn failed_salloc_is_diagnosed() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("salloc", "", fail("salloc: error: Invalid account\n", 1));
    cluster.on("squeue", "", ok(SQUEUE_EMPTY));
    cluster.on("sacct", "", ok(SACCT_EMPTY));
    let slurm = connect(&cluster).await;

    let err = slurm
        .submit_interactive_job(JobDescription::new("bash"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("exit code 1"), "{err}");
}

#[tokio::test]
async fn flaky_squeue_does_not_end_correlation() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("salloc", "", Reply::Session);
    cluster.on("squeue", "", fail("squeue: error: Socket timed out on send/recv\n", 1));
    cluster.on("squeue", "", ok(TAGGED_SQUEUE));
    let slurm = connect(&cluster).await;

    let job = slurm
        .submit_interactive_job(JobDescription::new("bash"))
        .await
        .unwrap();
    assert_eq!(job.id, "4800");
    assert!(cluster.calls("squeue").len() >= 2);
    assert!(!cluster.sessions_killed());
}

#[tokio::test]
async fn correlation_timeout_kills_the_helper() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("salloc", "", Reply::Session);
    cluster.on("squeue", "", ok(SQUEUE_EMPTY));
    cluster.on("sacct", "", ok(SACCT_EMPTY));
    let config = config().with_interactive_timeout(Duration::from_millis(100));
    let slurm = SlurmScheduler::connect(cluster.clone(), "/home/alice", config)
        .await
        .unwrap();

    let err = slurm
        .submit_interactive_job(JobDescription::new("bash"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Cannot find interactive job"), "{err}");
    assert_eq!(cluster.calls("salloc").len(), 1);
    assert!(cluster.sessions_killed());
}

#[tokio::test]
async fn correlation_timeout_reports_the_last_lookup_error() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("salloc", "", Reply::Session);
    cluster.on("squeue", "", fail("squeue: error: Socket timed out on send/recv\n", 1));
    let config = config().with_interactive_timeout(Duration::from_millis(100));
    let slurm = SlurmScheduler::connect(cluster.clone(), "/home/alice", config)
        .await
        .unwrap();

    let err = slurm
        .submit_interactive_job(JobDescription::new("bash"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Socket timed out"), "{err}");
    assert!(cluster.sessions_killed());
}

#[tokio::test]
async fn interactive_jobs_take_no_environment() {
    let cluster = FakeCluster::with_config(CONFIG);
    let slurm = connect(&cluster).await;

    let desc = JobDescription::new("bash").with_env("A", "1");
    let err = slurm.submit_interactive_job(desc).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidJobDescription { .. }));

    let desc = JobDescription::new("bash").with_option(JOB_SCRIPT_OPTION, "job.sh");
    let err = slurm.submit_interactive_job(desc).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidJobDescription { .. }));

    assert!(cluster.calls("salloc").is_empty());
}

#[tokio::test]
async fn batch_jobs_have_no_streams() {
    let cluster = FakeCluster::with_config(CONFIG);
    let slurm = connect(&cluster).await;

    let err = slurm.get_streams(&handle(&slurm, "4711")).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidJobDescription { .. }));
}

#[tokio::test]
async fn closed_scheduler_runs_no_commands() {
    let cluster = FakeCluster::with_config(CONFIG);
    cluster.on("sbatch", "", ok("Submitted batch job 1\n"));
    let slurm = connect(&cluster).await;

    slurm.close().await.unwrap();
    assert!(!slurm.is_open());
    assert!(slurm.submit_batch_job(JobDescription::new("a.out")).await.is_err());
    assert!(cluster.calls("sbatch").is_empty());
}
