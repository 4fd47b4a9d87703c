//! End-to-end tests of the local scheduler with real child processes.

use std::time::{Duration, Instant};

use corvus_core::files::read_job_output;
use corvus_core::prelude::*;
use corvus_local::prelude::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn scheduler(dir: &std::path::Path) -> LocalScheduler {
    let config = LocalConfig::default()
        .with_working_directory(dir)
        .with_multi_queue_size(2);
    LocalScheduler::new(config).expect("Failed to create scheduler")
}

// ============================================================================
// Batch jobs
// ============================================================================

#[tokio::test]
async fn sleep_job_completes_on_single_queue() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler(dir.path());

    let desc = JobDescription::new("sleep")
        .with_arguments(["1"])
        .with_queue(queues::SINGLE);
    let job = scheduler.submit_batch_job(desc).await.unwrap();
    assert!(job.batch);

    let status = scheduler
        .wait_until_done(&job, Duration::from_millis(5000))
        .await
        .unwrap();
    assert!(status.done, "job not done: {status:?}");
    assert!(!status.has_error(), "unexpected error: {:?}", status.error);
    assert_eq!(status.exit_code, Some(0));
}

#[tokio::test]
async fn invalid_queue_is_rejected_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler(dir.path());

    let desc = JobDescription::new("touch")
        .with_arguments(["started"])
        .with_queue("batch");
    let err = scheduler.submit_batch_job(desc).await.unwrap_err();
    assert!(
        matches!(err, SchedulerError::InvalidJobDescription { .. }),
        "unexpected error: {err}"
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!dir.path().join("started").exists());
    assert!(scheduler.get_jobs(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn batch_output_lands_in_redirect_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let scheduler = scheduler(dir.path());

    let mut desc = JobDescription::new("sh")
        .with_arguments(["-c", "echo out; echo err >&2; echo $GREETING"])
        .with_env("GREETING", "hello");
    desc.stdout = Some("out.txt".into());
    desc.stderr = Some("err.txt".into());

    let job = scheduler.submit_batch_job(desc).await?;
    let status = scheduler.wait_until_done(&job, Duration::ZERO).await?;
    assert!(status.is_success());

    let output = read_job_output(&scheduler.file_access(), &job).await?;
    assert_eq!(output.stdout.unwrap(), "out\nhello\n");
    assert_eq!(output.stderr.unwrap(), "err\n");
    Ok(())
}

#[tokio::test]
async fn single_queue_jobs_do_not_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler(dir.path());

    let start = Instant::now();
    let mut jobs = Vec::new();
    for _ in 0..3 {
        let desc = JobDescription::new("sleep").with_arguments(["0.3"]);
        jobs.push(scheduler.submit_batch_job(desc).await.unwrap());
    }
    for job in &jobs {
        scheduler.wait_until_done(job, Duration::ZERO).await.unwrap();
    }

    assert!(start.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn terminal_status_is_returned_twice_then_job_is_unlisted() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler(dir.path());

    let job = scheduler
        .submit_batch_job(JobDescription::new("true"))
        .await
        .unwrap();
    scheduler
        .queues()
        .executor(&job)
        .unwrap()
        .wait_until_done(Duration::ZERO)
        .await;
    assert_eq!(scheduler.get_jobs(&[queues::SINGLE]).await.unwrap().len(), 1);

    let first = scheduler.get_job_status(&job).await.unwrap();
    let second = scheduler.get_job_status(&job).await.unwrap();
    assert!(first.done && second.done);
    assert!(scheduler.get_jobs(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn cancel_kills_running_job() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler(dir.path());

    let desc = JobDescription::new("sleep")
        .with_arguments(["60"])
        .with_queue(queues::UNLIMITED);
    let job = scheduler.submit_batch_job(desc).await.unwrap();
    let status = scheduler
        .wait_until_running(&job, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(status.running);

    let status = scheduler.cancel_job(&job).await.unwrap();
    assert!(status.done);
    assert_eq!(status.state, states::KILLED);
    assert!(status.error.is_some_and(|e| e.is_canceled()));
}

#[tokio::test]
async fn unknown_job_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler(dir.path());

    let job = JobHandle::new(
        "local-999",
        scheduler.scheduler_ref(),
        JobDescription::new("true"),
        false,
    );
    let err = scheduler.get_job_status(&job).await.unwrap_err();
    assert!(err.is_no_such_job());

    let statuses = scheduler.get_job_statuses(&[job]).await;
    assert!(statuses[0].error.as_ref().is_some_and(|e| e.is_no_such_job()));
}

// ============================================================================
// Interactive jobs
// ============================================================================

#[tokio::test]
async fn interactive_job_streams_are_live() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler(dir.path());

    let job = scheduler
        .submit_interactive_job(JobDescription::new("cat"))
        .await
        .unwrap();
    assert!(job.interactive);

    let mut streams = scheduler.get_streams(&job).await.unwrap();
    streams.stdin.write_all(b"round trip").await.unwrap();
    streams.stdin.shutdown().await.unwrap();
    drop(streams.stdin);

    let mut out = String::new();
    streams.stdout.read_to_string(&mut out).await.unwrap();
    assert_eq!(out, "round trip");

    let status = scheduler.wait_until_done(&job, Duration::ZERO).await.unwrap();
    assert!(status.is_success());

    // streams are handed out once
    assert!(scheduler.get_streams(&job).await.is_err());
}

#[tokio::test]
async fn interactive_job_rejects_redirects() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler(dir.path());

    let mut desc = JobDescription::new("cat");
    desc.stdout = Some("elsewhere.txt".into());
    let err = scheduler.submit_interactive_job(desc).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidJobDescription { .. }));
}

#[tokio::test]
async fn queue_statuses_cover_all_queues() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler(dir.path());

    let statuses = scheduler.get_queue_statuses(&[]).await;
    let names: Vec<_> = statuses.iter().map(|s| s.queue_name.as_str()).collect();
    assert_eq!(names, ["single", "multi", "unlimited"]);
    assert!(statuses.iter().all(|s| s.error.is_none()));

    let statuses = scheduler.get_queue_statuses(&["nope"]).await;
    assert!(matches!(
        statuses[0].error,
        Some(SchedulerError::NoSuchQueue { .. })
    ));
}

#[tokio::test]
async fn closed_scheduler_refuses_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler(dir.path());

    scheduler.close().await.unwrap();
    assert!(!scheduler.is_open());
    let err = scheduler
        .submit_batch_job(JobDescription::new("true"))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Closed { .. }));
}
