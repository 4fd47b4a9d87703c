//! # Local Jobs Example
//!
//! Runs a batch job and an interactive job on the local process back-end.
//!
//! ## Usage
//!
//! ```sh
//! cargo run --example local_jobs
//! ```

use corvus::prelude::*;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let scheduler = LocalScheduler::new(LocalConfig::default().with_multi_queue_size(2))?;

    // Batch: output goes to a file in the working directory
    let mut desc = JobDescription::new("sh")
        .with_arguments(["-c", "echo hello from $(hostname)"])
        .with_queue(queues::MULTI);
    desc.stdout = Some("local_jobs.out".into());

    let job = scheduler.submit_batch_job(desc).await?;
    let status = scheduler.wait_until_done(&job, Duration::from_secs(10)).await?;
    println!("{job} finished in state {} (exit code {:?})", status.state, status.exit_code);

    // Interactive: we drive stdin and read stdout ourselves
    let job = scheduler
        .submit_interactive_job(JobDescription::new("tr").with_arguments(["a-z", "A-Z"]))
        .await?;
    let mut streams = scheduler.get_streams(&job).await?;
    streams.stdin.write_all(b"shout this\n").await?;
    drop(streams.stdin);

    let mut shouted = String::new();
    streams.stdout.read_to_string(&mut shouted).await?;
    print!("{shouted}");

    scheduler.wait_until_done(&job, Duration::ZERO).await?;
    scheduler.close().await?;
    Ok(())
}
