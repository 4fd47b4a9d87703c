//! # Slurm over SSH Example
//!
//! Connects to a Slurm login node over SSH, lists the partitions and submits a job.
//!
//! ## Usage
//!
//! ```sh
//! CORVUS_LOCATION=alice@login.cluster.org cargo run --example slurm_over_ssh --features "ssh slurm"
//! ```

use corvus::prelude::*;
use std::env;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let location = env::var("CORVUS_LOCATION").unwrap_or_else(|_| "localhost".to_string());
    let ssh = SshConfig::from_location(&location)?;
    let factory = SshProcessFactory::new(connect_pool(&ssh)?, ssh.location());

    let home = env::var("CORVUS_REMOTE_HOME").unwrap_or_else(|_| ".".to_string());
    let slurm = SlurmScheduler::connect(factory, home, SlurmConfig::default()).await?;
    println!(
        "Slurm {} on {}, partitions {:?} (default {:?})",
        slurm.version(),
        slurm.location(),
        slurm.queue_names(),
        slurm.default_queue_name()
    );

    let mut desc = JobDescription::new("hostname");
    desc.stdout = Some("corvus-hostname.out".into());
    let job = slurm.submit_batch_job(desc).await?;
    println!("Submitted {job}");

    let status = slurm.wait_until_done(&job, Duration::from_secs(300)).await?;
    match status.error {
        Some(e) => println!("{job} failed: {e}"),
        None => println!("{job} ended in state {} with exit code {:?}", status.state, status.exit_code),
    }

    slurm.close().await?;
    Ok(())
}
