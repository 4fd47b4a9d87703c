//! # Corvus Slurm
//! [![Crates.io](https://img.shields.io/crates/v/corvus_slurm.svg)](https://crates.io/crates/corvus_slurm)
//! [![Docs](https://docs.rs/corvus_slurm/badge.svg)](https://docs.rs/corvus_slurm/)
//!
//! The Slurm back-end of corvus.
//!
//! ## Features
//!
//! * **Batch jobs**: rendered job scripts piped to `sbatch`, or an existing script
//!   named by the `job-script` job option.
//! * **Status reconciliation**: `squeue`, then `sacct` (when the cluster keeps
//!   accounting), then `scontrol show job`. The first source that knows a job wins.
//! * **Interactive jobs**: `salloc` runs as a helper job whose streams the caller
//!   drives, matched to its Slurm job through a tag in the job comment.
//!
//! ## Usage
//!
//! ```no_run
//! use corvus_core::prelude::*;
//! use corvus_local::prelude::*;
//! use corvus_slurm::prelude::*;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), SchedulerError> {
//! // on a login node; use an SSH process factory to reach a remote cluster
//! let factory = LocalProcessFactory::new(corvus_slurm::ADAPTOR);
//! let slurm = SlurmScheduler::connect(factory, "/home/alice", SlurmConfig::default()).await?;
//!
//! let job = slurm
//!     .submit_batch_job(JobDescription::new("hostname").with_queue("debug"))
//!     .await?;
//! let status = slurm.wait_until_done(&job, Duration::from_secs(600)).await?;
//! println!("{} ended in state {}", job.id, status.state);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod scheduler;
pub mod script;
pub mod status;

pub const ADAPTOR: &str = "slurm";

pub mod prelude {
    pub use super::config::SlurmConfig;
    pub use super::scheduler::SlurmScheduler;
    pub use super::script::JOB_SCRIPT_OPTION;
}
