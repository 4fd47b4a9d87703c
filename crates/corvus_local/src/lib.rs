//! # Corvus Local
//! [![Crates.io](https://img.shields.io/crates/v/corvus_local.svg)](https://crates.io/crates/corvus_local)
//! [![Docs](https://docs.rs/corvus_local/badge.svg)](https://docs.rs/corvus_local/)
//!
//! The job queueing engine of corvus, and the back-end that runs jobs as local child
//! processes.
//!
//! ## Features
//!
//! * **Three queues**: `single` (one job at a time, FIFO), `multi` (a fixed pool of
//!   workers) and `unlimited` (every job starts immediately).
//! * **Interactive jobs**: the caller drives the job's stdin/stdout/stderr.
//! * **Pluggable processes**: [`JobQueues`](queue::JobQueues) starts processes through
//!   a [`ProcessFactory`](corvus_core::traits::ProcessFactory), which is how the SSH
//!   back-end reuses it for remote commands.
//!
//! ## Usage
//!
//! ```no_run
//! use corvus_core::prelude::*;
//! use corvus_local::prelude::*;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), SchedulerError> {
//! let scheduler = LocalScheduler::new(LocalConfig::default())?;
//! let job = scheduler
//!     .submit_batch_job(JobDescription::new("sleep").with_arguments(["1"]))
//!     .await?;
//! let status = scheduler.wait_until_done(&job, Duration::from_secs(5)).await?;
//! assert!(status.is_success());
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod executor;
pub mod files;
pub mod process;
pub mod queue;
pub mod scheduler;

pub mod prelude {
    pub use super::command::{CommandOutput, CommandRunner};
    pub use super::config::{LocalConfig, QueueConfig};
    pub use super::executor::JobExecutor;
    pub use super::files::LocalFileAccess;
    pub use super::process::LocalProcessFactory;
    pub use super::queue::JobQueues;
    pub use super::scheduler::LocalScheduler;
}
