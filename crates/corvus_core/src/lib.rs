//! # Corvus Core
//! [![Crates.io](https://img.shields.io/crates/v/corvus_core.svg)](https://crates.io/crates/corvus_core)
//! [![Docs](https://docs.rs/corvus_core/badge.svg)](https://docs.rs/corvus_core/)
//!
//! Types and traits shared by every corvus back-end.
//!
//! - **[`JobDescription`](job::JobDescription)**, **[`JobHandle`](job::JobHandle)**,
//!   **[`JobStatus`](job::JobStatus)**: the job model clients submit and poll.
//! - **[`Scheduler`](traits::Scheduler)**: the capability every back-end implements.
//! - **[`ProcessFactory`](traits::ProcessFactory)**: how job queues start processes,
//!   locally or over a remote channel.
//! - **[`SchedulerError`](error::SchedulerError)**: the error taxonomy.

pub mod constants;
pub mod credential;
pub mod error;
pub mod files;
pub mod job;
pub mod shell;
pub mod traits;

pub mod prelude {
    pub use super::constants::*;
    pub use super::credential::*;
    pub use super::error::*;
    pub use super::job::*;
    pub use super::traits::*;
}
