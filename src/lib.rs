//! # Corvus
//![![License](https://img.shields.io/badge/license-MIT%2FApache-blue.svg)](https://github.com/corvus-hpc/corvus?tab=readme-ov-file#license)
//![![Crates.io](https://img.shields.io/crates/v/corvus.svg)](https://crates.io/crates/corvus)
//![![Docs](https://docs.rs/corvus/badge.svg)](https://docs.rs/corvus/)
//!
//! Submit, monitor and cancel compute jobs through one job model, whether they run as
//! local processes, as commands on a remote host or on a Slurm cluster.
//!
//! This crate serves as an entry point, re-exporting the core types and optionally
//! including the back-ends via feature flags.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | **`local`** | Job queues and the local process back-end (`corvus_local`). Enabled by default. |
//! | **`ssh`** | Pooled SSH channels and the remote process back-end (`corvus_ssh`). |
//! | **`script`** | Helpers for adaptors that drive a scheduler through its CLI tools (`corvus_script`). |
//! | **`slurm`** | The Slurm adaptor (`corvus_slurm`). |
//!
//! ## Example: Slurm over SSH
//!
//! ```toml
//! [dependencies]
//! corvus = { version = "0.3", features = ["ssh", "slurm"] }
//! ```
//!
//! ```rust,ignore
//! use corvus::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SchedulerError> {
//!     let ssh = SshConfig::from_location("alice@login.cluster.org")?;
//!     let factory = SshProcessFactory::new(connect_pool(&ssh)?, ssh.location());
//!
//!     let slurm = SlurmScheduler::connect(factory, "/home/alice", SlurmConfig::default()).await?;
//!     let job = slurm.submit_batch_job(JobDescription::new("hostname")).await?;
//!     println!("submitted {job}");
//!
//!     slurm.close().await
//! }
//! ```

pub use corvus_core::*;

#[cfg(feature = "local")]
pub mod local {
    pub use corvus_local::*;
}

#[cfg(feature = "ssh")]
pub mod ssh {
    pub use corvus_ssh::*;
}

#[cfg(feature = "script")]
pub mod script {
    pub use corvus_script::*;
}

#[cfg(feature = "slurm")]
pub mod slurm {
    pub use corvus_slurm::*;
}

pub mod prelude {
    pub use corvus_core::prelude::*;

    #[cfg(feature = "local")]
    pub use corvus_local::prelude::*;

    #[cfg(feature = "ssh")]
    pub use corvus_ssh::prelude::*;

    #[cfg(feature = "script")]
    pub use corvus_script::prelude::*;

    #[cfg(feature = "slurm")]
    pub use corvus_slurm::prelude::*;
}
