//! # Corvus SSH
//! [![Crates.io](https://img.shields.io/crates/v/corvus_ssh.svg)](https://crates.io/crates/corvus_ssh)
//! [![Docs](https://docs.rs/corvus_ssh/badge.svg)](https://docs.rs/corvus_ssh/)
//!
//! The remote channel layer of corvus, built on [russh](https://docs.rs/russh).
//!
//! ## Features
//!
//! * **Channel pooling**: [`ChannelPool`](pool::ChannelPool) multiplexes exec and sftp
//!   channels over as few sessions as the per-session channel cap allows.
//! * **Gateways**: sessions can be tunnelled through a jump host.
//! * **Remote processes**: [`SshProcessFactory`](process::SshProcessFactory) plugs the
//!   pool into the corvus job queues, and is what the scripting back-ends run their
//!   CLI tools through.
//!
//! ## Usage
//!
//! ```no_run
//! use corvus_core::prelude::*;
//! use corvus_ssh::prelude::*;
//!
//! # async fn run() -> Result<(), SchedulerError> {
//! let config = SshConfig::from_location("alice@login.cluster.org")?;
//! let scheduler = SshScheduler::connect(config).await?;
//! let job = scheduler.submit_batch_job(JobDescription::new("hostname")).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod files;
pub mod pool;
pub mod process;
pub mod scheduler;
pub mod session;

pub const ADAPTOR: &str = "ssh";

pub mod prelude {
    pub use super::config::{Endpoint, SshConfig};
    pub use super::files::SftpFileAccess;
    pub use super::pool::{ChannelLease, ChannelPool, RemoteSession, SessionConnector};
    pub use super::process::{SshPool, SshProcess, SshProcessFactory};
    pub use super::scheduler::{SshScheduler, connect_pool};
    pub use super::session::{RusshConnector, RusshSession};
}
