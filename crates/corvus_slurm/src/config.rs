use std::time::Duration;

use corvus_local::config::QueueConfig;
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SlurmConfig {
    /// Connect to Slurm versions the adaptor was not tested against.
    pub ignore_version: bool,
    /// Never query `sacct`, even when the cluster runs an accounting database.
    pub disable_accounting: bool,
    /// Delay between two status polls, in milliseconds.
    pub poll_delay_ms: u64,
    /// How long to look for the Slurm job of an interactive submission, in
    /// milliseconds.
    pub interactive_timeout_ms: u64,
    /// Run time limit in minutes for jobs that do not set one. `0` leaves the limit
    /// to the partition.
    pub default_runtime: u32,
    /// Queues of the helper jobs that run the Slurm commands.
    #[serde(flatten)]
    pub queues: QueueConfig,
}

impl Default for SlurmConfig {
    fn default() -> Self {
        Self {
            ignore_version: false,
            disable_accounting: false,
            poll_delay_ms: 1000,
            interactive_timeout_ms: 60_000,
            default_runtime: 15,
            queues: QueueConfig::default(),
        }
    }
}

impl SlurmConfig {
    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }

    pub fn interactive_timeout(&self) -> Duration {
        Duration::from_millis(self.interactive_timeout_ms)
    }

    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay_ms = millis(delay);
        self
    }

    pub fn with_interactive_timeout(mut self, timeout: Duration) -> Self {
        self.interactive_timeout_ms = millis(timeout);
        self
    }
}

/// Whole milliseconds of `duration`, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
