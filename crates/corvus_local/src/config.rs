use std::path::PathBuf;

use serde::Deserialize;

/// Sizing of the three local job queues.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of workers in the `multi` queue.
    pub multi_queue_size: usize,
    /// How many finished jobs stay queryable after their terminal status has been
    /// observed and they were dropped from the job lists.
    pub finished_job_memory: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            multi_queue_size: 4,
            finished_job_memory: 1024,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Directory relative job paths are resolved against. Defaults to the current
    /// directory of the process.
    pub working_directory: Option<PathBuf>,
    #[serde(flatten)]
    pub queues: QueueConfig,
}

impl LocalConfig {
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_multi_queue_size(mut self, size: usize) -> Self {
        self.queues.multi_queue_size = size;
        self
    }
}
