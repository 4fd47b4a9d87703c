use std::sync::Arc;

use thiserror::Error;

/// Every failure a scheduler, queue or channel can report.
///
/// Each variant carries the name of the adaptor that raised it. The type is [`Clone`]
/// so that it can be stored inside a [`JobStatus`](crate::job::JobStatus) and handed
/// out on every poll.
#[derive(Error, Debug, Clone)]
pub enum SchedulerError {
    /// A combination of job description fields is illegal for this adaptor
    /// (e.g. redirected stdin for an interactive job, unknown job option).
    #[error("{adaptor} adaptor: invalid job description: {message}")]
    InvalidJobDescription { adaptor: String, message: String },

    /// A required job description field is missing (e.g. no executable).
    #[error("{adaptor} adaptor: incomplete job description: {message}")]
    IncompleteJobDescription { adaptor: String, message: String },

    /// The job is unknown to every source the adaptor consulted.
    #[error("{adaptor} adaptor: no such job: {job_id}")]
    NoSuchJob { adaptor: String, job_id: String },

    /// The queue name is not part of the adaptor's vocabulary.
    #[error("{adaptor} adaptor: no such queue: {queue}")]
    NoSuchQueue { adaptor: String, queue: String },

    /// The job ended because it was cancelled, killed or ran out of time.
    #[error("{adaptor} adaptor: job canceled: {message}")]
    JobCanceled { adaptor: String, message: String },

    /// The remote scheduler runs a version this adaptor does not support.
    #[error("{adaptor} adaptor: incompatible version: {message}")]
    IncompatibleVersion { adaptor: String, message: String },

    /// Generic remote or protocol failure (unexpected output, non-zero exit, ...).
    #[error("{adaptor} adaptor: {message}")]
    Adaptor { adaptor: String, message: String },

    /// The remote host could not be reached.
    #[error("{adaptor} adaptor: connection failed: {message}")]
    Connection { adaptor: String, message: String },

    /// The remote host rejected the supplied credential.
    #[error("{adaptor} adaptor: authentication failed: {message}")]
    Authentication { adaptor: String, message: String },

    /// A channel could not be opened on an established session.
    #[error("{adaptor} adaptor: channel failure: {message}")]
    Channel { adaptor: String, message: String },

    /// The adaptor does not implement this operation.
    #[error("{adaptor} adaptor: operation not supported: {message}")]
    UnsupportedOperation { adaptor: String, message: String },

    /// The scheduler (or pool) has been closed.
    #[error("{adaptor} adaptor: scheduler is closed")]
    Closed { adaptor: String },

    /// Low-level I/O error while talking to a process or channel.
    #[error("{adaptor} adaptor: I/O error: {source}")]
    Io {
        adaptor: String,
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl SchedulerError {
    pub fn invalid(adaptor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidJobDescription {
            adaptor: adaptor.into(),
            message: message.into(),
        }
    }

    pub fn incomplete(adaptor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IncompleteJobDescription {
            adaptor: adaptor.into(),
            message: message.into(),
        }
    }

    pub fn no_such_job(adaptor: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self::NoSuchJob {
            adaptor: adaptor.into(),
            job_id: job_id.into(),
        }
    }

    pub fn no_such_queue(adaptor: impl Into<String>, queue: impl Into<String>) -> Self {
        Self::NoSuchQueue {
            adaptor: adaptor.into(),
            queue: queue.into(),
        }
    }

    pub fn canceled(adaptor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::JobCanceled {
            adaptor: adaptor.into(),
            message: message.into(),
        }
    }

    pub fn adaptor(adaptor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Adaptor {
            adaptor: adaptor.into(),
            message: message.into(),
        }
    }

    pub fn channel(adaptor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Channel {
            adaptor: adaptor.into(),
            message: message.into(),
        }
    }

    pub fn io(adaptor: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            adaptor: adaptor.into(),
            source: Arc::new(source),
        }
    }

    /// Name of the adaptor that raised this error.
    pub fn adaptor_name(&self) -> &str {
        match self {
            Self::InvalidJobDescription { adaptor, .. }
            | Self::IncompleteJobDescription { adaptor, .. }
            | Self::NoSuchJob { adaptor, .. }
            | Self::NoSuchQueue { adaptor, .. }
            | Self::JobCanceled { adaptor, .. }
            | Self::IncompatibleVersion { adaptor, .. }
            | Self::Adaptor { adaptor, .. }
            | Self::Connection { adaptor, .. }
            | Self::Authentication { adaptor, .. }
            | Self::Channel { adaptor, .. }
            | Self::UnsupportedOperation { adaptor, .. }
            | Self::Closed { adaptor }
            | Self::Io { adaptor, .. } => adaptor,
        }
    }

    pub fn is_no_such_job(&self) -> bool {
        matches!(self, Self::NoSuchJob { .. })
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::JobCanceled { .. })
    }
}

/// Outcome of asking one information source about one job.
///
/// Keeps "the source does not know this job" apart from "asking the source failed",
/// which a plain `Result<Option<T>>` makes easy to conflate.
#[derive(Debug, Clone)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    Failed(SchedulerError),
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(value) => Lookup::Found(f(value)),
            Lookup::NotFound => Lookup::NotFound,
            Lookup::Failed(err) => Lookup::Failed(err),
        }
    }

    /// Converts into a `Result`, turning [`Lookup::NotFound`] into the error built by
    /// `not_found`.
    pub fn into_result(
        self,
        not_found: impl FnOnce() -> SchedulerError,
    ) -> Result<T, SchedulerError> {
        match self {
            Lookup::Found(value) => Ok(value),
            Lookup::NotFound => Err(not_found()),
            Lookup::Failed(err) => Err(err),
        }
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Lookup::Found(v),
            None => Lookup::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_name_their_adaptor() {
        let err = SchedulerError::no_such_job("slurm", "42");
        assert_eq!(err.adaptor_name(), "slurm");
        assert!(err.is_no_such_job());
        assert_eq!(err.to_string(), "slurm adaptor: no such job: 42");

        let io = SchedulerError::io("local", std::io::Error::other("boom"));
        assert_eq!(io.adaptor_name(), "local");
        assert!(io.clone().to_string().contains("boom"));
    }

    #[test]
    fn lookup_keeps_not_found_apart_from_failure() {
        let found: Lookup<u32> = Some(3).into();
        assert_eq!(found.map(|v| v * 2).found(), Some(6));

        let missing: Lookup<u32> = None.into();
        let err = missing
            .into_result(|| SchedulerError::no_such_job("test", "7"))
            .unwrap_err();
        assert!(err.is_no_such_job());

        let failed: Lookup<u32> = Lookup::Failed(SchedulerError::adaptor("test", "down"));
        let err = failed
            .into_result(|| SchedulerError::no_such_job("test", "7"))
            .unwrap_err();
        assert!(!err.is_no_such_job());
    }
}
