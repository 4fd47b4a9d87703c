//! Helpers for staging and inspecting the redirect files of batch jobs through a
//! [`FileAccess`] implementation.

use bytes::Bytes;

use crate::error::SchedulerError;
use crate::job::{JobDescription, JobHandle};
use crate::traits::FileAccess;

/// Joins `path` onto `base` unless it is already absolute.
pub fn resolve_path(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        return path.to_string();
    }
    if base.ends_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Directory a job runs in: its own working directory resolved against `base`.
pub fn job_directory(base: &str, description: &JobDescription) -> String {
    match &description.working_directory {
        Some(dir) => resolve_path(base, dir),
        None => base.to_string(),
    }
}

/// Captured output of a finished batch job.
#[derive(Debug, Clone, Default)]
pub struct JobOutput {
    pub stdout: Option<Bytes>,
    pub stderr: Option<Bytes>,
}

/// Reads the stdout and stderr files a batch job redirected to.
///
/// Streams without a redirect file are returned as [`None`].
pub async fn read_job_output<F: FileAccess>(
    files: &F,
    job: &JobHandle,
) -> Result<JobOutput, SchedulerError> {
    let base = files.working_directory().await?;
    let dir = job_directory(&base, &job.description);

    let stdout = match &job.description.stdout {
        Some(path) => Some(files.read_file(&resolve_path(&dir, path)).await?),
        None => None,
    };
    let stderr = match &job.description.stderr {
        Some(path) => Some(files.read_file(&resolve_path(&dir, path)).await?),
        None => None,
    };

    Ok(JobOutput { stdout, stderr })
}

/// Writes `data` to the stdin file named by the description, before submission.
pub async fn stage_job_input<F: FileAccess>(
    files: &F,
    description: &JobDescription,
    data: Bytes,
) -> Result<String, SchedulerError> {
    let Some(stdin) = &description.stdin else {
        return Err(SchedulerError::incomplete(
            "files",
            "Job description has no stdin file to stage",
        ));
    };

    let base = files.working_directory().await?;
    let path = resolve_path(&job_directory(&base, description), stdin);
    files.write_file(&path, data).await?;
    Ok(path)
}
