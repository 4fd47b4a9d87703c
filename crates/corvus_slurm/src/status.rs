//! Turning Slurm's text output into job and queue statuses.
//!
//! Pure functions over parsed records, tested against recorded command output in
//! `tests/fixtures`.

use std::collections::HashMap;

use corvus_core::prelude::*;
use corvus_script::parser::Record;

use crate::ADAPTOR;

/// Version prefixes the adaptor has been run against.
pub const SUPPORTED_VERSIONS: [&str; 8] = ["17.", "19.", "20.", "21.", "22.", "23.", "24.", "25."];

const RUNNING_STATES: [&str; 8] = [
    "CONFIGURING",
    "RUNNING",
    "COMPLETING",
    "STOPPED",
    "SUSPENDED",
    "SIGNALING",
    "STAGE_OUT",
    "RESIZING",
];

const PENDING_STATES: [&str; 6] = [
    "PENDING",
    "REQUEUED",
    "REQUEUE_HOLD",
    "REQUEUE_FED",
    "RESV_DEL_HOLD",
    "SPECIAL_EXIT",
];

const FAILED_STATES: [&str; 8] = [
    "FAILED",
    "NODE_FAIL",
    "TIMEOUT",
    "PREEMPTED",
    "BOOT_FAIL",
    "DEADLINE",
    "OUT_OF_MEMORY",
    "REVOKED",
];

pub fn is_running_state(state: &str) -> bool {
    RUNNING_STATES.iter().any(|s| state.starts_with(s))
}

pub fn is_pending_state(state: &str) -> bool {
    PENDING_STATES.iter().any(|s| state.starts_with(s))
}

/// `CANCELLED` comes with a suffix (`CANCELLED by 1000`), the others are exact.
pub fn is_failed_state(state: &str) -> bool {
    state.starts_with("CANCELLED") || FAILED_STATES.contains(&state)
}

/// Parses the `code:signal` exit code Slurm prints, keeping only the code.
pub fn parse_exit_code(value: Option<&str>) -> Result<Option<i32>, SchedulerError> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    let code = value.split(':').next().unwrap_or(value);
    code.parse::<i32>()
        .map(Some)
        .map_err(|_| SchedulerError::adaptor(ADAPTOR, format!("Malformed exit code: {value}")))
}

/// The error a terminal state stands for, if any.
///
/// A plain `FAILED` with a non-zero exit code is how Slurm reports a job that ran to
/// completion and returned non-zero; that is the job's business, not a failure.
pub fn state_error(state: &str, exit_code: Option<i32>) -> Option<SchedulerError> {
    if state.starts_with("CANCELLED") {
        return Some(SchedulerError::canceled(ADAPTOR, format!("Job {}", state.to_lowercase())));
    }

    if !is_failed_state(state) {
        return None;
    }

    if state == "FAILED" && exit_code.is_some_and(|code| code != 0) {
        return None;
    }

    Some(SchedulerError::adaptor(ADAPTOR, format!("Job failed with state {state}")))
}

/// Like [`state_error`], gated by the `Reason` field of `scontrol show job`.
fn reason_error(state: &str, exit_code: Option<i32>, reason: Option<&str>) -> Option<SchedulerError> {
    if state.starts_with("CANCELLED") || !is_failed_state(state) {
        return state_error(state, exit_code);
    }

    match reason {
        Some("NonZeroExitCode") => None,
        None | Some("None") => Some(SchedulerError::adaptor(
            ADAPTOR,
            format!("Job failed with state {state} for unknown reason"),
        )),
        Some(reason) => Some(SchedulerError::adaptor(
            ADAPTOR,
            format!("Job failed with state {state}: {reason}"),
        )),
    }
}

fn job_status(
    job: &JobHandle,
    state: &str,
    exit_code: Option<i32>,
    error: Option<SchedulerError>,
    info: &Record,
) -> JobStatus {
    let running = is_running_state(state);
    let done = !running && !is_pending_state(state);

    JobStatus {
        job: job.clone(),
        state: state.to_string(),
        exit_code: if done { exit_code } else { None },
        error,
        running,
        done,
        info: info.clone(),
    }
}

fn field<'a>(record: &'a Record, key: &str, command: &str) -> Result<&'a str, SchedulerError> {
    record.get(key).map(String::as_str).ok_or_else(|| {
        SchedulerError::adaptor(ADAPTOR, format!("{command} output has no {key} field"))
    })
}

/// Status from a row of `squeue`. Only active jobs appear there, so the exit code
/// is never known.
pub fn status_from_squeue(job: &JobHandle, row: &Record) -> Result<JobStatus, SchedulerError> {
    let state = field(row, "STATE", "squeue")?;
    let error = state_error(state, None);
    Ok(job_status(job, state, None, error, row))
}

/// Status from a row of `sacct -X -p`.
pub fn status_from_sacct(job: &JobHandle, row: &Record) -> Result<JobStatus, SchedulerError> {
    let state = field(row, "State", "sacct")?;
    let exit_code = parse_exit_code(row.get("ExitCode").map(String::as_str))?;
    let error = state_error(state, exit_code);
    Ok(job_status(job, state, exit_code, error, row))
}

/// Status from a record of `scontrol show job`.
pub fn status_from_scontrol(job: &JobHandle, record: &Record) -> Result<JobStatus, SchedulerError> {
    let state = field(record, "JobState", "scontrol")?;
    let exit_code = parse_exit_code(record.get("ExitCode").map(String::as_str))?;
    let error = reason_error(state, exit_code, record.get("Reason").map(String::as_str));
    Ok(job_status(job, state, exit_code, error, record))
}

pub fn check_version(version: &str, ignore_version: bool) -> Result<(), SchedulerError> {
    if ignore_version || SUPPORTED_VERSIONS.iter().any(|v| version.starts_with(v)) {
        return Ok(());
    }

    Err(SchedulerError::IncompatibleVersion {
        adaptor: ADAPTOR.to_string(),
        message: format!(
            "Slurm version {version} not supported, expected one of {}",
            SUPPORTED_VERSIONS.join(", ")
        ),
    })
}

/// Accounting is off when the cluster stores it nowhere (`accounting_storage/none`)
/// or does not say where it stores it.
pub fn accounting_available(config: &Record) -> bool {
    match config.get("AccountingStorageType") {
        Some(storage) => storage.rsplit('/').next() != Some("none"),
        None => false,
    }
}

/// Partition names from `sinfo --noheader --format=%120P`, and the one marked
/// default with a `*`.
pub fn parse_partitions(output: &str) -> (Vec<String>, Option<String>) {
    let mut names = Vec::new();
    let mut default = None;

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let name = match line.strip_suffix('*') {
            Some(name) => {
                default = Some(name.to_string());
                name
            }
            None => line,
        };

        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }

    (names, default)
}

/// Job id from the `Submitted batch job <id>` line `sbatch` prints.
pub fn parse_submitted_job_id(output: &str) -> Result<String, SchedulerError> {
    for line in output.lines() {
        if let Some(rest) = line.trim().strip_prefix("Submitted batch job ") {
            let id = rest.split_whitespace().next().unwrap_or_default();
            if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
                return Ok(id.to_string());
            }
        }
    }

    Err(SchedulerError::adaptor(
        ADAPTOR,
        format!("Cannot get job id from sbatch output: {}", output.trim()),
    ))
}

/// Queue status from the single row of `sinfo --partition=<name>`.
pub fn queue_info(rows: HashMap<String, Record>) -> HashMap<String, String> {
    rows.into_values().next().unwrap_or_default()
}
