//! Job scripts for `sbatch` and argument lists for `salloc`.

use std::fmt::Write;

use corvus_core::files::{job_directory, resolve_path};
use corvus_core::prelude::*;
use corvus_core::shell;

/// Job option naming an existing script to submit as is.
pub const JOB_SCRIPT_OPTION: &str = "job-script";

pub const VALID_JOB_OPTIONS: [&str; 1] = [JOB_SCRIPT_OPTION];

const JOB_NAME: &str = "corvus";

fn runtime(description: &JobDescription, default_runtime: u32) -> Option<u32> {
    match (description.max_runtime, default_runtime) {
        (0, 0) => None,
        (0, default) => Some(default),
        (minutes, _) => Some(minutes),
    }
}

/// Renders the batch script piped to `sbatch`.
///
/// Redirect paths are made absolute against the job's directory, so they do not
/// depend on where `sbatch` happens to run.
pub fn render_job_script(
    description: &JobDescription,
    base_directory: &str,
    default_runtime: u32,
) -> String {
    let dir = job_directory(base_directory, description);
    let redirect = |path: &Option<String>| match path {
        Some(path) => shell::quote(&resolve_path(&dir, path)),
        None => "/dev/null".to_string(),
    };

    let mut script = String::from("#!/bin/sh\n");
    let mut header = |line: String| {
        let _ = writeln!(script, "#SBATCH {line}");
    };

    header(format!("--job-name={JOB_NAME}"));
    if let Some(queue) = &description.queue_name {
        header(format!("--partition={}", shell::quote(queue)));
    }
    header(format!("--nodes={}", description.node_count));
    header(format!("--ntasks-per-node={}", description.processes_per_node));
    if let Some(minutes) = runtime(description, default_runtime) {
        header(format!("--time={minutes}"));
    }
    if description.stdin.is_some() {
        header(format!("--input={}", redirect(&description.stdin)));
    }
    header(format!("--output={}", redirect(&description.stdout)));
    header(format!("--error={}", redirect(&description.stderr)));

    script.push('\n');

    let mut env: Vec<_> = description.environment.iter().collect();
    env.sort();
    for (key, value) in env {
        let _ = writeln!(script, "export {key}={}", shell::quote(value));
    }

    let _ = writeln!(script, "cd {}", shell::quote(&dir));

    let mut command = Vec::with_capacity(description.arguments.len() + 2);
    if !description.start_single_process {
        command.push("srun".to_string());
    }
    command.extend(description.executable.iter().cloned());
    command.extend(description.arguments.iter().cloned());
    let _ = writeln!(script, "{}", shell::join(&command));

    script
}

/// Arguments of the `salloc` call that runs an interactive job, tagged with
/// `comment` so the job can be found again.
pub fn salloc_arguments(
    description: &JobDescription,
    comment: &str,
    base_directory: &str,
    default_runtime: u32,
) -> Vec<String> {
    let mut args = vec!["--quiet".to_string(), format!("--comment={comment}")];

    if description.working_directory.is_some() {
        args.push(format!("--chdir={}", job_directory(base_directory, description)));
    }
    if let Some(queue) = &description.queue_name {
        args.push(format!("--partition={queue}"));
    }
    args.push(format!("--nodes={}", description.node_count));
    args.push(format!("--ntasks-per-node={}", description.processes_per_node));
    if let Some(minutes) = runtime(description, default_runtime) {
        args.push(format!("--time={minutes}"));
    }

    args.extend(description.executable.iter().cloned());
    args.extend(description.arguments.iter().cloned());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_batch_script() {
        let mut desc = JobDescription::new("./simulate")
            .with_arguments(["--steps", "100"])
            .with_queue("batch")
            .with_working_directory("runs/1")
            .with_env("OMP_NUM_THREADS", "4");
        desc.node_count = 2;
        desc.processes_per_node = 8;
        desc.stdout = Some("out.txt".into());

        let script = render_job_script(&desc, "/home/alice", 15);
        assert_eq!(
            script,
            "#!/bin/sh\n\
             #SBATCH --job-name=corvus\n\
             #SBATCH --partition=batch\n\
             #SBATCH --nodes=2\n\
             #SBATCH --ntasks-per-node=8\n\
             #SBATCH --time=15\n\
             #SBATCH --output=/home/alice/runs/1/out.txt\n\
             #SBATCH --error=/dev/null\n\
             \n\
             export OMP_NUM_THREADS=4\n\
             cd /home/alice/runs/1\n\
             srun ./simulate --steps 100\n"
        );
    }

    #[test]
    fn single_process_jobs_skip_srun() {
        let mut desc = JobDescription::new("hostname");
        desc.start_single_process = true;
        desc.max_runtime = 5;
        desc.stdin = Some("in.txt".into());

        let script = render_job_script(&desc, "/home/alice", 0);
        assert!(script.contains("#SBATCH --time=5\n"));
        assert!(script.contains("#SBATCH --input=/home/alice/in.txt\n"));
        assert!(script.ends_with("cd /home/alice\nhostname\n"));

        desc.max_runtime = 0;
        let script = render_job_script(&desc, "/home/alice", 0);
        assert!(!script.contains("--time"));
    }

    #[test]
    fn quotes_shell_metacharacters() {
        let desc = JobDescription::new("echo")
            .with_arguments(["$HOME", "a b"])
            .with_env("GREETING", "hello world");
        let script = render_job_script(&desc, "/home/alice", 15);
        assert!(script.contains("export GREETING='hello world'\n"));
        assert!(script.contains("srun echo '$HOME' 'a b'\n"));
    }

    #[test]
    fn salloc_arguments_carry_the_tag() {
        let desc = JobDescription::new("bash")
            .with_arguments(["-l"])
            .with_queue("debug")
            .with_working_directory("/scratch/alice");

        let args = salloc_arguments(&desc, "c0ffee", "/home/alice", 15);
        assert_eq!(
            args,
            [
                "--quiet",
                "--comment=c0ffee",
                "--chdir=/scratch/alice",
                "--partition=debug",
                "--nodes=1",
                "--ntasks-per-node=1",
                "--time=15",
                "bash",
                "-l",
            ]
        );
    }
}
