use std::time::Duration;

use corvus_core::prelude::*;
use corvus_local::command::CommandOutput;
use corvus_local::queue::JobQueues;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Runs a scheduler CLI tool as an interactive helper job on the `unlimited` queue of
/// a [`JobQueues`], so the command goes through whatever [`ProcessFactory`] the
/// queues were built on (a local child process, or an exec channel on a remote
/// host).
///
/// Both output streams are drained concurrently with writing stdin, so a chatty
/// command can never block on a full pipe.
pub struct RemoteCommandRunner<'a, F: ProcessFactory> {
    queues: &'a JobQueues<F>,
}

impl<'a, F: ProcessFactory> RemoteCommandRunner<'a, F> {
    pub fn new(queues: &'a JobQueues<F>) -> Self {
        Self { queues }
    }

    pub async fn run<I, S>(
        &self,
        command: &str,
        args: I,
        stdin: Option<&str>,
    ) -> Result<CommandOutput, SchedulerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let adaptor = self.queues.adaptor_name().to_string();
        let description = JobDescription::new(command)
            .with_arguments(args)
            .with_queue(queues::UNLIMITED);

        let job = self.queues.submit_interactive_job(description).await?;
        let Streams {
            stdin: mut input,
            mut stdout,
            mut stderr,
            ..
        } = self.queues.get_streams(&job)?;

        let job_id = job.id.clone();
        let write_input = async move {
            if let Some(data) = stdin {
                if let Err(e) = input.write_all(data.as_bytes()).await {
                    // the command exited without reading all of its input
                    debug!(job_id = %job_id, error = %e, "Failed to write command input");
                }
            }
            if let Err(e) = input.shutdown().await {
                debug!(job_id = %job_id, error = %e, "Failed to close command input");
            }
            Ok::<_, SchedulerError>(())
        };
        let read_stdout = async {
            let mut buf = Vec::new();
            stdout
                .read_to_end(&mut buf)
                .await
                .map_err(|e| SchedulerError::io(&adaptor, e))?;
            Ok::<_, SchedulerError>(buf)
        };
        let read_stderr = async {
            let mut buf = Vec::new();
            stderr
                .read_to_end(&mut buf)
                .await
                .map_err(|e| SchedulerError::io(&adaptor, e))?;
            Ok::<_, SchedulerError>(buf)
        };

        let ((), out, err) = tokio::try_join!(write_input, read_stdout, read_stderr)?;

        let status = self.queues.wait_until_done(&job, Duration::ZERO).await?;
        if let Some(error) = status.error {
            return Err(error);
        }
        let exit_code = status.exit_code.ok_or_else(|| {
            SchedulerError::adaptor(&adaptor, format!("{command} ended without an exit code"))
        })?;

        debug!(command, exit_code, "Command finished");

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&out).into_owned(),
            stderr: String::from_utf8_lossy(&err).into_owned(),
            exit_code,
        })
    }
}
