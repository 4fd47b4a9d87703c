//! Jobs as commands on pooled SSH exec channels.

use std::sync::Arc;

use corvus_core::prelude::*;
use corvus_core::shell;
use futures::future::BoxFuture;
use russh::client::Msg;
use russh::{Channel, ChannelMsg, Sig};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ADAPTOR;
use crate::pool::{ChannelLease, ChannelPool};
use crate::session::RusshConnector;

pub type SshPool = ChannelPool<RusshConnector>;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Shell command line that runs `spec` in its working directory. Batch jobs get
/// their redirects applied by the remote shell.
pub fn remote_command(spec: &ProcessSpec) -> Result<String, SchedulerError> {
    let desc = &spec.description;
    let executable = desc
        .executable
        .as_deref()
        .ok_or_else(|| SchedulerError::incomplete(ADAPTOR, "Executable missing"))?;

    let mut line = format!("cd {} && ", shell::quote(&spec.working_directory));

    if !desc.environment.is_empty() {
        let mut env: Vec<_> = desc.environment.iter().collect();
        env.sort();
        line.push_str("env ");
        for (key, value) in env {
            line.push_str(&shell::quote(&format!("{key}={value}")));
            line.push(' ');
        }
    }

    line.push_str(&shell::quote(executable));
    for arg in &desc.arguments {
        line.push(' ');
        line.push_str(&shell::quote(arg));
    }

    if !spec.interactive {
        let stdin = desc.stdin.as_deref().unwrap_or("/dev/null");
        line.push_str(&format!(" < {}", shell::quote(stdin)));
        if let Some(stdout) = &desc.stdout {
            line.push_str(&format!(" > {}", shell::quote(stdout)));
        }
        if let Some(stderr) = &desc.stderr {
            line.push_str(&format!(" 2> {}", shell::quote(stderr)));
        }
    }

    Ok(line)
}

/// Local ends of the pipes bridged onto a channel.
struct RemotePipes {
    stdin: Option<DuplexStream>,
    stdout: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
}

/// A command running on an exec channel.
///
/// A background task owns the channel: it forwards stdin, demultiplexes stdout and
/// stderr, and picks up the exit status. The channel goes back to the pool when the
/// command ends.
pub struct SshProcess {
    streams: Option<ProcessStreams>,
    exit: Option<oneshot::Receiver<Result<i32, SchedulerError>>>,
    result: Option<Result<i32, SchedulerError>>,
    cancel: CancellationToken,
}

impl SshProcess {
    fn spawn(pool: Arc<SshPool>, lease: ChannelLease<Channel<Msg>>, interactive: bool) -> Self {
        let (streams, pipes) = if interactive {
            let (stdin, stdin_remote) = tokio::io::duplex(PIPE_CAPACITY);
            let (stdout_remote, stdout) = tokio::io::duplex(PIPE_CAPACITY);
            let (stderr_remote, stderr) = tokio::io::duplex(PIPE_CAPACITY);
            let streams = ProcessStreams {
                stdin: Box::new(stdin),
                stdout: Box::new(stdout),
                stderr: Box::new(stderr),
            };
            let pipes = RemotePipes {
                stdin: Some(stdin_remote),
                stdout: Some(stdout_remote),
                stderr: Some(stderr_remote),
            };
            (Some(streams), pipes)
        } else {
            let pipes = RemotePipes {
                stdin: None,
                stdout: None,
                stderr: None,
            };
            (None, pipes)
        };

        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(drive(pool, lease, pipes, cancel.clone(), tx));

        Self {
            streams,
            exit: Some(rx),
            result: None,
            cancel,
        }
    }
}

impl Process for SshProcess {
    fn take_streams(&mut self) -> Option<ProcessStreams> {
        self.streams.take()
    }

    fn wait(&mut self) -> BoxFuture<'_, Result<i32, SchedulerError>> {
        Box::pin(async move {
            if let Some(result) = &self.result {
                return result.clone();
            }
            let result = match self.exit.take() {
                Some(rx) => rx.await.unwrap_or_else(|_| {
                    Err(SchedulerError::channel(ADAPTOR, "Remote command vanished"))
                }),
                None => Err(SchedulerError::channel(ADAPTOR, "Remote command vanished")),
            };
            self.result = Some(result.clone());
            result
        })
    }

    fn kill(&mut self) -> BoxFuture<'_, Result<(), SchedulerError>> {
        self.cancel.cancel();
        Box::pin(async { Ok(()) })
    }
}

impl Drop for SshProcess {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn drive(
    pool: Arc<SshPool>,
    lease: ChannelLease<Channel<Msg>>,
    pipes: RemotePipes,
    cancel: CancellationToken,
    tx: oneshot::Sender<Result<i32, SchedulerError>>,
) {
    let ChannelLease {
        session,
        mut channel,
    } = lease;
    let RemotePipes {
        mut stdin,
        mut stdout,
        mut stderr,
    } = pipes;

    if stdin.is_none() {
        if let Err(e) = channel.eof().await {
            debug!(error = %e, "Failed to close remote stdin");
        }
    }

    let mut buf = vec![0u8; PIPE_CAPACITY];
    let mut exit_code = None;
    let mut channel_failed = false;

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = channel.close().await {
                    debug!(error = %e, "Failed to close channel");
                }
                break Err(SchedulerError::canceled(ADAPTOR, "Remote command killed"));
            }
            read = read_input(&mut stdin, &mut buf) => {
                match read {
                    Ok(0) | Err(_) => {
                        stdin = None;
                        if let Err(e) = channel.eof().await {
                            debug!(error = %e, "Failed to close remote stdin");
                        }
                    }
                    Ok(n) => {
                        if let Err(e) = channel.data(&buf[..n]).await {
                            channel_failed = true;
                            break Err(SchedulerError::channel(ADAPTOR, e.to_string()));
                        }
                    }
                }
            }
            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { ref data }) => write_output(&mut stdout, data).await,
                    Some(ChannelMsg::ExtendedData { ref data, ext: 1 }) => {
                        write_output(&mut stderr, data).await
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = Some(exit_status as i32);
                    }
                    Some(ChannelMsg::ExitSignal { ref signal_name, .. }) => {
                        debug!(signal = ?signal_name, "Remote command killed by signal");
                        exit_code = Some(signal_exit_code(signal_name));
                    }
                    Some(_) => {}
                    None => {
                        break exit_code.ok_or_else(|| {
                            SchedulerError::channel(ADAPTOR, "Remote command ended without exit status")
                        });
                    }
                }
            }
        }
    };

    // closing the local ends signals EOF to the readers
    drop(stdout);
    drop(stderr);

    let lease = ChannelLease { session, channel };
    if channel_failed {
        pool.fail_channel(lease).await;
    } else {
        pool.release_exec(lease).await;
    }

    if tx.send(result).is_err() {
        debug!("Nobody waited for remote command");
    }
}

/// Exit code a shell reports for a command killed by `signal`: 128 plus the signal
/// number, `-1` for signals without a portable number.
fn signal_exit_code(signal: &Sig) -> i32 {
    let number = match signal {
        Sig::HUP => 1,
        Sig::INT => 2,
        Sig::QUIT => 3,
        Sig::ILL => 4,
        Sig::ABRT => 6,
        Sig::FPE => 8,
        Sig::KILL => 9,
        Sig::USR1 => 10,
        Sig::SEGV => 11,
        Sig::PIPE => 13,
        Sig::ALRM => 14,
        Sig::TERM => 15,
        Sig::Custom(_) => return -1,
    };
    128 + number
}

async fn read_input(input: &mut Option<DuplexStream>, buf: &mut [u8]) -> std::io::Result<usize> {
    match input {
        Some(input) => input.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn write_output(output: &mut Option<DuplexStream>, data: &[u8]) {
    if let Some(writer) = output {
        if writer.write_all(data).await.is_err() {
            // reader went away; discard the rest
            *output = None;
        }
    }
}

/// Starts job processes on exec channels of a shared pool.
pub struct SshProcessFactory {
    pool: Arc<SshPool>,
    location: String,
}

impl SshProcessFactory {
    pub fn new(pool: Arc<SshPool>, location: impl Into<String>) -> Self {
        Self {
            pool,
            location: location.into(),
        }
    }

    pub fn pool(&self) -> &Arc<SshPool> {
        &self.pool
    }
}

impl ProcessFactory for SshProcessFactory {
    fn adaptor_name(&self) -> &str {
        ADAPTOR
    }

    fn location(&self) -> &str {
        &self.location
    }

    async fn start_process(&self, spec: ProcessSpec) -> Result<Box<dyn Process>, SchedulerError> {
        let command = remote_command(&spec)?;
        let lease = self.pool.acquire_exec().await?;

        debug!(job_id = %spec.job_id, command = %command, "Starting remote command");
        if let Err(e) = lease.channel.exec(true, command).await {
            warn!(job_id = %spec.job_id, error = %e, "Failed to start remote command");
            self.pool.fail_channel(lease).await;
            return Err(SchedulerError::channel(ADAPTOR, e.to_string()));
        }

        Ok(Box::new(SshProcess::spawn(
            self.pool.clone(),
            lease,
            spec.interactive,
        )))
    }

    async fn close(&self) -> Result<(), SchedulerError> {
        self.pool.close().await;
        Ok(())
    }
}
