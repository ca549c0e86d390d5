// src/exec/command.rs

//! Process plumbing shared by the runner, the job scheduler and the
//! pipeline executor: building the elevated command, feeding stdin,
//! draining pipes and mapping the way a process ended to an exit code.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::errors::{EngineError, Result};
use crate::types::CommandSpec;

/// Exit code reported when the deadline fired.
pub const EXIT_TIMEOUT: i32 = 124;

/// Exit code reported for start failures and any other wait failure.
pub const EXIT_FAILURE: i32 = 1;

/// Read size used when draining child pipes.
const CHUNK_SIZE: usize = 8 * 1024;

/// How long drains may outlive the deadline once the child is gone.
///
/// A killed wrapper can leave a grandchild holding the write end open.
pub(crate) const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// How every managed process is launched.
///
/// `Sudo` prefixes the command with a non-interactive elevation invocation
/// (`sudo -n` by default), so a password prompt fails the spawn instead of
/// hanging it. `Direct` runs the program as-is, for a service that already
/// runs with the needed privileges (and for tests).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Elevation {
    Sudo {
        #[serde(default = "default_sudo_program")]
        program: String,
        #[serde(default = "default_sudo_args")]
        args: Vec<String>,
    },
    Direct,
}

fn default_sudo_program() -> String {
    "sudo".to_string()
}

fn default_sudo_args() -> Vec<String> {
    vec!["-n".to_string()]
}

impl Default for Elevation {
    fn default() -> Self {
        Elevation::Sudo {
            program: default_sudo_program(),
            args: default_sudo_args(),
        }
    }
}

impl Elevation {
    /// Build the OS command for `spec`. Output is always piped; stdin is
    /// piped only when `spec` carries input, otherwise it is null so
    /// nothing can ever wait on a terminal.
    pub fn command(&self, spec: &CommandSpec) -> Command {
        let mut cmd = match self {
            Elevation::Sudo { program, args } => {
                let mut c = Command::new(program);
                c.args(args).arg(&spec.absolute_path);
                c
            }
            Elevation::Direct => Command::new(&spec.absolute_path),
        };

        cmd.args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Spawn `spec` and start feeding its stdin, if any.
    pub fn spawn(&self, spec: &CommandSpec) -> Result<Child> {
        let mut child = self
            .command(spec)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                command: spec.canonical(),
                source,
            })?;
        feed_stdin(&mut child, spec.stdin.clone());
        Ok(child)
    }
}

/// Write `input` to the child's stdin on a separate task, then close it.
///
/// Writing inline could deadlock against a child that fills its stdout
/// before reading its input.
pub(crate) fn feed_stdin(child: &mut Child, input: Option<Vec<u8>>) {
    let (Some(mut stdin), Some(input)) = (child.stdin.take(), input) else {
        return;
    };
    tokio::spawn(async move {
        if let Err(e) = stdin.write_all(&input).await {
            debug!(error = %e, "child closed stdin before consuming all input");
        }
        // Dropping `stdin` delivers EOF.
    });
}

/// How waiting on a child ended.
#[derive(Debug)]
pub enum WaitOutcome {
    Exited(ExitStatus),
    DeadlineExceeded,
    Failed(std::io::Error),
}

impl WaitOutcome {
    /// 0 on success, the process's own code on failure, [`EXIT_TIMEOUT`]
    /// on deadline and [`EXIT_FAILURE`] for anything else (including
    /// death by signal, which leaves no exit code).
    pub fn exit_code(&self) -> i32 {
        match self {
            WaitOutcome::Exited(status) => status.code().unwrap_or(EXIT_FAILURE),
            WaitOutcome::DeadlineExceeded => EXIT_TIMEOUT,
            WaitOutcome::Failed(_) => EXIT_FAILURE,
        }
    }
}

/// Wait for `child` until `deadline`; past it the child is killed.
pub async fn wait_until(child: &mut Child, deadline: Instant) -> WaitOutcome {
    match timeout_at(deadline, child.wait()).await {
        Ok(Ok(status)) => WaitOutcome::Exited(status),
        Ok(Err(e)) => {
            warn!(error = %e, "waiting for child process failed");
            WaitOutcome::Failed(e)
        }
        Err(_) => {
            kill(child).await;
            WaitOutcome::DeadlineExceeded
        }
    }
}

/// Kill and reap `child`, logging instead of failing.
pub(crate) async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill child process");
    }
}

/// Read `reader` to EOF, handing each chunk to `on_chunk`.
///
/// The sink decides what to keep; this loop never stops early, so a child
/// whose output has been capped can still run to completion.
pub async fn drain<R, F>(mut reader: R, mut on_chunk: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&[u8]),
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => on_chunk(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(error = %e, "pipe read failed; stopping drain");
                break;
            }
        }
    }
}

/// [`drain`], abandoned if the pipe is still open at `until`.
pub async fn drain_until<R, F>(reader: R, until: Instant, on_chunk: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&[u8]),
{
    if timeout_at(until, drain(reader, on_chunk)).await.is_err() {
        warn!("output pipe still open past the deadline; abandoning drain");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sudo_is_the_default_wrapper() {
        assert_eq!(
            Elevation::default(),
            Elevation::Sudo {
                program: "sudo".to_string(),
                args: vec!["-n".to_string()],
            }
        );
    }

    #[test]
    fn sudo_wrapper_prefixes_program() {
        let spec = CommandSpec::new("/sbin/zfs").args(["list", "-H"]);
        let cmd = Elevation::default().command(&spec);
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "sudo");
        let args: Vec<_> = std_cmd.get_args().collect();
        assert_eq!(args, ["-n", "/sbin/zfs", "list", "-H"]);
    }

    #[test]
    fn direct_runs_program_itself() {
        let spec = CommandSpec::new("/bin/echo").arg("hi");
        let cmd = Elevation::Direct.command(&spec);
        assert_eq!(cmd.as_std().get_program(), "/bin/echo");
        assert_eq!(cmd.as_std().get_args().collect::<Vec<_>>(), ["hi"]);
    }

    #[test]
    fn timeout_and_failure_codes() {
        assert_eq!(WaitOutcome::DeadlineExceeded.exit_code(), 124);
        let err = std::io::Error::other("boom");
        assert_eq!(WaitOutcome::Failed(err).exit_code(), 1);
    }

    #[tokio::test]
    async fn drain_reads_past_what_the_sink_keeps() {
        let data = vec![b'x'; CHUNK_SIZE * 3 + 17];
        let mut seen = 0usize;
        drain(&data[..], |chunk| seen += chunk.len()).await;
        assert_eq!(seen, data.len());
    }
}
