//! Spawning and reaping pipelines of commands connected stdout to stdin.

use super::fd::{pipe, Fd};
use crate::cmd::Cmd;
use crate::error::BtrfsError;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// Endpoint of a pipeline: the stdin of its first process or the stdout of
/// its last.
#[derive(Debug)]
pub enum Endpoint {
    Inherit,
    Null,
    Piped,
    Fd(Fd),
}

impl Endpoint {
    fn into_stdio(self) -> Stdio {
        match self {
            Endpoint::Inherit => Stdio::inherit(),
            Endpoint::Null => Stdio::null(),
            Endpoint::Piped => Stdio::piped(),
            Endpoint::Fd(fd) => fd.into_stdio(),
        }
    }
}

/// Exit state of one pipeline process.
#[derive(Debug)]
pub struct ProcStatus {
    pub command: String,
    pub status: ExitStatus,
    pub stderr: Vec<u8>,
}

struct Proc {
    child: Child,
    command: String,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

/// A started pipeline of processes. Every process has its stderr captured;
/// the last process's stdout is captured when spawned with
/// `Endpoint::Piped`.
pub struct Pipeline {
    procs: Vec<Proc>,
    stdout: Option<JoinHandle<Vec<u8>>>,
}

/// Spawn `cmds` as a pipeline, each stdout wired to the next stdin through
/// a fresh pipe. Already-started processes are killed and reaped if a later
/// spawn fails.
pub async fn spawn_pipeline(cmds: &[Cmd], stdin: Endpoint, stdout: Endpoint) -> Result<Pipeline, BtrfsError> {
    if cmds.is_empty() {
        return Err(BtrfsError::validation("pipeline needs at least one command"));
    }

    let capture_stdout = matches!(stdout, Endpoint::Piped);
    let last = cmds.len() - 1;
    let mut stdin = Some(stdin);
    let mut stdout = Some(stdout);
    let mut carry: Option<Fd> = None;
    let mut procs: Vec<Proc> = Vec::with_capacity(cmds.len());
    let mut stdout_task = None;

    for (i, cmd) in cmds.iter().enumerate() {
        let mut command = Command::new(&cmd.prg);
        command.args(&cmd.args);
        command.kill_on_drop(true);
        command.stderr(Stdio::piped());

        match carry.take() {
            Some(fd) => command.stdin(fd.into_stdio()),
            None => command.stdin(stdin.take().expect("consumed only for the first process").into_stdio()),
        };
        if i == last {
            command.stdout(stdout.take().expect("consumed only for the last process").into_stdio());
        } else {
            let (r, w) = pipe()?;
            command.stdout(w.into_stdio());
            carry = Some(r);
        }

        match command.spawn() {
            Ok(mut child) => {
                let stderr = child.stderr.take().map(spawn_reader);
                if i == last && capture_stdout {
                    stdout_task = child.stdout.take().map(spawn_reader);
                }
                procs.push(Proc {
                    child,
                    command: cmd.shellify(),
                    stderr,
                });
            }
            Err(e) => {
                for proc in &mut procs {
                    let _ = proc.child.start_kill();
                }
                for proc in &mut procs {
                    let _ = proc.child.wait().await;
                }
                return Err(BtrfsError::Io(e));
            }
        }
    }

    Ok(Pipeline {
        procs,
        stdout: stdout_task,
    })
}

fn spawn_reader(handle: impl AsyncRead + Unpin + Send + 'static) -> JoinHandle<Vec<u8>> {
    tokio::spawn(async move {
        let mut reader = handle;
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf).await;
        buf
    })
}

impl Pipeline {
    /// Wait for every process, in pipeline order.
    pub async fn wait(mut self) -> Result<Vec<ProcStatus>, BtrfsError> {
        self.wait_inner().await
    }

    /// Wait with a deadline. On timeout all remaining processes are killed
    /// and then reaped; their exit states reflect the kill.
    pub async fn wait_timeout(mut self, timeout: Duration) -> Result<Vec<ProcStatus>, BtrfsError> {
        match tokio::time::timeout(timeout, self.wait_inner()).await {
            Ok(result) => result,
            Err(_) => {
                self.kill_all();
                self.wait_inner().await
            }
        }
    }

    /// Wait for every process and fail on the first nonzero exit.
    pub async fn wait_checked(self) -> Result<(), BtrfsError> {
        check(&self.wait().await?)
    }

    /// Wait for every process and return the captured stdout of the last.
    pub async fn output(mut self) -> Result<(Vec<ProcStatus>, Vec<u8>), BtrfsError> {
        let stdout_task = self.stdout.take();
        let statuses = self.wait_inner().await?;
        let stdout = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        Ok((statuses, stdout))
    }

    fn kill_all(&mut self) {
        for proc in &mut self.procs {
            let _ = proc.child.start_kill();
        }
    }

    async fn wait_inner(&mut self) -> Result<Vec<ProcStatus>, BtrfsError> {
        let mut statuses = Vec::with_capacity(self.procs.len());
        for proc in &mut self.procs {
            let status = proc.child.wait().await?;
            let stderr = match proc.stderr.take() {
                Some(task) => task.await.unwrap_or_default(),
                None => Vec::new(),
            };
            statuses.push(ProcStatus {
                command: proc.command.clone(),
                status,
                stderr,
            });
        }
        Ok(statuses)
    }
}

/// Fail with the command and stderr of the first process that exited
/// nonzero.
pub fn check(statuses: &[ProcStatus]) -> Result<(), BtrfsError> {
    for status in statuses {
        if !status.status.success() {
            return Err(BtrfsError::op(status.command.clone(), &status.stderr));
        }
    }
    Ok(())
}

/// Run a pipeline to completion, capturing the last process's stdout.
pub async fn run_output(cmds: &[Cmd], stdin: Endpoint) -> Result<(Vec<ProcStatus>, Vec<u8>), BtrfsError> {
    spawn_pipeline(cmds, stdin, Endpoint::Piped).await?.output().await
}

/// Run a pipeline to completion, failing on any nonzero exit and returning
/// the last process's stdout.
pub async fn run_checked(cmds: &[Cmd], stdin: Endpoint) -> Result<Vec<u8>, BtrfsError> {
    let (statuses, stdout) = run_output(cmds, stdin).await?;
    check(&statuses)?;
    Ok(stdout)
}
