//! Local process executor implementation.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use runway_core::executor::*;
use runway_core::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

const LOG_BUFFER: usize = 256;

/// Runs builds as child processes on the server host.
///
/// Each build gets `<workspace_root>/<build id>`, a fresh clone checked out
/// at the build's commit, and runs the script with `sh -c` inside it.
pub struct LocalProcessExecutor {
    git: String,
    shell: String,
}

impl LocalProcessExecutor {
    pub fn new() -> Self {
        Self {
            git: "git".to_string(),
            shell: "sh".to_string(),
        }
    }

    async fn git(&self, args: &[&str], cwd: &Path) -> Result<()> {
        debug!(args = ?args, cwd = %cwd.display(), "Running git");
        let output = Command::new(&self.git)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to run {}: {}", self.git, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ExecutionFailed(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl Default for LocalProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for LocalProcessExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn prepare(&self, spec: &JobSpec) -> Result<PathBuf> {
        let workdir = spec.workspace_dir();

        // A resumed build starts from a clean checkout.
        if tokio::fs::try_exists(&workdir).await? {
            warn!(dir = %workdir.display(), "Removing stale workspace");
            tokio::fs::remove_dir_all(&workdir).await?;
        }
        tokio::fs::create_dir_all(&spec.workspace_root).await?;

        let clone = &spec.git_clone;
        let target = workdir.to_string_lossy().into_owned();
        info!(url = %clone.url, dir = %target, "Cloning repository");
        self.git(
            &["clone", "--quiet", "--", &clone.url, &target],
            &spec.workspace_root,
        )
        .await?;

        let revision = clone.sha.as_deref().or(clone.branch.as_deref());
        if let Some(revision) = revision {
            self.git(&["checkout", "--quiet", "--detach", revision], &workdir)
                .await?;
        }

        Ok(workdir)
    }

    async fn spawn(&self, spec: &JobSpec, workdir: &Path) -> Result<RunningJob> {
        info!(build_id = %spec.build_id, script = %spec.script, "Starting build script");
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&spec.script)
            .current_dir(workdir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::ExecutionFailed(format!("Failed to start '{}': {}", spec.script, e))
            })?;

        let (tx, rx) = mpsc::channel(LOG_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, LogStream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, LogStream::Stderr, tx.clone()));
        }
        drop(tx);

        let (exit_tx, exit_rx) = oneshot::channel();
        let timeout = spec.timeout;
        let build_id = spec.build_id;
        tokio::spawn(async move {
            let result = wait_child(&mut child, timeout).await;
            if let Ok(result) = &result {
                debug!(build_id = %build_id, exit_code = ?result.exit_code, timed_out = result.timed_out, "Build script exited");
            }
            let _ = exit_tx.send(result);
        });

        Ok(RunningJob {
            logs: Box::pin(ReceiverStream::new(rx)),
            exit: Box::pin(async move {
                exit_rx
                    .await
                    .unwrap_or_else(|_| Err(Error::Internal("process watcher stopped".to_string())))
            }),
        })
    }
}

/// Read errors tolerated in a row before a pipe is given up on.
const MAX_READ_ERRORS: usize = 8;

/// Forward each line of `reader` until EOF.
///
/// The pipe is drained to the end even when the receiver is gone, so the
/// script never writes into a closed pipe.
async fn forward_lines<R>(reader: R, stream: LogStream, tx: mpsc::Sender<LogLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut forwarding = true;
    let mut errors = 0;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                errors = 0;
                if forwarding && tx.send(LogLine::new(stream, decode_line(&buf))).await.is_err() {
                    debug!(stream = ?stream, "Log receiver closed, discarding output");
                    forwarding = false;
                }
            }
            Err(e) => {
                errors += 1;
                warn!(error = %e, stream = ?stream, "Log stream error");
                if errors >= MAX_READ_ERRORS {
                    break;
                }
            }
        }
    }
}

/// Strip the line terminator and decode, replacing invalid UTF-8.
fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

async fn wait_child(child: &mut Child, timeout: Option<std::time::Duration>) -> Result<JobResult> {
    let status = match timeout {
        None => child.wait().await?,
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(timeout_secs = limit.as_secs(), "Build script timed out, killing");
                child.kill().await?;
                return Ok(JobResult {
                    exit_code: None,
                    timed_out: true,
                });
            }
        },
    };
    Ok(JobResult {
        exit_code: status.code(),
        timed_out: false,
    })
}
