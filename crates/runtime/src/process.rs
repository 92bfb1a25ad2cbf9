//! Worker processes.
//!
//! Each worker runs the engine entry point as a separate OS process. A monitor
//! task owns the child: it waits for exit, services terminate requests, drains
//! stderr, and publishes the final [`WorkerExit`] on a `watch` channel. Any
//! number of waiters can observe that exit without polling.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use lantern_config::WorkerConfig;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::WorkerError;
use crate::handoff::HandoffFiles;

/// Keep at most this much stderr for diagnostics.
const STDERR_LIMIT: usize = 16 * 1024;

/// How to launch a worker. `--input <path> --output <path>` is appended to
/// `args`.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// The configured program, or this executable.
    pub fn from_config(config: &WorkerConfig) -> Result<Self, WorkerError> {
        let program = match &config.program {
            Some(program) => PathBuf::from(program),
            None => std::env::current_exe().map_err(|e| {
                WorkerError::SpawnFailed(format!("Cannot locate the current executable: {e}"))
            })?,
        };
        Ok(Self::new(program, config.args.clone()))
    }

    fn build(&self, files: &HandoffFiles) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--input")
            .arg(files.input_path())
            .arg("--output")
            .arg(files.output_path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// How a worker ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
    /// Terminating signal on Unix.
    pub signal: Option<i32>,
    /// Set when the worker was stopped by [`WorkerHandle::terminate`].
    pub terminated: bool,
    pub stderr: String,
}

impl WorkerExit {
    pub fn success(&self) -> bool {
        !self.terminated && self.code == Some(0)
    }

    fn from_status(status: ExitStatus, terminated: bool) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
            terminated,
            stderr: String::new(),
        }
    }
}

/// A running (or finished) worker. Cloning shares the same process.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    request_id: String,
    pid: Option<u32>,
    terminate_tx: mpsc::Sender<Duration>,
    exit_rx: watch::Receiver<Option<WorkerExit>>,
}

impl WorkerHandle {
    /// Start a worker for `files` and hand the child to a monitor task.
    pub fn spawn(command: &WorkerCommand, files: &HandoffFiles) -> Result<Self, WorkerError> {
        let mut child = command.build(files).spawn().map_err(|e| {
            WorkerError::SpawnFailed(format!("{}: {e}", command.program.display()))
        })?;
        let pid = child.id();
        let request_id = files.request_id().to_string();
        info!(request_id = %request_id, pid, "Worker started");

        let (terminate_tx, terminate_rx) = mpsc::channel(1);
        let (exit_tx, exit_rx) = watch::channel(None);
        let stderr = child.stderr.take();

        tokio::spawn(monitor(child, request_id.clone(), stderr, terminate_rx, exit_tx));

        Ok(Self {
            request_id,
            pid,
            terminate_tx,
            exit_rx,
        })
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    /// Exit code once the worker has exited.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_rx.borrow().as_ref().and_then(|exit| exit.code)
    }

    /// Wait for the worker to exit. Cancel-safe.
    pub async fn wait(&self) -> WorkerExit {
        let mut rx = self.exit_rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(exit) => exit.clone().unwrap_or_default(),
            // The monitor always publishes before dropping the sender.
            Err(_) => WorkerExit::default(),
        }
    }

    /// Ask the worker to shut down, force-kill it after `grace`, and wait for
    /// it to exit. Returns immediately if it already has.
    pub async fn terminate(&self, grace: Duration) -> WorkerExit {
        if self.is_alive() {
            // A full channel means a terminate request is already pending.
            let _ = self.terminate_tx.try_send(grace);
        }
        self.wait().await
    }
}

async fn monitor(
    mut child: Child,
    request_id: String,
    stderr: Option<tokio::process::ChildStderr>,
    mut terminate_rx: mpsc::Receiver<Duration>,
    exit_tx: watch::Sender<Option<WorkerExit>>,
) {
    let stderr_task = tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_end(&mut buffer).await;
        }
        let start = buffer.len().saturating_sub(STDERR_LIMIT);
        String::from_utf8_lossy(&buffer[start..]).into_owned()
    });

    let result = tokio::select! {
        status = child.wait() => status.map(|s| WorkerExit::from_status(s, false)),
        Some(grace) = terminate_rx.recv() => {
            info!(request_id = %request_id, grace_ms = grace.as_millis() as u64, "Terminating worker");
            graceful_stop(&mut child, grace).await.map(|s| WorkerExit::from_status(s, true))
        }
    };

    let mut exit = match result {
        Ok(exit) => exit,
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Failed to wait for worker");
            let _ = child.kill().await;
            WorkerExit::default()
        }
    };

    // A grandchild holding the pipe open must not stall the exit report.
    exit.stderr = match tokio::time::timeout(Duration::from_secs(1), stderr_task).await {
        Ok(Ok(stderr)) => stderr,
        _ => String::new(),
    };

    debug!(
        request_id = %request_id,
        code = ?exit.code,
        signal = ?exit.signal,
        terminated = exit.terminated,
        "Worker exited"
    );
    let _ = exit_tx.send(Some(exit));
}

/// Send SIGTERM, then SIGKILL if the worker is still running after `grace`.
async fn graceful_stop(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    request_shutdown(child).await;

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(pid = child.id(), "Worker ignored shutdown request, killing");
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(unix)]
async fn request_shutdown(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    match Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .status()
        .await
    {
        Ok(status) if status.success() => {}
        Ok(status) => debug!(pid, %status, "kill -TERM failed"),
        Err(e) => debug!(pid, error = %e, "Failed to invoke kill"),
    }
}

#[cfg(not(unix))]
async fn request_shutdown(child: &mut Child) {
    let _ = child.start_kill();
}
