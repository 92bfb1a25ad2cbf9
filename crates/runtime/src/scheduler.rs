//! Single-flight admission into the engine.
//!
//! At most one worker exists at a time. A new submission preempts the one in
//! flight (last request wins); [`Scheduler::cancel`] stops it without starting
//! another. The admission lock guards state transitions only and is never held
//! while waiting for a worker to finish, so a cancel can always get in.
//!
//! A submission whose caller goes away (client disconnect, aborted task) stops
//! its worker and removes its hand-off files once the worker has exited.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lantern_config::WorkerConfig;
use lantern_core::engine::Generation;
use lantern_core::handoff::{WorkerInput, WorkerOutput};
use lantern_core::message::Conversation;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::WorkerError;
use crate::handoff::HandoffFiles;
use crate::process::{WorkerCommand, WorkerExit, WorkerHandle};

/// Result of a submission that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Completed(Generation),
    /// The worker was cancelled or preempted by a newer submission.
    Stopped,
}

struct InFlight {
    generation: u64,
    handle: WorkerHandle,
}

pub struct Scheduler {
    command: WorkerCommand,
    handoff_dir: PathBuf,
    grace: Duration,
    current: Arc<Mutex<Option<InFlight>>>,
    generation: AtomicU64,
}

impl Scheduler {
    pub fn new(command: WorkerCommand, handoff_dir: impl Into<PathBuf>, grace: Duration) -> Self {
        Self {
            command,
            handoff_dir: handoff_dir.into(),
            grace,
            current: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Result<Self, WorkerError> {
        Ok(Self::new(
            WorkerCommand::from_config(config)?,
            config.handoff_dir(),
            Duration::from_millis(config.grace_period_ms),
        ))
    }

    /// Request id of the worker in flight, if any.
    pub async fn in_flight(&self) -> Option<String> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|f| f.handle.request_id().to_string())
    }

    /// Run `conversation` through a fresh worker, preempting any worker in
    /// flight. Waits without a timeout for the worker to finish.
    pub async fn submit(
        &self,
        conversation: Conversation,
        max_output_tokens: usize,
    ) -> Result<SubmitOutcome, WorkerError> {
        let files = HandoffFiles::new(&self.handoff_dir);
        files
            .write_input(&WorkerInput {
                request_id: files.request_id().to_string(),
                conversation,
                max_output_tokens,
            })
            .await?;

        let (generation, handle) = {
            let mut current = self.current.lock().await;
            if let Some(previous) = current.take() {
                info!(
                    preempted = previous.handle.request_id(),
                    request_id = files.request_id(),
                    "Preempting in-flight worker"
                );
                previous.handle.terminate(self.grace).await;
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let handle = WorkerHandle::spawn(&self.command, &files)?;
            *current = Some(InFlight {
                generation,
                handle: handle.clone(),
            });
            (generation, handle)
        };
        let files = Arc::new(files);
        let mut guard = AbandonGuard {
            current: self.current.clone(),
            generation,
            handle: handle.clone(),
            grace: self.grace,
            files: files.clone(),
            armed: true,
        };

        let exit = handle.wait().await;

        let still_current = {
            let mut current = self.current.lock().await;
            let ours = current.as_ref().is_some_and(|f| f.generation == generation);
            if ours {
                *current = None;
            }
            ours
        };
        guard.armed = false;

        if exit.terminated || !still_current {
            info!(request_id = files.request_id(), "Worker stopped before completing");
            return Ok(SubmitOutcome::Stopped);
        }

        collect(&files, exit).await
    }

    /// Stop the worker in flight, if any. Returns whether one was stopped.
    pub async fn cancel(&self) -> bool {
        let mut current = self.current.lock().await;
        match current.take() {
            Some(in_flight) => {
                info!(request_id = in_flight.handle.request_id(), "Cancelling worker");
                in_flight.handle.terminate(self.grace).await;
                true
            }
            None => {
                debug!("Cancel requested with nothing in flight");
                false
            }
        }
    }
}

/// Shares the hand-off files while `submit` waits. If the submit future is
/// dropped first, the worker is stopped and unregistered in the background and
/// the files are removed after it has exited.
struct AbandonGuard {
    current: Arc<Mutex<Option<InFlight>>>,
    generation: u64,
    handle: WorkerHandle,
    grace: Duration,
    files: Arc<HandoffFiles>,
    armed: bool,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        info!(request_id = self.files.request_id(), "Submitter went away, stopping worker");

        let current = self.current.clone();
        let generation = self.generation;
        let handle = self.handle.clone();
        let grace = self.grace;
        let files = self.files.clone();
        runtime.spawn(async move {
            {
                let mut current = current.lock().await;
                if current.as_ref().is_some_and(|f| f.generation == generation) {
                    *current = None;
                }
            }
            handle.terminate(grace).await;
            drop(files);
        });
    }
}

/// Turn a finished worker's exit and result file into an outcome.
async fn collect(files: &HandoffFiles, exit: WorkerExit) -> Result<SubmitOutcome, WorkerError> {
    if !exit.success() {
        // The worker writes a failure payload before exiting non-zero.
        if let Ok(Some(WorkerOutput::Failure { error })) = files.read_output().await {
            return Err(WorkerError::EngineFailure(error));
        }
        warn!(
            request_id = files.request_id(),
            code = ?exit.code,
            signal = ?exit.signal,
            "Worker failed"
        );
        return Err(WorkerError::NonZeroExit {
            code: exit.code,
            signal: exit.signal,
            stderr: exit.stderr,
        });
    }

    match files.read_output().await? {
        Some(WorkerOutput::Success { text, metadata }) => {
            Ok(SubmitOutcome::Completed(Generation { text, metadata }))
        }
        Some(WorkerOutput::Failure { error }) => Err(WorkerError::EngineFailure(error)),
        None => Err(WorkerError::MissingOutput),
    }
}
