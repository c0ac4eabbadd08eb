//! Single background thread that performs all repository I/O.
//!
//! Jobs are admitted one at a time through a one-permit gate. The permit
//! travels with the job and is released on the worker thread once the job
//! has finished, so the next caller can only install its job after the
//! previous one is fully done. A running job is never interrupted; it sees
//! the caller's [`CancelScope`] and decides itself where to stop.

pub mod cancel;

pub use cancel::CancelScope;

use crate::utils::errors::{BackupError, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to the running worker thread.
struct Running {
    sender: SyncSender<Job>,
    handle: JoinHandle<()>,
    exited: Receiver<()>,
}

pub struct IoWorker {
    gate: Arc<Semaphore>,
    shutdown: CancellationToken,
    join_timeout: Duration,
    running: Mutex<Option<Running>>,
}

impl IoWorker {
    /// Create a worker; the thread starts on the first scheduled job.
    pub fn new(join_timeout: Duration) -> Self {
        Self {
            gate: Arc::new(Semaphore::new(1)),
            shutdown: CancellationToken::new(),
            join_timeout,
            running: Mutex::new(None),
        }
    }

    /// Token cancelled when the worker shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|running| running.is_some())
            .unwrap_or(false)
    }

    /// Run `job` on the worker thread and wait for its result.
    ///
    /// Cancellation of `scope` while waiting for the gate returns `Canceled`
    /// without running the job. Once the job has been handed over, the call
    /// waits for it to finish whatever happens to `scope`.
    pub async fn schedule<T, F>(&self, job: F, scope: &CancelScope) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&CancelScope) -> Result<T> + Send + 'static,
    {
        let scope = scope.clone().with_token(self.shutdown.clone());
        scope.check()?;

        let permit = tokio::select! {
            biased;
            _ = scope.cancelled() => return Err(BackupError::Canceled),
            permit = self.gate.clone().acquire_owned() => permit
                .map_err(|_| BackupError::Worker("worker is shut down".to_string()))?,
        };
        // The permit may have been granted in the same instant as a cancellation.
        scope.check()?;

        let (reply_tx, reply_rx) = oneshot::channel();

        let task: Job = Box::new(move || {
            let result = if scope.is_cancelled() {
                Err(BackupError::Canceled)
            } else {
                panic::catch_unwind(AssertUnwindSafe(|| job(&scope))).unwrap_or_else(|_| {
                    error!("IO job panicked");
                    Err(BackupError::Worker("job panicked".to_string()))
                })
            };
            // The caller may have stopped listening; the job's effects stand regardless.
            let _ = reply_tx.send(result);
            drop(permit);
        });

        // No sender clone may outlive the hand-off, or shutdown cannot
        // disconnect the thread while this call awaits the reply.
        self.sender()?.try_send(task).map_err(|e| match e {
            TrySendError::Full(_) => BackupError::Worker("job slot occupied".to_string()),
            TrySendError::Disconnected(_) => BackupError::Worker("worker stopped".to_string()),
        })?;

        reply_rx
            .await
            .map_err(|_| BackupError::Worker("job dropped without a result".to_string()))?
    }

    /// Stop accepting jobs and wait (bounded) for the thread to exit.
    ///
    /// An in-flight job runs to completion first. If it outlives the join
    /// timeout the thread is detached. Calling this again is a no-op.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.gate.close();

        let running = match self.running.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(Running {
            sender,
            handle,
            exited,
        }) = running
        else {
            return;
        };

        drop(sender);
        match exited.recv_timeout(self.join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!("IO worker thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "IO worker did not stop within {:?}, detaching it",
                    self.join_timeout
                );
            }
        }
    }

    /// Sender of the running thread, starting it if needed.
    fn sender(&self) -> Result<SyncSender<Job>> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| BackupError::Worker("worker state poisoned".to_string()))?;

        if self.shutdown.is_cancelled() {
            return Err(BackupError::Canceled);
        }

        if let Some(running) = running.as_ref() {
            return Ok(running.sender.clone());
        }

        let started = spawn_thread()?;
        let sender = started.sender.clone();
        *running = Some(started);
        Ok(sender)
    }
}

impl Drop for IoWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_thread() -> Result<Running> {
    let (sender, receiver) = mpsc::sync_channel::<Job>(1);
    let (exit_tx, exited) = mpsc::channel();

    let handle = thread::Builder::new()
        .name("io-worker".to_string())
        .spawn(move || {
            debug!("IO worker started");
            while let Ok(job) = receiver.recv() {
                job();
            }
            debug!("IO worker stopped");
            let _ = exit_tx.send(());
        })?;

    Ok(Running {
        sender,
        handle,
        exited,
    })
}
