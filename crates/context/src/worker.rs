//! Bounded background task pool
//!
//! Runs fire-and-forget work (cache repopulation, warm-up builds) off the
//! request path. Submission never blocks: a full queue rejects the task.
//! Failed and panicked tasks are logged, counted and reported on a failure
//! channel that a supervisor may take once.

use cerberus_common::{metrics, AppError, ErrorCode, Result};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct Job {
    name: String,
    task: BoxFuture<'static, Result<()>>,
}

/// A task that returned an error or panicked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub name: String,
    pub error: String,
    /// None for a panic
    pub code: Option<ErrorCode>,
    /// A backing tier failed; the same task may succeed later
    pub transient: bool,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time counters of the pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub submitted: u64,
    pub rejected: u64,
    pub completed: u64,
    pub failed: u64,
    pub queued: usize,
}

pub struct BackgroundWorker {
    sender: mpsc::Sender<Job>,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    failures: Mutex<Option<mpsc::Receiver<TaskFailure>>>,
    counters: Arc<Counters>,
}

impl BackgroundWorker {
    /// Spawn `workers` tasks draining a queue of `capacity` jobs.
    /// Must be called inside a Tokio runtime.
    pub fn new(workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let capacity = capacity.max(1);

        let (sender, receiver) = mpsc::channel::<Job>(capacity);
        let (failure_tx, failure_rx) = mpsc::channel::<TaskFailure>(capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let cancel = CancellationToken::new();
        let counters = Arc::new(Counters::default());

        let handles = (0..workers)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    receiver.clone(),
                    cancel.clone(),
                    failure_tx.clone(),
                    counters.clone(),
                ))
            })
            .collect();

        info!(workers, capacity, "Background worker pool started");

        Self {
            sender,
            cancel,
            handles: Mutex::new(handles),
            failures: Mutex::new(Some(failure_rx)),
            counters,
        }
    }

    /// Queue a task without waiting; fails when the queue is full or the
    /// pool is shutting down
    pub fn submit<F>(&self, name: impl Into<String>, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();

        if self.cancel.is_cancelled() {
            self.reject(&name, "shutting down");
            return Err(AppError::QueueError {
                message: format!("worker pool is shutting down, task '{}' rejected", name),
            });
        }

        let job = Job {
            name: name.clone(),
            task: task.boxed(),
        };

        match self.sender.try_send(job) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                metrics::record_worker_task("submitted");
                debug!(task = %name, "Task queued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.reject(&name, "queue full");
                Err(AppError::QueueError {
                    message: format!("worker queue full, task '{}' rejected", name),
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.reject(&name, "queue closed");
                Err(AppError::QueueError {
                    message: format!("worker queue closed, task '{}' rejected", name),
                })
            }
        }
    }

    fn reject(&self, name: &str, reason: &str) {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        metrics::record_worker_task("rejected");
        warn!(task = %name, reason, "Background task rejected");
    }

    /// The failure channel; only the first caller gets it
    pub async fn take_failures(&self) -> Option<mpsc::Receiver<TaskFailure>> {
        self.failures.lock().await.take()
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            queued: self.sender.max_capacity() - self.sender.capacity(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled when the pool begins shutting down, for tasks that
    /// should stop early rather than drain
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Stop accepting work, let workers drain the queue, and wait up to
    /// `timeout`. Returns false if workers had to be aborted.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        if handles.is_empty() {
            return true;
        }
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        match tokio::time::timeout(timeout, join_all(handles)).await {
            Ok(_) => {
                info!("Background worker pool stopped");
                true
            }
            Err(_) => {
                for abort in aborts {
                    abort.abort();
                }
                warn!(timeout_secs = timeout.as_secs_f64(), "Background workers aborted after timeout");
                false
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    cancel: CancellationToken,
    failures: mpsc::Sender<TaskFailure>,
    counters: Arc<Counters>,
) {
    loop {
        // Queued jobs are drained before a cancelled worker exits
        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                job = receiver.recv() => job,
                _ = cancel.cancelled() => None,
            }
        };

        let Some(job) = next else {
            break;
        };

        let outcome = AssertUnwindSafe(job.task).catch_unwind().await;
        let (error, code, transient) = match outcome {
            Ok(Ok(())) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
                metrics::record_worker_task("completed");
                debug!(worker_id, task = %job.name, "Task completed");
                continue;
            }
            Ok(Err(e)) => {
                let code = e.code();
                warn!(
                    worker_id,
                    task = %job.name,
                    code = code.as_code(),
                    transient = e.is_transient(),
                    error = %e,
                    "Background task failed"
                );
                (e.to_string(), Some(code), e.is_transient())
            }
            Err(_) => {
                error!(worker_id, task = %job.name, "Background task panicked");
                ("task panicked".to_string(), None, false)
            }
        };

        counters.failed.fetch_add(1, Ordering::Relaxed);
        metrics::record_worker_task("failed");
        if failures
            .try_send(TaskFailure {
                name: job.name,
                error,
                code,
                transient,
            })
            .is_err()
        {
            debug!(worker_id, "Failure channel full or closed, failure not reported");
        }
    }

    debug!(worker_id, "Worker stopped");
}
