//! Sequential async job queue
//!
//! This module provides a small FIFO job runner used by the property
//! monitor to sequence its per-field capture reads. Jobs run with bounded
//! concurrency (the monitor always uses 1), support per-job timeouts, and
//! emit lifecycle events over a broadcast channel. The first job error
//! ends the run and returns the results collected so far.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

/// Error produced by a single job.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("job failed: {0}")]
    Failed(String),

    #[error("job dropped its completion handle without resolving it")]
    Abandoned,

    #[error("job panicked")]
    Panicked,
}

/// Terminal state of a queue run that ended on a job error.
///
/// `completed` holds the results of jobs that finished successfully before
/// the failing job, in dispatch order.
#[derive(Debug)]
pub struct QueueFailure<T> {
    pub label: String,
    pub error: JobError,
    pub completed: Vec<T>,
}

impl<T> std::fmt::Display for QueueFailure<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "queue ended on job '{}': {}", self.label, self.error)
    }
}

impl<T: std::fmt::Debug> std::error::Error for QueueFailure<T> {}

/// Lifecycle events emitted while the queue runs.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A job completed without error.
    Success { label: String },
    /// A job reported an error; the run ends after this event.
    Error { label: String, error: String },
    /// A job did not complete within its timeout. Its slot is freed and
    /// dispatch continues; a late completion from the job is ignored.
    Timeout { label: String },
}

/// Idempotent completion handle handed to callback-style jobs.
///
/// Only the first call to [`resolve`](Self::resolve),
/// [`resolve_empty`](Self::resolve_empty) or [`reject`](Self::reject) has
/// any effect; later calls (including one racing a timeout that already
/// fired) are no-ops and return `false`.
pub struct JobCompletion<T> {
    slot: StdMutex<Option<oneshot::Sender<Result<Option<T>, JobError>>>>,
}

impl<T> JobCompletion<T> {
    fn new(tx: oneshot::Sender<Result<Option<T>, JobError>>) -> Self {
        Self {
            slot: StdMutex::new(Some(tx)),
        }
    }

    /// Complete the job with a result. Returns `false` if the job was
    /// already completed.
    pub fn resolve(&self, value: T) -> bool {
        self.finish(Ok(Some(value)))
    }

    /// Complete the job successfully without contributing a result.
    pub fn resolve_empty(&self) -> bool {
        self.finish(Ok(None))
    }

    /// Complete the job with an error, ending the enclosing queue run.
    pub fn reject(&self, error: JobError) -> bool {
        self.finish(Err(error))
    }

    fn finish(&self, outcome: Result<Option<T>, JobError>) -> bool {
        let tx = self.slot.lock().ok().and_then(|mut slot| slot.take());
        match tx {
            Some(tx) => {
                // A send error means the queue side was dropped (timeout
                // already fired); the completion still counts as consumed.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

enum JobWork<T> {
    Future(BoxFuture<'static, Result<Option<T>, JobError>>),
    Callback(Box<dyn FnOnce(Arc<JobCompletion<T>>) + Send + 'static>),
}

/// One asynchronous unit of work managed by the queue.
pub struct Job<T> {
    label: String,
    timeout: Option<Duration>,
    work: JobWork<T>,
}

impl<T: Send + 'static> Job<T> {
    /// Create a job from a future resolving to the job outcome.
    pub fn from_future<F>(label: impl Into<String>, future: F) -> Self
    where
        F: std::future::Future<Output = Result<Option<T>, JobError>> + Send + 'static,
    {
        Self {
            label: label.into(),
            timeout: None,
            work: JobWork::Future(Box::pin(future)),
        }
    }

    /// Create a callback-style job. The closure receives an idempotent
    /// [`JobCompletion`] it must eventually resolve or reject; dropping all
    /// clones of the handle without completing counts as a job error.
    pub fn with_callback<F>(label: impl Into<String>, work: F) -> Self
    where
        F: FnOnce(Arc<JobCompletion<T>>) + Send + 'static,
    {
        Self {
            label: label.into(),
            timeout: None,
            work: JobWork::Callback(Box::new(work)),
        }
    }

    /// Override the queue default timeout for this job.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn into_parts(self) -> (String, Option<Duration>, BoxFuture<'static, Result<Option<T>, JobError>>) {
        let future: BoxFuture<'static, Result<Option<T>, JobError>> = match self.work {
            JobWork::Future(future) => future,
            JobWork::Callback(work) => Box::pin(async move {
                let (tx, rx) = oneshot::channel();
                let completion = Arc::new(JobCompletion::new(tx));
                work(completion);
                match rx.await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(JobError::Abandoned),
                }
            }),
        };
        (self.label, self.timeout, future)
    }
}

enum QueueCommand<T> {
    Push(Job<T>),
    Unshift(Job<T>),
    Stop,
    Resume,
}

/// Handle for feeding and controlling a running queue.
pub struct QueueHandle<T> {
    commands: mpsc::UnboundedSender<QueueCommand<T>>,
}

impl<T> Clone for QueueHandle<T> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
        }
    }
}

impl<T> QueueHandle<T> {
    /// Append a job to the tail of a running queue.
    pub fn push(&self, job: Job<T>) {
        let _ = self.commands.send(QueueCommand::Push(job));
    }

    /// Insert a job at the head of a running queue (priority re-insertion).
    pub fn unshift(&self, job: Job<T>) {
        let _ = self.commands.send(QueueCommand::Unshift(job));
    }

    /// Pause dispatch. In-flight jobs still complete; no new jobs are
    /// pulled until [`resume`](Self::resume) is called.
    pub fn stop(&self) {
        let _ = self.commands.send(QueueCommand::Stop);
    }

    /// Resume dispatch after a [`stop`](Self::stop).
    pub fn resume(&self) {
        let _ = self.commands.send(QueueCommand::Resume);
    }
}

enum JobOutcome<T> {
    Finished(Result<Option<T>, JobError>),
    TimedOut,
}

/// FIFO job queue with bounded concurrency and per-job timeouts.
pub struct JobQueue<T> {
    jobs: VecDeque<Job<T>>,
    concurrency: usize,
    default_timeout: Option<Duration>,
    events: broadcast::Sender<QueueEvent>,
    commands: mpsc::UnboundedReceiver<QueueCommand<T>>,
    handle: QueueHandle<T>,
}

impl<T: Send + 'static> Default for JobQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> JobQueue<T> {
    /// Create a queue with unbounded concurrency.
    pub fn new() -> Self {
        Self::with_concurrency(usize::MAX)
    }

    /// Create a queue running at most `concurrency` jobs at once.
    pub fn with_concurrency(concurrency: usize) -> Self {
        let (events, _) = broadcast::channel(256);
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            jobs: VecDeque::new(),
            concurrency: concurrency.max(1),
            default_timeout: None,
            events,
            commands: rx,
            handle: QueueHandle { commands: tx },
        }
    }

    /// Set the default timeout applied to jobs without their own override.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Append one job to the tail before the run starts.
    pub fn push(&mut self, job: Job<T>) -> &mut Self {
        self.jobs.push_back(job);
        self
    }

    /// Insert one job at the head before the run starts.
    pub fn unshift(&mut self, job: Job<T>) -> &mut Self {
        self.jobs.push_front(job);
        self
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Get a handle for pushing jobs and pausing/resuming while running.
    pub fn handle(&self) -> QueueHandle<T> {
        self.handle.clone()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Run the queue to completion.
    ///
    /// Resolves with the results of successful jobs in dispatch order once
    /// the job list drains with zero in-flight jobs, or with a
    /// [`QueueFailure`] as soon as any job reports an error. Jobs still in
    /// flight when an error occurs are dropped.
    pub async fn run(mut self) -> Result<Vec<T>, QueueFailure<T>> {
        let mut results = Vec::new();
        let mut in_flight: FuturesUnordered<BoxFuture<'static, (String, JobOutcome<T>)>> =
            FuturesUnordered::new();
        let mut running = true;

        loop {
            // Drain any pending control commands without blocking.
            while let Ok(command) = self.commands.try_recv() {
                Self::apply_command(&mut self.jobs, &mut running, command);
            }

            // Fill available slots in FIFO order.
            while running && in_flight.len() < self.concurrency {
                let Some(job) = self.jobs.pop_front() else {
                    break;
                };
                in_flight.push(Self::dispatch(job, self.default_timeout));
            }

            if in_flight.is_empty() {
                if self.jobs.is_empty() {
                    break;
                }
                // Paused with queued jobs: wait for a command.
                if let Some(command) = self.commands.recv().await {
                    Self::apply_command(&mut self.jobs, &mut running, command);
                }
                continue;
            }

            tokio::select! {
                Some((label, outcome)) = in_flight.next() => {
                    match outcome {
                        JobOutcome::Finished(Ok(result)) => {
                            if let Some(value) = result {
                                results.push(value);
                            }
                            debug!(job = %label, "job completed");
                            let _ = self.events.send(QueueEvent::Success { label });
                        }
                        JobOutcome::Finished(Err(error)) => {
                            warn!(job = %label, %error, "job failed, ending queue run");
                            let _ = self.events.send(QueueEvent::Error {
                                label: label.clone(),
                                error: error.to_string(),
                            });
                            return Err(QueueFailure {
                                label,
                                error,
                                completed: results,
                            });
                        }
                        JobOutcome::TimedOut => {
                            warn!(job = %label, "job timed out, freeing slot");
                            let _ = self.events.send(QueueEvent::Timeout { label });
                        }
                    }
                }
                Some(command) = self.commands.recv() => {
                    Self::apply_command(&mut self.jobs, &mut running, command);
                }
            }
        }

        Ok(results)
    }

    fn apply_command(jobs: &mut VecDeque<Job<T>>, running: &mut bool, command: QueueCommand<T>) {
        match command {
            QueueCommand::Push(job) => jobs.push_back(job),
            QueueCommand::Unshift(job) => jobs.push_front(job),
            QueueCommand::Stop => *running = false,
            QueueCommand::Resume => *running = true,
        }
    }

    fn dispatch(
        job: Job<T>,
        default_timeout: Option<Duration>,
    ) -> BoxFuture<'static, (String, JobOutcome<T>)> {
        let (label, job_timeout, future) = job.into_parts();
        let timeout = job_timeout.or(default_timeout);
        // A panicking job is downgraded to a job error so the queue can
        // report it like any other failure instead of tearing down the
        // runner task.
        let future = std::panic::AssertUnwindSafe(future)
            .catch_unwind()
            .map(|caught| caught.unwrap_or(Err(JobError::Panicked)));
        Box::pin(async move {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, future).await {
                    Ok(outcome) => (label, JobOutcome::Finished(outcome)),
                    // Dropping the inner future here is what makes a late
                    // completion from the timed-out job a no-op.
                    Err(_) => (label, JobOutcome::TimedOut),
                },
                None => {
                    let outcome = future.await;
                    (label, JobOutcome::Finished(outcome))
                }
            }
        })
    }
}
