//! Long-running job queues fed while they run.
//!
//! A [`JobQueue`] wraps an adaptive [`WorkerPool`] around an open task
//! channel. Every accepted task holds a [`WaitGuard`] of a [`WaitGroup`]
//! shared by all queues of a build, so the caller can wait for the whole
//! build to go quiet even while workers keep enqueuing follow-up tasks.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{JobError, WorkerError};
use crate::pool::{TaskReceiver, TaskSender, Worker, WorkerPool, channel};
use crate::wait_group::{WaitGroup, WaitGuard};

/// A task paired with its wait-group registration.
pub struct Tracked<T> {
    task: T,
    _done: WaitGuard,
}

/// Runs the inner worker, then releases the task's wait-group slot.
struct Tracking<W>(W);

impl<T, W> Worker<Tracked<T>> for Tracking<W>
where
    T: Send + 'static,
    W: Worker<T>,
{
    async fn work(
        &self,
        token: &CancellationToken,
        tracked: Tracked<T>,
    ) -> Result<(), WorkerError> {
        let Tracked { task, _done } = tracked;
        self.0.work(token, task).await
    }
}

// ---------------------------------------------------------------------------
// Submitter
// ---------------------------------------------------------------------------

struct SubmitterInner<T> {
    name: String,
    sender: TaskSender<Tracked<T>>,
    wait_group: WaitGroup,
}

/// Cloneable handle that feeds tasks into a [`JobQueue`].
pub struct Submitter<T> {
    inner: Arc<SubmitterInner<T>>,
}

impl<T> Clone for Submitter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Submitter<T> {
    /// Enqueue a task. Returns `false` once the queue has been stopped.
    pub fn add_task(&self, task: T) -> bool {
        let tracked = Tracked {
            task,
            _done: self.inner.wait_group.add(),
        };
        match self.inner.sender.send(tracked) {
            Ok(()) => true,
            Err(_rejected) => {
                debug!(queue = %self.inner.name, "task rejected by stopped queue");
                false
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

// ---------------------------------------------------------------------------
// JobQueue
// ---------------------------------------------------------------------------

type Pending<T, W> = (WorkerPool<Tracked<T>, Tracking<W>>, TaskReceiver<Tracked<T>>);

/// Named queue served by up to `workers` concurrent workers.
pub struct JobQueue<T, W> {
    submitter: Submitter<T>,
    pending: StdMutex<Option<Pending<T, W>>>,
    handle: StdMutex<Option<JoinHandle<Result<(), JobError>>>>,
}

impl<T, W> JobQueue<T, W>
where
    T: Send + 'static,
    W: Worker<T>,
{
    /// Build a queue whose pool scales between one worker and `workers`.
    pub fn new(
        name: impl Into<String>,
        workers: usize,
        fail_fast: bool,
        worker: W,
        wait_group: &WaitGroup,
    ) -> Result<Self, JobError> {
        let name = name.into();
        let pool = WorkerPool::new(
            name.clone(),
            workers.min(1),
            workers,
            fail_fast,
            Tracking(worker),
        )?;
        let (sender, receiver) = channel();
        Ok(Self {
            submitter: Submitter {
                inner: Arc::new(SubmitterInner {
                    name,
                    sender,
                    wait_group: wait_group.clone(),
                }),
            },
            pending: StdMutex::new(Some((pool, receiver))),
            handle: StdMutex::new(None),
        })
    }

    /// Cancel `token` when a fail-fast failure stops this queue.
    /// Only effective before [`JobQueue::start`].
    pub fn escalate_failures_to(&self, token: CancellationToken) {
        let mut pending = lock(&self.pending);
        if let Some((pool, receiver)) = pending.take() {
            *pending = Some((pool.cancel_on_failure(token), receiver));
        }
    }

    /// Spawn the queue's pool. Calling it again is a no-op.
    pub fn start(&self, token: &CancellationToken) {
        let Some((pool, receiver)) = lock(&self.pending).take() else {
            return;
        };
        let token = token.clone();
        debug!(queue = %self.name(), "starting job queue");
        let handle = tokio::spawn(async move { pool.run(&token, receiver).await });
        *lock(&self.handle) = Some(handle);
    }

    /// Enqueue a task. Returns `false` once the queue has been stopped.
    pub fn add_task(&self, task: T) -> bool {
        self.submitter.add_task(task)
    }

    pub fn submitter(&self) -> Submitter<T> {
        self.submitter.clone()
    }

    /// Stop accepting tasks; the pool exits once its backlog drains.
    pub fn stop(&self) {
        self.submitter.inner.sender.close();
    }

    /// Wait for the pool to exit and return its outcome.
    pub async fn join(&self) -> Result<(), JobError> {
        let handle = lock(&self.handle).take();
        let Some(handle) = handle else {
            return Ok(());
        };
        match handle.await {
            Ok(result) => result,
            Err(join_error) => {
                warn!(queue = %self.name(), error = %join_error, "job queue task aborted");
                Err(JobError::Worker(WorkerError::panicked(
                    self.name(),
                    &join_error.to_string(),
                )))
            }
        }
    }

    /// Tasks whose worker has finished.
    pub fn processed_count(&self) -> usize {
        self.submitter.inner.sender.processed()
    }

    /// Tasks accepted but not yet picked up by a worker.
    pub fn waiting_count(&self) -> usize {
        self.submitter.inner.sender.queued()
    }

    pub fn name(&self) -> &str {
        self.submitter.name()
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
