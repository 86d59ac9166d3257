//! Bounded worker pool draining an unbounded task channel.
//!
//! A pool runs between `min_workers` and `max_workers` concurrent workers.
//! With equal limits it is *strict*: that many workers start up front and
//! live until the channel closes. Otherwise it is *adaptive*: `min_workers`
//! long-lived workers start up front, and a supervisor spawns short-lived
//! workers while queued tasks outnumber idle workers. A semaphore holding
//! `max_workers - min_workers` permits bounds the extra workers.

use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::{JobError, WorkerError};

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Processes one task at a time.
///
/// The token is cancelled when the pool stops early (fail-fast or caller
/// cancellation); long-running work should observe it.
pub trait Worker<T>: Send + Sync + 'static {
    fn work(
        &self,
        token: &CancellationToken,
        task: T,
    ) -> impl Future<Output = Result<(), WorkerError>> + Send;
}

/// Adapts a closure `(token, task) -> future` into a [`Worker`].
pub struct WorkerFn<F>(pub F);

impl<T, F, Fut> Worker<T> for WorkerFn<F>
where
    F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkerError>> + Send,
{
    fn work(
        &self,
        token: &CancellationToken,
        task: T,
    ) -> impl Future<Output = Result<(), WorkerError>> + Send {
        (self.0)(token.clone(), task)
    }
}

// ---------------------------------------------------------------------------
// Task channel
// ---------------------------------------------------------------------------

/// Counters shared by both halves of a task channel and the pool's workers.
#[derive(Debug, Default)]
struct Backlog {
    /// Sent but not yet received.
    queued: AtomicUsize,
    /// Workers ready to take a task.
    idle: AtomicUsize,
    /// Tasks whose worker ran to completion.
    processed: AtomicUsize,
    closed: AtomicBool,
    changed: Notify,
}

impl Backlog {
    fn is_drained(&self) -> bool {
        self.closed.load(Ordering::SeqCst) && self.queued.load(Ordering::SeqCst) == 0
    }
}

/// Sending half of a pool's task channel.
///
/// Closing (or dropping) the sender lets the pool finish once the backlog
/// is drained.
pub struct TaskSender<T> {
    tx: StdMutex<Option<mpsc::UnboundedSender<T>>>,
    backlog: Arc<Backlog>,
}

/// Receiving half of a task channel, consumed by [`WorkerPool::run`].
pub struct TaskReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
    backlog: Arc<Backlog>,
}

/// Create a task channel for [`WorkerPool::run`].
pub fn channel<T>() -> (TaskSender<T>, TaskReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let backlog = Arc::new(Backlog::default());
    (
        TaskSender {
            tx: StdMutex::new(Some(tx)),
            backlog: Arc::clone(&backlog),
        },
        TaskReceiver { rx, backlog },
    )
}

impl<T> TaskSender<T> {
    /// Queue a task without blocking. The task comes back if the channel is
    /// closed or its pool has stopped.
    pub fn send(&self, task: T) -> Result<(), T> {
        let tx = lock(&self.tx);
        let Some(sender) = tx.as_ref() else {
            return Err(task);
        };
        self.backlog.queued.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(task)) = sender.send(task) {
            self.backlog.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(task);
        }
        drop(tx);
        self.backlog.changed.notify_one();
        Ok(())
    }

    /// Stop accepting tasks. Idempotent.
    pub fn close(&self) {
        if lock(&self.tx).take().is_some() {
            self.backlog.closed.store(true, Ordering::SeqCst);
            self.backlog.changed.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.backlog.closed.load(Ordering::SeqCst)
    }

    /// Tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.backlog.queued.load(Ordering::SeqCst)
    }

    /// Tasks a worker has finished, successfully or not.
    pub fn processed(&self) -> usize {
        self.backlog.processed.load(Ordering::SeqCst)
    }
}

impl<T> Drop for TaskSender<T> {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Worker pool configuration plus the worker itself.
pub struct WorkerPool<T, W> {
    id: String,
    min_workers: usize,
    max_workers: usize,
    fail_fast: bool,
    worker: Arc<W>,
    escalate: Option<CancellationToken>,
    _tasks: PhantomData<fn(T)>,
}

impl<T, W> WorkerPool<T, W>
where
    T: Send + 'static,
    W: Worker<T>,
{
    /// Build a pool. `min_workers > max_workers` is rejected here rather
    /// than at dispatch time.
    pub fn new(
        id: impl Into<String>,
        min_workers: usize,
        max_workers: usize,
        fail_fast: bool,
        worker: W,
    ) -> Result<Self, JobError> {
        let id = id.into();
        if min_workers > max_workers {
            return Err(JobError::Config {
                job: id,
                message: format!(
                    "min workers ({min_workers}) exceed max workers ({max_workers})"
                ),
            });
        }
        Ok(Self {
            id,
            min_workers,
            max_workers,
            fail_fast,
            worker: Arc::new(worker),
            escalate: None,
            _tasks: PhantomData,
        })
    }

    /// Also cancel `token` when a fail-fast failure stops this pool.
    pub fn cancel_on_failure(mut self, token: CancellationToken) -> Self {
        self.escalate = Some(token);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_adaptive(&self) -> bool {
        self.min_workers < self.max_workers
    }

    /// Run a finite batch of tasks to completion.
    pub async fn dispatch(
        &self,
        token: &CancellationToken,
        tasks: impl IntoIterator<Item = T>,
    ) -> Result<(), JobError> {
        let (sender, receiver) = channel();
        for task in tasks {
            // Fresh channel with a live receiver: sends cannot fail.
            let _ = sender.send(task);
        }
        sender.close();
        self.run(token, receiver).await
    }

    /// [`WorkerPool::dispatch`] bounded by a deadline.
    pub async fn dispatch_timeout(
        &self,
        token: &CancellationToken,
        timeout: Duration,
        tasks: impl IntoIterator<Item = T>,
    ) -> Result<(), JobError> {
        match tokio::time::timeout(timeout, self.dispatch(token, tasks)).await {
            Ok(result) => result,
            Err(_) => Err(JobError::DeadlineExceeded {
                job: self.id.clone(),
            }),
        }
    }

    /// Drain `receiver` until its sender closes and the backlog is empty,
    /// the token is cancelled, or (fail-fast) a worker fails.
    ///
    /// Tasks left in the channel when the pool stops are dropped.
    #[instrument(skip_all, fields(job = %self.id))]
    pub async fn run(
        &self,
        token: &CancellationToken,
        receiver: TaskReceiver<T>,
    ) -> Result<(), JobError> {
        let TaskReceiver { rx, backlog } = receiver;
        let shared = Arc::new(Shared {
            job: self.id.clone(),
            worker: Arc::clone(&self.worker),
            rx: Mutex::new(rx),
            backlog,
            stop: token.child_token(),
            escalate: self.escalate.clone(),
            fail_fast: self.fail_fast,
            failures: StdMutex::new(Vec::new()),
        });

        let core = if self.is_adaptive() {
            self.min_workers
        } else {
            self.max_workers
        };
        let extra = Arc::new(Semaphore::new(self.max_workers - core));
        let mut workers = JoinSet::new();
        for _ in 0..core {
            workers.spawn(core_worker(Arc::clone(&shared)));
        }
        debug!(
            core,
            max = self.max_workers,
            adaptive = self.is_adaptive(),
            "worker pool started"
        );

        loop {
            if shared.stop.is_cancelled() {
                break;
            }
            grow(&shared, &extra, &mut workers);
            if workers.is_empty() && shared.backlog.is_drained() {
                break;
            }
            tokio::select! {
                _ = shared.stop.cancelled() => break,
                _ = shared.backlog.changed.notified() => {}
                Some(_) = workers.join_next() => {}
            }
        }

        workers.abort_all();
        while workers.join_next().await.is_some() {}
        shared.discard_backlog().await;

        let failures = std::mem::take(&mut *lock(&shared.failures));
        debug!(
            processed = shared.backlog.processed.load(Ordering::SeqCst),
            failures = failures.len(),
            "worker pool stopped"
        );

        if self.fail_fast {
            if let Some(first) = failures.into_iter().next() {
                return Err(JobError::Worker(first));
            }
        } else if !failures.is_empty() && !token.is_cancelled() {
            return Err(JobError::Aggregate(failures));
        }
        if token.is_cancelled() {
            return Err(JobError::Cancelled {
                job: self.id.clone(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

struct Shared<T, W> {
    job: String,
    worker: Arc<W>,
    rx: Mutex<mpsc::UnboundedReceiver<T>>,
    backlog: Arc<Backlog>,
    stop: CancellationToken,
    escalate: Option<CancellationToken>,
    fail_fast: bool,
    failures: StdMutex<Vec<WorkerError>>,
}

impl<T, W> Shared<T, W>
where
    T: Send + 'static,
    W: Worker<T>,
{
    /// Wait for the next task; `None` once the channel is closed and empty.
    async fn next_task(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        let task = rx.recv().await;
        if task.is_some() {
            self.backlog.queued.fetch_sub(1, Ordering::SeqCst);
        }
        task
    }

    /// Take a task only if one is already queued.
    async fn try_next_task(&self) -> Option<T> {
        let mut rx = tokio::select! {
            _ = self.stop.cancelled() => return None,
            rx = self.rx.lock() => rx,
        };
        let task = rx.try_recv().ok();
        if task.is_some() {
            self.backlog.queued.fetch_sub(1, Ordering::SeqCst);
        }
        task
    }

    async fn execute(&self, task: T) {
        let work = AssertUnwindSafe(self.worker.work(&self.stop, task)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = self.stop.cancelled() => return,
            outcome = work => outcome,
        };
        self.backlog.processed.fetch_add(1, Ordering::SeqCst);

        let result = outcome.unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(WorkerError::panicked(&self.job, &message))
        });
        if let Err(error) = result {
            self.record(error);
        }
    }

    fn record(&self, error: WorkerError) {
        debug!(job = %self.job, code = error.code(), error = %error, "task failed");
        let mut failures = lock(&self.failures);
        if !self.fail_fast {
            failures.push(error);
            return;
        }
        if failures.is_empty() {
            failures.push(error);
        }
        drop(failures);
        self.stop.cancel();
        if let Some(escalate) = &self.escalate {
            escalate.cancel();
        }
    }

    /// Close the channel and drop whatever is still queued.
    async fn discard_backlog(&self) {
        let mut rx = self.rx.lock().await;
        rx.close();
        let mut discarded = 0usize;
        while rx.try_recv().is_ok() {
            self.backlog.queued.fetch_sub(1, Ordering::SeqCst);
            discarded += 1;
        }
        if discarded > 0 {
            debug!(job = %self.job, discarded, "dropped queued tasks");
        }
    }
}

/// Long-lived worker: blocks on the channel until it closes.
async fn core_worker<T, W>(shared: Arc<Shared<T, W>>)
where
    T: Send + 'static,
    W: Worker<T>,
{
    loop {
        shared.backlog.idle.fetch_add(1, Ordering::SeqCst);
        let next = tokio::select! {
            _ = shared.stop.cancelled() => None,
            task = shared.next_task() => task,
        };
        shared.backlog.idle.fetch_sub(1, Ordering::SeqCst);

        let Some(task) = next else { return };
        shared.execute(task).await;
    }
}

/// Short-lived worker: exits as soon as the channel has nothing queued.
/// Counted idle by whoever spawns it.
async fn elastic_worker<T, W>(shared: Arc<Shared<T, W>>, _permit: OwnedSemaphorePermit)
where
    T: Send + 'static,
    W: Worker<T>,
{
    loop {
        let next = if shared.stop.is_cancelled() {
            None
        } else {
            shared.try_next_task().await
        };
        shared.backlog.idle.fetch_sub(1, Ordering::SeqCst);

        let Some(task) = next else { return };
        shared.execute(task).await;
        shared.backlog.idle.fetch_add(1, Ordering::SeqCst);
    }
}

/// Spawn elastic workers while queued tasks outnumber idle workers.
fn grow<T, W>(shared: &Arc<Shared<T, W>>, extra: &Arc<Semaphore>, workers: &mut JoinSet<()>)
where
    T: Send + 'static,
    W: Worker<T>,
{
    while shared.backlog.queued.load(Ordering::SeqCst) > shared.backlog.idle.load(Ordering::SeqCst)
    {
        let Ok(permit) = Arc::clone(extra).try_acquire_owned() else {
            break;
        };
        shared.backlog.idle.fetch_add(1, Ordering::SeqCst);
        workers.spawn(elastic_worker(Arc::clone(shared), permit));
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
