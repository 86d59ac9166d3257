//! Outstanding-work counter shared by several job queues.

use std::sync::Arc;

use tokio::sync::watch;

/// Counts tasks accepted but not yet finished, across any number of queues.
///
/// [`WaitGroup::add`] hands out a [`WaitGuard`]; the count drops when the
/// guard does, whether the task ran, failed or was discarded.
#[derive(Debug, Clone)]
pub struct WaitGroup {
    count: Arc<watch::Sender<usize>>,
}

impl WaitGroup {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            count: Arc::new(count),
        }
    }

    #[must_use = "the task is finished as soon as the guard is dropped"]
    pub fn add(&self) -> WaitGuard {
        self.count.send_modify(|count| *count += 1);
        WaitGuard {
            count: Arc::clone(&self.count),
        }
    }

    pub fn pending(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolve once the count reaches zero.
    pub async fn wait(&self) {
        let mut zero = self.count.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = zero.wait_for(|count| *count == 0).await;
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks one unit of outstanding work.
#[derive(Debug)]
pub struct WaitGuard {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.count
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}
