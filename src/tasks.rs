// ============================================================================
// Background Tasks - tracked secondary work
// ============================================================================
//
// Secondary writes (rate-limit audit records) run after the response path
// but must not be lost: every task is held in a JoinSet and awaited on
// shutdown. Finished tasks are reaped on each spawn so the set stays small.
//
// ============================================================================

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinSet;

#[derive(Default)]
pub struct BackgroundTasks {
    set: Mutex<JoinSet<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a tracked task
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.set.lock();
        Self::reap(&mut set);
        set.spawn(async move {
            future.await;
            tracing::trace!(task = name, "Background task finished");
        });
    }

    /// Tasks spawned and not yet reaped
    pub fn len(&self) -> usize {
        let mut set = self.set.lock();
        Self::reap(&mut set);
        set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn reap(set: &mut JoinSet<()>) {
        while let Some(result) = set.try_join_next() {
            if let Err(e) = result
                && e.is_panic()
            {
                tracing::error!(error = %e, "Background task panicked");
            }
        }
    }

    /// Await every outstanding task for at most `grace`, then abort the rest.
    /// Returns how many tasks had to be aborted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let mut set = std::mem::take(&mut *self.set.lock());
        let outstanding = set.len();
        if outstanding == 0 {
            return 0;
        }

        tracing::info!(tasks = outstanding, "Waiting for background tasks");

        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = set.join_next().await {
                if let Err(e) = result
                    && e.is_panic()
                {
                    tracing::error!(error = %e, "Background task panicked");
                }
            }
        })
        .await;

        if drained.is_err() {
            let aborted = set.len();
            tracing::warn!(
                aborted = aborted,
                grace_secs = grace.as_secs(),
                "Background tasks did not finish in time, aborting"
            );
            set.abort_all();
            return aborted;
        }

        0
    }
}
