// Worker pool: at most `max_workers` handlers in flight, joined before returning

use crate::errors::PipelineError;
use crate::models::{RemoteFile, RunReport};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Anything the pool can log by a short identifying label
pub trait WorkItem: Send + 'static {
    fn label(&self) -> String;
}

impl WorkItem for RemoteFile {
    fn label(&self) -> String {
        self.remote_path.clone()
    }
}

/// Object keys
impl WorkItem for String {
    fn label(&self) -> String {
        self.clone()
    }
}

/// How a handler finished cleanly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// Nothing to do, e.g. the file was already processed
    Skipped,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct WorkerPool {
    name: &'static str,
    max_workers: usize,
}

impl WorkerPool {
    pub fn new(name: &'static str, max_workers: usize) -> Self {
        Self {
            name,
            max_workers: max_workers.max(1),
        }
    }

    /// Concurrency bound, never zero
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run `handler` for every item received on `rx`
    ///
    /// A permit is taken before each item is pulled, so no more than
    /// `max_workers` handlers run at once however many items are queued.
    /// Errors and panics are logged with the item's label and count as
    /// failures; only `Ok` returns count as successes. Returns once `rx` is
    /// closed (or `cancel` fires) and every started handler has finished.
    #[instrument(skip_all, fields(pool = self.name, max_workers = self.max_workers))]
    pub async fn run<T, F, Fut>(
        &self,
        mut rx: mpsc::Receiver<T>,
        cancel: CancellationToken,
        handler: F,
    ) -> RunReport
    where
        T: WorkItem,
        F: Fn(T, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Outcome, PipelineError>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let succeeded = Arc::new(AtomicUsize::new(0));
        let skipped = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(handler);
        let mut tasks = JoinSet::new();
        let mut dispatched = 0;

        loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            dispatched += 1;
            let label = item.label();
            let handler = Arc::clone(&handler);
            let succeeded = Arc::clone(&succeeded);
            let skipped = Arc::clone(&skipped);
            let cancel = cancel.clone();
            let pool = self.name;

            tasks.spawn(async move {
                let _permit = permit;
                let result = AssertUnwindSafe(async move { handler(item, cancel).await })
                    .catch_unwind()
                    .await;

                match result {
                    Ok(Ok(outcome)) => {
                        succeeded.fetch_add(1, Ordering::SeqCst);
                        if outcome == Outcome::Skipped {
                            skipped.fetch_add(1, Ordering::SeqCst);
                        }
                        debug!(pool = pool, item = %label, outcome = ?outcome, "Work item finished");
                    }
                    Ok(Err(e)) => {
                        error!(pool = pool, item = %label, error = %e, "Work item failed");
                    }
                    Err(panic) => {
                        error!(
                            pool = pool,
                            item = %label,
                            panic = %panic_message(panic.as_ref()),
                            "Work item panicked"
                        );
                    }
                }
            });
        }

        if cancel.is_cancelled() {
            info!(pool = self.name, "Cancelled, waiting for in-flight items");
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(pool = self.name, error = %e, "Worker task aborted");
            }
        }

        let report = RunReport {
            dispatched,
            succeeded: succeeded.load(Ordering::SeqCst),
            skipped: skipped.load(Ordering::SeqCst),
        };

        info!(
            pool = self.name,
            dispatched = report.dispatched,
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failed(),
            "Worker pool drained"
        );

        report
    }
}
