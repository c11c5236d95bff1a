//! Single-consumer FIFO executor for sync work.

use crate::error::{SyncError, SyncResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

enum Job {
    Run(Task),
    /// Flush sentinel; not counted as pending.
    Flush(oneshot::Sender<()>),
}

/// Runs submitted tasks one at a time, in submission order.
///
/// Any thread may submit. A single worker spawned on the tokio runtime drains
/// the queue, awaiting each task to completion before starting the next.
///
/// # Invariants
///
/// - Tasks start in the order `submit` was called, across all producers
/// - At most one task runs at any moment
/// - A task that never completes stalls every task queued behind it
/// - Awaiting [`TaskQueue::flush`] from inside a task deadlocks
pub struct TaskQueue {
    sender: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
}

impl TaskQueue {
    /// Creates a queue whose worker runs on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoRuntime`] when called outside a runtime.
    pub fn new() -> SyncResult<Self> {
        let handle = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        Ok(Self::with_handle(&handle))
    }

    /// Creates a queue whose worker runs on `handle`.
    pub fn with_handle(handle: &Handle) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&pending);
        handle.spawn(async move {
            while let Some(job) = receiver.recv().await {
                match job {
                    Job::Run(task) => {
                        task.await;
                        counter.fetch_sub(1, Ordering::SeqCst);
                    }
                    Job::Flush(done) => {
                        // The flusher may have given up waiting.
                        let _ = done.send(());
                    }
                }
            }
            debug!("task queue drained and closed");
        });

        Self { sender, pending }
    }

    /// Enqueues `task` without waiting for it.
    pub fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(Job::Run(Box::pin(task))).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("task queue worker has stopped; task dropped");
        }
    }

    /// Waits until every task submitted before this call has finished.
    ///
    /// Implemented by queueing a sentinel that signals completion, so tasks
    /// submitted after the call do not extend the wait.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.sender.send(Job::Flush(done_tx)).is_err() {
            return;
        }
        // An error means the worker is gone; nothing is left to wait for.
        let _ = done_rx.await;
    }

    /// Returns the number of tasks queued or running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[test]
    fn requires_runtime() {
        assert!(matches!(TaskQueue::new(), Err(SyncError::NoRuntime)));
    }

    #[test]
    fn explicit_handle_outside_runtime_context() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let queue = TaskQueue::with_handle(runtime.handle());
        let log = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&log);
        queue.submit(async move { sink.lock().push(1) });
        runtime.block_on(queue.flush());

        assert_eq!(*log.lock(), vec![1]);
    }

    #[tokio::test]
    async fn runs_in_submission_order() {
        let queue = TaskQueue::new().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let sink = Arc::clone(&log);
            queue.submit(async move {
                if i % 7 == 0 {
                    tokio::task::yield_now().await;
                }
                sink.lock().push(i);
            });
        }
        queue.flush().await;

        assert_eq!(*log.lock(), (0..100).collect::<Vec<_>>());
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn one_task_at_a_time() {
        let queue = TaskQueue::new().unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let running = Arc::clone(&running);
            let overlap = Arc::clone(&overlap);
            queue.submit(async move {
                if running.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlap.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }
        queue.flush().await;

        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn producers_on_many_threads() {
        let queue = Arc::new(TaskQueue::new().unwrap());
        let log = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..4)
            .map(|producer| {
                let queue = Arc::clone(&queue);
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let sink = Arc::clone(&log);
                        queue.submit(async move { sink.lock().push((producer, i)) });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        queue.flush().await;

        let log = log.lock();
        assert_eq!(log.len(), 200);
        for producer in 0..4 {
            let seen: Vec<_> = log
                .iter()
                .filter(|(p, _)| *p == producer)
                .map(|(_, i)| *i)
                .collect();
            assert_eq!(seen, (0..50).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn flush_waits_only_for_earlier_tasks() {
        let queue = Arc::new(TaskQueue::new().unwrap());
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let finished = Arc::new(AtomicUsize::new(0));

        let done = Arc::clone(&finished);
        queue.submit(async move {
            let _ = release_rx.await;
            done.fetch_add(1, Ordering::SeqCst);
        });

        let flusher = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.flush().await })
        };

        tokio::task::yield_now().await;
        assert!(!flusher.is_finished());

        release_tx.send(()).unwrap();
        flusher.await.unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(32))]

        #[test]
        fn fifo_under_arbitrary_yields(yields in proptest::collection::vec(0u8..4, 1..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let queue = TaskQueue::with_handle(runtime.handle());
            let log = Arc::new(Mutex::new(Vec::new()));

            for (i, count) in yields.iter().copied().enumerate() {
                let sink = Arc::clone(&log);
                queue.submit(async move {
                    for _ in 0..count {
                        tokio::task::yield_now().await;
                    }
                    sink.lock().push(i);
                });
            }
            runtime.block_on(queue.flush());

            proptest::prop_assert_eq!(log.lock().clone(), (0..yields.len()).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn flush_on_empty_queue_returns() {
        let queue = TaskQueue::new().unwrap();
        queue.flush().await;
        assert_eq!(queue.pending(), 0);
    }
}
