use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Semaphore};

/// Default bound on concurrent detail-page fetches.
pub const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 8;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Verification task panicked: {0}")]
    Panicked(String),
    #[error("Verification task was cancelled")]
    Cancelled,
}

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Bounded pool shared by every in-flight filter request.
///
/// Submissions go down one queue drained by a single dispatcher, which takes a
/// permit for each job in the order it was submitted before spawning it. Jobs
/// therefore start in FIFO order whatever runtime flavor is in use, and no
/// single feed can starve another. A queued job does not depend on its
/// caller: if the request that submitted it goes away, the check still
/// completes and its verdict still lands in the decision cache.
#[derive(Clone)]
pub struct VerificationScheduler {
    jobs: mpsc::UnboundedSender<Job>,
    /// Receiving end, held until the first submission starts the dispatcher.
    idle: Arc<Mutex<Option<mpsc::UnboundedReceiver<Job>>>>,
    permits: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
}

impl Default for VerificationScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_CHECKS)
    }
}

impl VerificationScheduler {
    /// A capacity of 0 is raised to 1.
    ///
    /// Does not need a runtime; the dispatcher is spawned on first use.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (jobs, queue) = mpsc::unbounded_channel();
        Self {
            jobs,
            idle: Arc::new(Mutex::new(Some(queue))),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tasks currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Queues `task` and returns a future resolving with its output.
    ///
    /// The task is queued when `submit` is called, not when the returned
    /// future is first polled. Dropping the returned future does not cancel
    /// the task.
    pub fn submit<F, T>(&self, task: F) -> impl Future<Output = Result<T, SchedulerError>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done, result) = oneshot::channel();
        let in_flight = Arc::clone(&self.in_flight);

        let job: Job = Box::pin(async move {
            let output = {
                in_flight.fetch_add(1, Ordering::Relaxed);
                let _guard = InFlightGuard(in_flight);
                AssertUnwindSafe(task)
                    .catch_unwind()
                    .await
                    .map_err(|payload| SchedulerError::Panicked(panic_message(payload.as_ref())))
            };
            // The caller may have gone away; the work is done either way.
            let _ = done.send(output);
        });

        let queued = self.start_dispatcher() && self.jobs.send(job).is_ok();

        async move {
            if !queued {
                return Err(SchedulerError::Cancelled);
            }
            result.await.unwrap_or(Err(SchedulerError::Cancelled))
        }
    }

    /// Spawns the dispatcher onto the current runtime if it is not running yet.
    fn start_dispatcher(&self) -> bool {
        let mut idle = self.idle.lock();
        let Some(queue) = idle.take() else {
            return true;
        };
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(dispatch(queue, Arc::clone(&self.permits)));
                true
            }
            Err(_) => {
                tracing::error!("Verification submitted outside a tokio runtime");
                *idle = Some(queue);
                false
            }
        }
    }
}

/// Hands out permits strictly in queue order.
async fn dispatch(mut queue: mpsc::UnboundedReceiver<Job>, permits: Arc<Semaphore>) {
    while let Some(job) = queue.recv().await {
        // The semaphore is never closed.
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        tokio::spawn(async move {
            let _permit = permit;
            job.await;
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::time::Duration;

    #[tokio::test]
    async fn test_submit_returns_output() {
        let scheduler = VerificationScheduler::new(2);
        let value = scheduler.submit(async { 21 * 2 }).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_never_exceeds_capacity() {
        let scheduler = VerificationScheduler::new(2);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..20).map(|_| {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            scheduler.submit(async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            })
        });
        let results = join_all(tasks).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waiting_tasks_start_in_submission_order() {
        let scheduler = VerificationScheduler::new(1);
        let (release, hold) = oneshot::channel::<()>();
        let blocker = tokio::spawn(scheduler.submit(async move {
            let _ = hold.await;
        }));

        let order = Arc::new(Mutex::new(Vec::new()));
        let waiting: Vec<_> = (0..40)
            .map(|i| {
                let order = Arc::clone(&order);
                tokio::spawn(scheduler.submit(async move {
                    order.lock().push(i);
                }))
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(order.lock().is_empty());
        release.send(()).unwrap();

        blocker.await.unwrap().unwrap();
        for task in waiting {
            task.await.unwrap().unwrap();
        }
        assert_eq!(*order.lock(), (0..40).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_task_finishes_after_caller_drops() {
        let scheduler = VerificationScheduler::new(1);
        let (done, finished) = oneshot::channel();

        drop(scheduler.submit(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = done.send(7);
        }));

        assert_eq!(finished.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_clones_share_the_bound() {
        let first = VerificationScheduler::new(1);
        let second = first.clone();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let task = |current: Arc<AtomicUsize>, peak: Arc<AtomicUsize>| async move {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            current.fetch_sub(1, Ordering::SeqCst);
        };

        let (a, b) = tokio::join!(
            first.submit(task(Arc::clone(&current), Arc::clone(&peak))),
            second.submit(task(Arc::clone(&current), Arc::clone(&peak))),
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let scheduler = VerificationScheduler::new(1);
        let result = scheduler
            .submit(async {
                panic!("detail page exploded");
            })
            .await;
        match result {
            Err(SchedulerError::Panicked(message)) => assert_eq!(message, "detail page exploded"),
            other => panic!("expected a panic error, got {other:?}"),
        }

        // The permit was released despite the panic.
        assert_eq!(scheduler.submit(async { 1 }).await.unwrap(), 1);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_zero_capacity_raised_to_one() {
        let scheduler = VerificationScheduler::new(0);
        assert_eq!(scheduler.capacity(), 1);
        assert!(scheduler.submit(async {}).await.is_ok());
    }

    #[test]
    fn test_submit_outside_runtime_is_cancelled() {
        let scheduler = VerificationScheduler::new(1);
        let result = futures::executor::block_on(scheduler.submit(async { 1 }));
        assert!(matches!(result, Err(SchedulerError::Cancelled)));
    }
}
