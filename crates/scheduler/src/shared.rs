use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::SchedulerError;

/// Bounded pool for work that is not tied to one user: identity checks,
/// user-removal bookkeeping and storage statistics.
#[derive(Clone, Debug)]
pub struct SharedExecutor {
    handle: Handle,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl SharedExecutor {
    pub fn new(handle: Handle, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn spawn<F, R>(&self, job: F) -> JoinHandle<Result<R, SchedulerError>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.handle.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| SchedulerError::Internal("shared executor closed".into()))?;
            tokio::task::spawn_blocking(job)
                .await
                .map_err(|err| SchedulerError::Internal(format!("shared task failed: {err}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrency_is_bounded_by_worker_count() {
        let shared = SharedExecutor::new(Handle::current(), 2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(shared.spawn(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn panicking_job_surfaces_as_internal_error() {
        let shared = SharedExecutor::new(Handle::current(), 1);
        let outcome = shared.spawn(|| -> u32 { panic!("bad job") }).await.unwrap();
        assert!(matches!(outcome, Err(SchedulerError::Internal(_))));
    }
}
