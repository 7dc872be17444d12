use std::future::Future;

use tokio::sync::Semaphore;

/// Caps how many tasks run at once. Waiting tasks are admitted in the order they arrived. This
/// only bounds concurrency; it doesn't protect any data.
pub struct ConcurrencyLimiter {
    permits: Semaphore,
    limit: usize,
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            permits: Semaphore::new(limit),
            limit,
        }
    }

    /// Waits for a free slot, then runs the task. The slot is released when the task finishes,
    /// however it finishes.
    pub async fn run<F: Future>(&self, task: F) -> F::Output {
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("the limiter never closes its semaphore");
        task.await
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn test_never_exceeds_limit() {
        let limiter = Arc::new(ConcurrencyLimiter::new(2));
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let limiter = limiter.clone();
            let running = running.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .run(async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 2);
        assert_eq!(limiter.available(), limiter.limit());
    }

    #[tokio::test]
    async fn test_queued_tasks_run_in_order() {
        let limiter = Arc::new(ConcurrencyLimiter::new(1));
        let order = Arc::new(Mutex::new(Vec::new()));

        let (release, released) = oneshot::channel::<()>();
        let blocker = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter
                    .run(async move {
                        let _ = released.await;
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(limiter.available(), 0);

        let mut handles = Vec::new();
        for i in 0..4 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter.run(async { order.lock().unwrap().push(i) }).await
            }));
            // Let the task reach the queue before spawning the next one
            tokio::task::yield_now().await;
        }
        assert!(order.lock().unwrap().is_empty());

        release.send(()).unwrap();
        blocker.await.unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failures_release_the_slot() {
        let limiter = Arc::new(ConcurrencyLimiter::new(1));

        let result: Result<(), &str> = limiter.run(async { Err("boom") }).await;
        assert!(result.is_err());
        assert_eq!(limiter.available(), 1);

        let panicking = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter
                    .run(async {
                        panic!("task blew up");
                    })
                    .await
            })
        };
        assert!(panicking.await.is_err());
        assert_eq!(limiter.available(), 1);

        assert_eq!(limiter.run(async { 42 }).await, 42);
    }
}
