//! Bounded-concurrency task pool.
//!
//! At most `max_in_flight` tasks run at once; further tasks wait for a permit.
//! Results come back in submission order.

use crate::error::{EngineError, EngineResult};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Fixed-size worker pool over tokio tasks.
#[derive(Debug, Clone)]
pub struct TaskPool {
    semaphore: Arc<Semaphore>,
    max_in_flight: usize,
}

impl TaskPool {
    /// Pool running at most `max_in_flight` tasks (at least one).
    #[must_use]
    pub fn new(max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    /// Concurrency limit.
    #[must_use]
    pub const fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Run every task and return their outputs in submission order.
    ///
    /// A failing task does not cancel its siblings.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Task`] when a task panics or the pool is closed.
    pub async fn run_all<F, T>(&self, tasks: Vec<F>) -> EngineResult<Vec<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let total = tasks.len();
        let mut workers: JoinSet<(usize, T)> = JoinSet::new();
        for (idx, task) in tasks.into_iter().enumerate() {
            let permit = Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|err| EngineError::Task(err.to_string()))?;
            workers.spawn(async move {
                let _permit = permit;
                (idx, task.await)
            });
        }

        let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(total).collect();
        let mut failure: Option<String> = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((idx, output)) => {
                    if let Some(slot) = slots.get_mut(idx) {
                        *slot = Some(output);
                    }
                }
                Err(err) => {
                    log::warn!("Pool task failed: {err}");
                    failure.get_or_insert_with(|| err.to_string());
                }
            }
        }
        if let Some(message) = failure {
            return Err(EngineError::Task(message));
        }
        Ok(slots.into_iter().flatten().collect())
    }

    /// Run a blocking closure on the blocking thread pool, under a permit.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Task`] when the closure panics.
    pub async fn run_blocking<F, T>(&self, work: F) -> EngineResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|err| EngineError::Task(err.to_string()))?;
        tokio::task::spawn_blocking(work)
            .await
            .map_err(|err| EngineError::Task(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_limit_and_order() -> Result<(), Box<dyn std::error::Error>> {
        let pool = TaskPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..6_u64)
            .map(|n| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10 * (6 - n))).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    n
                }
            })
            .collect();

        let out = pool.run_all(tasks).await?;
        assert_eq!(out, vec![0, 1, 2, 3, 4, 5]);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        Ok(())
    }
}
