//! Bounded concurrency pool: the execution surface every dispatched task runs on.
//!
//! Generalizes the teacher's resource-unit accounting
//! (`core::resource_pool::ResourcePool`) from "N resource units" down to
//! "N concurrent slots", since tasks here carry no per-task cost metric.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::error::{PoolError, TaskError};

/// The result of one spawned unit of work, as seen by the caller that awaits drain.
pub type UnitResult = Result<(), TaskError>;

enum PoolPhase {
    Open,
    Closing,
    Closed,
}

struct PoolInner {
    /// `None` when the pool is unbounded (`concurrency = -1` on the wire).
    semaphore: Option<Arc<Semaphore>>,
    phase: std::sync::Mutex<PoolPhase>,
    in_flight: AtomicUsize,
    closing: AtomicBool,
}

/// A bounded set of in-flight task executions.
///
/// Lifecycle: `Open` (spawning allowed) -> `Closing` (drain in-flight, no new
/// spawns) -> `Closed`.
pub struct ConcurrencyPool {
    inner: Arc<PoolInner>,
    default_timeout: Duration,
    tasks: tokio::sync::Mutex<JoinSet<UnitResult>>,
}

impl std::fmt::Debug for ConcurrencyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyPool")
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl ConcurrencyPool {
    /// Create a pool. `concurrency = None` means unbounded (wire value `-1`).
    pub fn new(concurrency: Option<usize>, default_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                semaphore: concurrency.map(|n| Arc::new(Semaphore::new(n))),
                phase: std::sync::Mutex::new(PoolPhase::Open),
                in_flight: AtomicUsize::new(0),
                closing: AtomicBool::new(false),
            }),
            default_timeout,
            tasks: tokio::sync::Mutex::new(JoinSet::new()),
        }
    }

    /// Current count of in-flight executions.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    fn is_open(&self) -> bool {
        matches!(*self.inner.phase.lock().unwrap(), PoolPhase::Open)
    }

    /// Start a unit of work without waiting for capacity; fails immediately if
    /// the pool is at capacity or closed.
    pub async fn spawn<F>(&self, timeout: Option<Duration>, work: F) -> Result<(), PoolError>
    where
        F: Future<Output = UnitResult> + Send + 'static,
    {
        if !self.is_open() {
            return Err(PoolError::PoolClosed);
        }
        let permit = match &self.inner.semaphore {
            Some(sem) => match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => return Err(PoolError::PoolFull),
            },
            None => None,
        };
        self.spawn_guarded(timeout, permit, work).await;
        Ok(())
    }

    /// Start a unit of work, cooperatively waiting until capacity is available.
    pub async fn wait_spawn<F>(&self, timeout: Option<Duration>, work: F) -> Result<(), PoolError>
    where
        F: Future<Output = UnitResult> + Send + 'static,
    {
        if !self.is_open() {
            return Err(PoolError::PoolClosed);
        }
        let permit = match &self.inner.semaphore {
            Some(sem) => {
                let sem = sem.clone();
                match sem.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return Err(PoolError::PoolClosed),
                }
            }
            None => None,
        };
        // Re-check: the pool may have closed while we were waiting for a permit.
        if !self.is_open() {
            return Err(PoolError::PoolClosed);
        }
        self.spawn_guarded(timeout, permit, work).await;
        Ok(())
    }

    async fn spawn_guarded<F>(
        &self,
        timeout: Option<Duration>,
        permit: Option<tokio::sync::OwnedSemaphorePermit>,
        work: F,
    ) where
        F: Future<Output = UnitResult> + Send + 'static,
    {
        let deadline = timeout.unwrap_or(self.default_timeout);
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let mut tasks = self.tasks.lock().await;
        tasks.spawn(async move {
            let result = match tokio::time::timeout(deadline, work).await {
                Ok(result) => result,
                Err(_) => Err(TaskError::Timeout),
            };
            drop(permit);
            inner.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        });
    }

    /// Refuse new spawns and wait until every in-flight unit has terminated.
    pub async fn wait_close(&self) {
        *self.inner.phase.lock().unwrap() = PoolPhase::Closing;
        self.inner.closing.store(true, Ordering::SeqCst);
        let mut tasks = self.tasks.lock().await;
        while tasks.join_next().await.is_some() {}
        *self.inner.phase.lock().unwrap() = PoolPhase::Closed;
    }

    /// Refuse new spawns and abort every in-flight unit without waiting.
    pub async fn force_close(&self) {
        *self.inner.phase.lock().unwrap() = PoolPhase::Closed;
        let mut tasks = self.tasks.lock().await;
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        self.inner.in_flight.store(0, Ordering::SeqCst);
    }
}
