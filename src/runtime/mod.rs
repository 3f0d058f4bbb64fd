//! Worker runtime: process model, signal handling, heartbeat/ready files,
//! and graceful drain (`spec.md` §4.4).
//!
//! The master/worker split follows `examples/original_source/oxalis/base.py`
//! (`run_worker_master`, `run_worker`, `close`): a master installs signal
//! handlers and forks `worker_num` children; each child runs an independent
//! event loop and is torn down through `on_worker_init` -> `connect` ->
//! `_run_worker` -> `work` -> shutdown -> `on_worker_close`. Python's `fork()`
//! has no safe equivalent once a Tokio runtime is live, so a worker child
//! here is a re-exec of the current executable with an internal marker
//! environment variable rather than a literal fork — recorded as an Open
//! Question resolution in `DESIGN.md`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::config::RuntimeSettings;
use crate::core::ConcurrencyPool;
use crate::util::now_secs;

/// Internal marker env var distinguishing a re-exec'd worker child from the
/// master process.
pub const WORKER_MARKER_ENV: &str = "OXALIS_WORKER_CHILD";

/// Per-process worker state shared between the signal handler, the
/// heartbeat loop, and the shutdown sequence (`spec.md` §3 "Worker process
/// state").
pub struct WorkerState {
    running: AtomicBool,
    is_worker: AtomicBool,
    consuming_count: Arc<AtomicUsize>,
    close_signal_count: AtomicUsize,
    health: AtomicBool,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl WorkerState {
    pub fn new(is_worker: bool) -> Arc<Self> {
        let (shutdown_tx, _rx) = tokio::sync::watch::channel(false);
        Arc::new(Self {
            running: AtomicBool::new(true),
            is_worker: AtomicBool::new(is_worker),
            consuming_count: Arc::new(AtomicUsize::new(0)),
            close_signal_count: AtomicUsize::new(0),
            health: AtomicBool::new(true),
            shutdown_tx,
        })
    }

    pub fn is_worker(&self) -> bool {
        self.is_worker.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn consuming_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.consuming_count)
    }

    pub fn subscribe_shutdown(&self) -> tokio::sync::watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Handle one interrupt/terminate signal: the first is a no-op outside of
    /// flipping `running`; the second escalates to a force close. A no-op
    /// entirely if this process is not a worker — the master only joins
    /// children (`spec.md` §4.4 "The close handler is a no-op...").
    pub fn handle_signal(self: &Arc<Self>) -> bool {
        if !self.is_worker() {
            return false;
        }
        let count = self.close_signal_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
        let force = count >= 2;
        if force {
            warn!("second shutdown signal received; forcing close");
        } else {
            info!("graceful shutdown signal received");
        }
        force
    }
}

/// Hooks a worker app extends; defaults are no-ops (`spec.md` §4.4).
#[async_trait]
pub trait WorkerApp: Send + Sync {
    /// Establish transport connections and declare topology.
    async fn connect(&self) -> Result<(), anyhow::Error>;
    /// Start per-queue or per-topic-group consumer activities.
    async fn run_worker(&self) -> Result<(), anyhow::Error>;
    /// Stop accepting new deliveries (cancel consumer tags / exit poll loops).
    async fn stop_intake(&self);
    /// Drain every pool owned by this app.
    async fn drain_pools(&self);
    /// Close transport connections.
    async fn disconnect(&self);
    /// Abort in-flight executions unconditionally (force-close path).
    async fn force_close_pools(&self);

    /// Per-process setup hook; default no-op.
    async fn on_worker_init(&self) {}
    /// Per-process teardown hook; default no-op.
    async fn on_worker_close(&self) {}
}

/// Write `path` with the current epoch seconds.
fn write_liveness_file(path: &Path, now: u64) {
    if let Err(error) = std::fs::write(path, now.to_string()) {
        warn!(?path, %error, "failed to write liveness file");
    }
}

/// Best-effort delete of a liveness file.
fn remove_liveness_file(path: &Path) {
    if let Err(error) = std::fs::remove_file(path) {
        if error.kind() != std::io::ErrorKind::NotFound {
            warn!(?path, %error, "failed to remove liveness file");
        }
    }
}

/// Run one worker's full lifecycle: init, connect, run, heartbeat loop until
/// shutdown, drain, disconnect, close hook (`spec.md` §4.4 steps 1-6).
pub async fn run_worker(app: Arc<dyn WorkerApp>, state: Arc<WorkerState>, settings: &RuntimeSettings) -> Result<(), anyhow::Error> {
    crate::util::init_tracing();
    app.on_worker_init().await;
    app.connect().await?;
    app.run_worker().await?;

    write_liveness_file(&settings.ready_file_path, now_secs());
    info!(path = ?settings.ready_file_path, "worker ready");

    let mut shutdown = state.subscribe_shutdown();
    let mut ticker = tokio::time::interval(settings.default_timeout());
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if state.health.load(Ordering::SeqCst) {
                    write_liveness_file(&settings.heartbeat_file_path, now_secs());
                }
            }
        }
    }

    shutdown_sequence(app.as_ref(), state.consuming_count(), settings).await;
    Ok(())
}

/// Steps 5a-5e: stop intake, wait for `consuming_count` to drain
/// (`spec.md` §4.4 `wait_close`), close transports, delete liveness files.
pub async fn shutdown_sequence(
    app: &dyn WorkerApp,
    consuming_count: Arc<AtomicUsize>,
    settings: &RuntimeSettings,
) {
    app.stop_intake().await;
    wait_for_consuming_count_zero(consuming_count, settings.default_timeout()).await;
    app.drain_pools().await;
    app.disconnect().await;
    remove_liveness_file(&settings.ready_file_path);
    remove_liveness_file(&settings.heartbeat_file_path);
    app.on_worker_close().await;
    info!("worker shut down gracefully");
}

/// Force-close path for the second interrupt/terminate signal: abort
/// in-flight executions and exit immediately, accepting lost unacked
/// deliveries (`spec.md` §4.4 "Signal semantics").
pub async fn force_close(app: Arc<dyn WorkerApp>) -> ! {
    warn!("force closing; unacked deliveries may be lost");
    app.force_close_pools().await;
    std::process::exit(1);
}

/// Install SIGINT/SIGTERM handlers that drive `state`'s shutdown sequence.
#[cfg(unix)]
pub fn install_signal_handlers(state: Arc<WorkerState>, app: Arc<dyn WorkerApp>) {
    tokio::spawn(async move {
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("failed to install SIGINT handler");
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        loop {
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }
            if state.handle_signal() {
                force_close(Arc::clone(&app)).await;
            }
        }
    });
}

/// Re-exec this executable `worker_num` times as marked worker children and
/// wait for all of them to exit, mirroring `run_worker_master`'s
/// fork-then-join loop without relying on an unsafe `fork()`.
pub fn run_worker_master(worker_num: usize) -> Result<(), anyhow::Error> {
    let exe = std::env::current_exe()?;
    let mut children = Vec::with_capacity(worker_num);
    for _ in 0..worker_num {
        let child = std::process::Command::new(&exe)
            .env(WORKER_MARKER_ENV, "1")
            .spawn()?;
        children.push(child);
    }
    for mut child in children {
        let _ = child.wait();
    }
    Ok(())
}

/// Whether the current process was re-exec'd as a worker child.
pub fn is_worker_child() -> bool {
    std::env::var(WORKER_MARKER_ENV).is_ok()
}

/// Wraps a set of named pools so the shutdown sequence can drain or
/// force-close every one of them uniformly.
#[derive(Default, Clone)]
pub struct PoolRegistry {
    pools: Vec<Arc<ConcurrencyPool>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pool: Arc<ConcurrencyPool>) {
        self.pools.push(pool);
    }

    pub async fn wait_close_all(&self) {
        for pool in &self.pools {
            pool.wait_close().await;
        }
    }

    pub async fn force_close_all(&self) {
        for pool in &self.pools {
            pool.force_close().await;
        }
    }
}

/// Poll `consuming_count` down to zero with `poll_interval` between checks,
/// mirroring `spec.md` §4.4 step 5b.
pub async fn wait_for_consuming_count_zero(count: Arc<AtomicUsize>, poll_interval: Duration) {
    while count.load(Ordering::SeqCst) != 0 {
        tokio::time::sleep(poll_interval).await;
    }
}

/// The supervisor-side check behind `spec.md` §8 invariant 5: a heartbeat
/// file is considered stale once it hasn't advanced within twice the
/// configured interval. Exposed as a pure function over explicit timestamps
/// so it can be checked with [`crate::util::ManualClock`] rather than real
/// sleeps.
pub fn heartbeat_is_stale(last_write_secs: u64, now_secs: u64, timeout_secs: u64) -> bool {
    now_secs.saturating_sub(last_write_secs) > 2 * timeout_secs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Clock as _;

    #[test]
    fn first_signal_is_graceful_second_is_forced() {
        let state = WorkerState::new(true);
        assert!(!state.handle_signal());
        assert!(!state.is_running());
        assert!(state.handle_signal());
    }

    #[test]
    fn signal_on_non_worker_process_is_a_no_op() {
        let state = WorkerState::new(false);
        assert!(!state.handle_signal());
        assert!(state.is_running());
    }

    #[tokio::test]
    async fn wait_for_consuming_count_zero_returns_once_drained() {
        let count = Arc::new(AtomicUsize::new(1));
        let count_for_task = Arc::clone(&count);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            count_for_task.fetch_sub(1, Ordering::SeqCst);
        });
        wait_for_consuming_count_zero(Arc::clone(&count), Duration::from_millis(5)).await;
        handle.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pool_registry_drains_every_pool() {
        let mut registry = PoolRegistry::new();
        let pool = Arc::new(ConcurrencyPool::new(Some(2), Duration::from_secs(1)));
        registry.add(Arc::clone(&pool));
        pool.wait_spawn(None, async move { Ok(()) }).await.unwrap();
        registry.wait_close_all().await;
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn heartbeat_within_two_intervals_is_not_stale() {
        let clock = crate::util::ManualClock::new(1_000);
        let last_write = clock.now_secs();
        clock.advance(9);
        assert!(!heartbeat_is_stale(last_write, clock.now_secs(), 5));
    }

    #[test]
    fn heartbeat_past_two_intervals_is_stale() {
        let clock = crate::util::ManualClock::new(1_000);
        let last_write = clock.now_secs();
        clock.advance(11);
        assert!(heartbeat_is_stale(last_write, clock.now_secs(), 5));
    }

    #[test]
    fn worker_marker_env_round_trips() {
        std::env::set_var(WORKER_MARKER_ENV, "1");
        assert!(is_worker_child());
        std::env::remove_var(WORKER_MARKER_ENV);
        assert!(!is_worker_child());
    }
}
