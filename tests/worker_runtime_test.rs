//! `spec.md` §8 invariant 4: after graceful shutdown, `consuming_count == 0`
//! and no pool holds an in-flight unit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use oxalis_rs::config::RuntimeSettings;
use oxalis_rs::core::ConcurrencyPool;
use oxalis_rs::runtime::{shutdown_sequence, PoolRegistry, WorkerApp, WorkerState};

/// Minimal [`WorkerApp`] whose `stop_intake`/`drain_pools` delegate to a real
/// [`PoolRegistry`], so the test drives the production `shutdown_sequence`
/// instead of reimplementing it.
struct FakeApp {
    pools: Mutex<PoolRegistry>,
    disconnected: Arc<std::sync::atomic::AtomicBool>,
}

#[async_trait]
impl WorkerApp for FakeApp {
    async fn connect(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
    async fn run_worker(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
    async fn stop_intake(&self) {}
    async fn drain_pools(&self) {
        let pools = self.pools.lock().unwrap().clone();
        pools.wait_close_all().await;
    }
    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
    async fn force_close_pools(&self) {
        let pools = self.pools.lock().unwrap().clone();
        pools.force_close_all().await;
    }
}

#[tokio::test]
async fn graceful_shutdown_drains_consuming_count_and_every_pool() {
    let state = WorkerState::new(true);
    let consuming_count = state.consuming_count();

    let pool = Arc::new(ConcurrencyPool::new(Some(4), Duration::from_secs(5)));
    let mut pools = PoolRegistry::new();
    pools.add(Arc::clone(&pool));
    let disconnected = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app = FakeApp {
        pools: Mutex::new(pools),
        disconnected: Arc::clone(&disconnected),
    };

    consuming_count.fetch_add(1, Ordering::SeqCst);
    for _ in 0..3 {
        let pool = Arc::clone(&pool);
        pool.wait_spawn(None, async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            Ok(())
        })
        .await
        .unwrap();
    }

    let count_for_task = Arc::clone(&consuming_count);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        count_for_task.fetch_sub(1, Ordering::SeqCst);
    });

    // `shutdown_sequence` polls `consuming_count` at `settings.default_timeout()`;
    // the shortest valid value is one second (`RuntimeSettings::validate`).
    let settings = RuntimeSettings {
        timeout_secs: 1,
        ..RuntimeSettings::default()
    };

    shutdown_sequence(&app, Arc::clone(&consuming_count), &settings).await;

    assert_eq!(consuming_count.load(Ordering::SeqCst), 0);
    assert_eq!(pool.in_flight(), 0);
    assert!(disconnected.load(Ordering::SeqCst));
    assert!(state.is_running());
}

#[tokio::test]
async fn force_close_aborts_in_flight_units_without_waiting() {
    let pool = Arc::new(ConcurrencyPool::new(Some(1), Duration::from_secs(5)));
    let mut pools = PoolRegistry::new();
    pools.add(Arc::clone(&pool));

    pool.wait_spawn(None, async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    })
    .await
    .unwrap();

    pools.force_close_all().await;
    assert_eq!(pool.in_flight(), 0);
}
