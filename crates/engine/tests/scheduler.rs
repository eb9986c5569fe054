use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempo_core::ItemId;
use tempo_engine::{spawn_scheduler, CycleRunner, EngineConfig};
use tempo_signals::{MemorySignals, SignalAggregator};
use tempo_store::RankingStore;

async fn wait_for_epoch(rx: &mut tokio::sync::watch::Receiver<u64>, want: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while *rx.borrow() < want {
        let rem = deadline.saturating_duration_since(tokio::time::Instant::now());
        if tokio::time::timeout(rem, rx.changed()).await.is_err() {
            panic!("epoch {} not reached", want);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn first_tick_runs_immediately_and_trigger_runs_again() {
    let mem = Arc::new(MemorySignals::new());
    mem.add_item(ItemId(1), Utc::now() - chrono::Duration::days(1));
    let store = Arc::new(RankingStore::new());
    let runner = Arc::new(CycleRunner::new(SignalAggregator::new(mem.clone(), mem.clone()), store.clone(), EngineConfig::default()));
    let mut rx = store.subscribe_epoch();

    let handle = spawn_scheduler(runner.clone(), Duration::from_secs(3600));
    wait_for_epoch(&mut rx, 1).await;
    assert_eq!(store.current().len(), 1);

    mem.add_item(ItemId(2), Utc::now());
    assert!(handle.trigger());
    wait_for_epoch(&mut rx, 2).await;
    assert_eq!(store.current().len(), 2);
    assert!(runner.last_status().unwrap().ok);

    handle.shutdown().await;
    assert_eq!(store.epoch(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn triggers_during_a_cycle_collapse_into_one() {
    let mem = Arc::new(MemorySignals::new().with_delay(Duration::from_millis(100)));
    mem.add_item(ItemId(1), Utc::now());
    let store = Arc::new(RankingStore::new());
    let runner = Arc::new(CycleRunner::new(SignalAggregator::new(mem.clone(), mem), store.clone(), EngineConfig::default()));
    let mut rx = store.subscribe_epoch();

    let handle = spawn_scheduler(runner, Duration::from_secs(3600));
    // Let the first cycle start, then pile up requests while it runs.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let queued: Vec<bool> = (0..5).map(|_| handle.trigger()).collect();
    assert_eq!(queued.iter().filter(|q| **q).count(), 1);

    wait_for_epoch(&mut rx, 2).await;
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(store.epoch(), 2);
    handle.shutdown().await;
}
