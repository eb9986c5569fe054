use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempo_core::ItemId;
use tempo_signals::{MemorySignals, SignalAggregator, SqliteSignals};

fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() }

fn temp_db() -> String {
    let dir = std::env::temp_dir();
    let f = format!("tempo-signals-test-{}.db", std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos());
    dir.join(f).to_string_lossy().to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_item_is_skipped_not_fatal() {
    let mem = Arc::new(MemorySignals::new());
    for id in 1..=3 {
        mem.add_item(ItemId(id), now() - Duration::days(30));
        mem.set_likes(ItemId(id), 10 * id as u64);
    }
    mem.fail_item(ItemId(2), true);

    let agg = SignalAggregator::new(mem.clone(), mem.clone()).with_concurrency(2);
    let out = agg.collect(now()).await.unwrap();

    let mut ids: Vec<i64> = out.signals.iter().map(|(i, _)| i.id.0).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 3]);
    assert_eq!(out.skipped.len(), 1);
    assert_eq!(out.skipped[0].item_id, ItemId(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn catalog_failure_fails_the_pass() {
    let mem = Arc::new(MemorySignals::new());
    mem.add_item(ItemId(1), now());
    mem.fail_catalog(true);
    let agg = SignalAggregator::new(mem.clone(), mem.clone());
    assert!(agg.collect(now()).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn memory_windows_overlap() {
    let mem = Arc::new(MemorySignals::new());
    mem.add_item(ItemId(9), now() - Duration::days(2));
    mem.add_listens(ItemId(9), now() - Duration::hours(1), 3);
    mem.add_listens(ItemId(9), now() - Duration::days(3), 4);
    mem.add_listens(ItemId(9), now() - Duration::days(10), 5);

    let agg = SignalAggregator::new(mem.clone(), mem.clone());
    let out = agg.collect(now()).await.unwrap();
    let s = out.signals[0].1;
    assert_eq!(s.listens_short_window, 3);
    assert_eq!(s.listens_long_window, 7);
    assert_eq!(s.age_days, 2.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sqlite_source_counts_windows_and_likes() {
    let path = temp_db();
    let src = SqliteSignals::open(&path).unwrap();
    src.ensure_schema().unwrap();
    {
        let db = rusqlite::Connection::open(&path).unwrap();
        let t = now().timestamp();
        db.execute("INSERT INTO songs(id, created_at, approved) VALUES (1, ?1, 1)", [t - 86_400]).unwrap();
        db.execute("INSERT INTO songs(id, created_at, approved) VALUES (2, ?1, 1)", [t - 20 * 86_400]).unwrap();
        // Pending approval: never listed
        db.execute("INSERT INTO songs(id, created_at, approved) VALUES (3, ?1, 0)", [t]).unwrap();
        for at in [t - 60, t - 3_600, t - 3 * 86_400, t - 8 * 86_400] {
            db.execute("INSERT INTO listens(song_id, listened_at) VALUES (1, ?1)", [at]).unwrap();
        }
        for user in 1..=4 {
            db.execute("INSERT INTO likes(song_id, user_id) VALUES (2, ?1)", [user]).unwrap();
        }
    }

    let src = Arc::new(SqliteSignals::open_read_only(&path).unwrap());
    let agg = SignalAggregator::new(src.clone(), src.clone());
    let mut out = agg.collect(now()).await.unwrap();
    out.signals.sort_by_key(|(i, _)| i.id);
    assert_eq!(out.signals.len(), 2);

    let (item1, s1) = &out.signals[0];
    assert_eq!(item1.id, ItemId(1));
    assert_eq!(s1.listens_short_window, 2);
    assert_eq!(s1.listens_long_window, 3);
    assert_eq!(s1.total_likes, 0);
    assert_eq!(s1.age_days, 1.0);

    let (_, s2) = &out.signals[1];
    assert_eq!(s2.listens_long_window, 0);
    assert_eq!(s2.total_likes, 4);
    let _ = std::fs::remove_file(&path);
}
