use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tempo_core::{ItemId, RankEntry, RankedList};
use tempo_store::RankingStore;

// Epoch e carries a list of exactly len_for(e) entries.
fn len_for(epoch: u64) -> usize { (epoch as usize * 37) % 101 }

fn list(epoch: u64) -> RankedList {
    let at = Utc.timestamp_millis_opt(1_700_000_000_000 + epoch as i64).unwrap();
    let entries = (0..len_for(epoch))
        .map(|i| RankEntry {
            item_id: ItemId((epoch as i64 * 1_000) + i as i64),
            rank: i as u32 + 1,
            previous_rank: None,
            score: 1_000.0 - i as f64,
            published_at: at,
        })
        .collect();
    RankedList { epoch, published_at: Some(at), entries }
}

#[test]
fn readers_never_observe_a_partial_list() {
    let store = Arc::new(RankingStore::new());
    let done = Arc::new(AtomicBool::new(false));
    let observed = Arc::new(AtomicUsize::new(0));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            let observed = Arc::clone(&observed);
            std::thread::spawn(move || {
                loop {
                    let finished = done.load(Ordering::Acquire);
                    let snap = store.current();
                    if snap.epoch == 0 {
                        assert!(snap.is_empty());
                        if finished { break; }
                        continue;
                    }
                    assert_eq!(snap.len(), len_for(snap.epoch), "torn list at epoch {}", snap.epoch);
                    snap.validate().expect("published list must satisfy invariants");
                    // Every entry belongs to the same generation.
                    assert!(snap.entries.iter().all(|e| e.item_id.0 / 1_000 == snap.epoch as i64));
                    observed.fetch_add(1, Ordering::Relaxed);
                    if finished { break; }
                }
            })
        })
        .collect();

    for epoch in 1..=2_000u64 {
        store.publish(list(epoch)).unwrap();
    }
    done.store(true, Ordering::Release);
    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(store.epoch(), 2_000);
    assert!(observed.load(Ordering::Relaxed) > 0);
}
