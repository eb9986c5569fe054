//! Sort, truncate and diff scored items into a ranked list.

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use tempo_core::prelude::*;

/// Score descending, then item id ascending. Total and deterministic.
pub fn sort_scored(v: &mut [Scored]) {
    v.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.item_id.cmp(&b.item_id)));
}

/// Build the next list from `scored`. Keeps the best `min(max, N_MAX)` items,
/// ranks them from 1, and takes `previous_rank` from `previous` by item id.
/// If an item appears twice only its higher-scored copy is kept.
pub fn build_ranked_list(
    mut scored: Vec<Scored>,
    previous: &RankedList,
    max: usize,
    epoch: u64,
    published_at: DateTime<Utc>,
) -> RankedList {
    sort_scored(&mut scored);
    let mut seen: FxHashSet<ItemId> = FxHashSet::default();
    scored.retain(|s| seen.insert(s.item_id));
    scored.truncate(max.min(N_MAX));

    let prev: FxHashMap<ItemId, u32> = previous.entries.iter().map(|e| (e.item_id, e.rank)).collect();
    let entries = scored
        .into_iter()
        .enumerate()
        .map(|(i, s)| RankEntry {
            item_id: s.item_id,
            rank: i as u32 + 1,
            previous_rank: prev.get(&s.item_id).copied(),
            score: s.score,
            published_at,
        })
        .collect();
    RankedList { epoch, published_at: Some(published_at), entries }
}
