//! Tempo core types: catalog items, raw signals, ranked lists.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod score;

/// Upper bound on the number of entries in a published list.
pub const N_MAX: usize = 100;

/// Catalog identifier of a ranked item. Ordering is the tie-break order for equal scores.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An approved catalog item as seen by the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogItem {
    pub id: ItemId,
    pub created_at: DateTime<Utc>,
}

/// Raw scoring inputs for one item.
///
/// `listens_long_window` covers the last 7 days and therefore includes the
/// events already counted in `listens_short_window`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Signals {
    pub listens_short_window: u64,
    pub listens_long_window: u64,
    pub total_likes: u64,
    pub age_days: f64,
}

/// An item paired with its computed score, ready for ranking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub item_id: ItemId,
    pub score: f64,
}

/// One row of a published ranking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankEntry {
    pub item_id: ItemId,
    /// 1-based, dense within its list.
    pub rank: u32,
    /// Rank in the previously published list, absent for new entrants.
    pub previous_rank: Option<u32>,
    pub score: f64,
    pub published_at: DateTime<Utc>,
}

/// Position change relative to the previous list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Movement {
    New,
    Up(u32),
    Down(u32),
    Same,
}

impl RankEntry {
    /// Positive when the item climbed, negative when it fell.
    pub fn delta(&self) -> Option<i64> {
        self.previous_rank.map(|prev| prev as i64 - self.rank as i64)
    }

    pub fn movement(&self) -> Movement {
        match self.delta() {
            None => Movement::New,
            Some(0) => Movement::Same,
            Some(d) if d > 0 => Movement::Up(d as u32),
            Some(d) => Movement::Down(d.unsigned_abs() as u32),
        }
    }
}

/// The unit of publication. Exactly one list is current at any instant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RankedList {
    /// Generation counter; 0 is the empty list served before the first cycle.
    pub epoch: u64,
    pub published_at: Option<DateTime<Utc>>,
    pub entries: Vec<RankEntry>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ListError {
    #[error("list has {len} entries, limit is {max}")]
    TooLong { len: usize, max: usize },
    #[error("entry at position {position} has rank {rank}")]
    RankGap { position: usize, rank: u32 },
    #[error("item {0} appears more than once")]
    DuplicateItem(ItemId),
    #[error("entry for item {0} carries a different publish time")]
    MixedPublishTime(ItemId),
}

impl RankedList {
    pub fn empty() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn get(&self, item: ItemId) -> Option<&RankEntry> {
        self.entries.iter().find(|e| e.item_id == item)
    }

    pub fn rank_of(&self, item: ItemId) -> Option<u32> {
        self.get(item).map(|e| e.rank)
    }

    /// Check the publication invariants: dense ranks `1..=K`, unique items,
    /// `K <= N_MAX`, one publish time for every entry.
    pub fn validate(&self) -> Result<(), ListError> {
        if self.entries.len() > N_MAX {
            return Err(ListError::TooLong { len: self.entries.len(), max: N_MAX });
        }
        let mut seen = std::collections::HashSet::with_capacity(self.entries.len());
        for (i, e) in self.entries.iter().enumerate() {
            if e.rank as usize != i + 1 {
                return Err(ListError::RankGap { position: i, rank: e.rank });
            }
            if !seen.insert(e.item_id) {
                return Err(ListError::DuplicateItem(e.item_id));
            }
            if Some(e.published_at) != self.published_at {
                return Err(ListError::MixedPublishTime(e.item_id));
            }
        }
        Ok(())
    }
}

/// Durable copy of the current list. Implementations must replace the stored
/// list in one indivisible step; readers of the mirror see the old or the new
/// list, never a mix.
pub trait ChartMirror: Send + Sync {
    fn persist(&self, list: &RankedList) -> anyhow::Result<()>;
    /// Last persisted list, if any.
    fn load(&self) -> anyhow::Result<Option<RankedList>>;
}

pub mod prelude {
    pub use super::{CatalogItem, ChartMirror, ItemId, ListError, Movement, RankEntry, RankedList, Scored, Signals, N_MAX};
    pub use super::score::trending_score;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() }

    fn entry(id: i64, rank: u32, prev: Option<u32>) -> RankEntry {
        RankEntry { item_id: ItemId(id), rank, previous_rank: prev, score: 10.0, published_at: at() }
    }

    fn list(entries: Vec<RankEntry>) -> RankedList {
        RankedList { epoch: 1, published_at: Some(at()), entries }
    }

    #[test]
    fn movement_from_previous_rank() {
        assert_eq!(entry(1, 3, None).movement(), Movement::New);
        assert_eq!(entry(1, 3, Some(3)).movement(), Movement::Same);
        assert_eq!(entry(1, 2, Some(5)).movement(), Movement::Up(3));
        assert_eq!(entry(1, 4, Some(1)).movement(), Movement::Down(3));
        assert_eq!(entry(1, 4, Some(1)).delta(), Some(-3));
    }

    #[test]
    fn validate_accepts_dense_list() {
        let l = list(vec![entry(7, 1, None), entry(3, 2, Some(1))]);
        assert_eq!(l.validate(), Ok(()));
        assert_eq!(l.rank_of(ItemId(3)), Some(2));
        assert!(RankedList::empty().validate().is_ok());
    }

    #[test]
    fn validate_rejects_gaps_and_duplicates() {
        let gap = list(vec![entry(1, 1, None), entry(2, 3, None)]);
        assert_eq!(gap.validate(), Err(ListError::RankGap { position: 1, rank: 3 }));
        let dup = list(vec![entry(1, 1, None), entry(1, 2, None)]);
        assert_eq!(dup.validate(), Err(ListError::DuplicateItem(ItemId(1))));
        let long = list((1..=101).map(|i| entry(i, i as u32, None)).collect());
        assert!(matches!(long.validate(), Err(ListError::TooLong { len: 101, .. })));
    }

    #[test]
    fn validate_rejects_mixed_publish_times() {
        let mut l = list(vec![entry(1, 1, None), entry(2, 2, None)]);
        l.entries[1].published_at = at() + chrono::Duration::seconds(1);
        assert_eq!(l.validate(), Err(ListError::MixedPublishTime(ItemId(2))));
        // An unpublished list cannot carry entries.
        let mut unpublished = list(vec![entry(1, 1, None)]);
        unpublished.published_at = None;
        assert_eq!(unpublished.validate(), Err(ListError::MixedPublishTime(ItemId(1))));
    }

    #[test]
    fn entry_serializes_with_plain_item_id() {
        let v = serde_json::to_value(entry(42, 1, None)).unwrap();
        assert_eq!(v["item_id"], serde_json::json!(42));
        assert!(v["previous_rank"].is_null());
    }
}
