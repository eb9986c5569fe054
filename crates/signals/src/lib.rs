//! Tempo signals: read-only access to catalog and engagement stores, and the
//! aggregator that turns them into per-item scoring inputs.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use metrics::{counter, gauge, histogram};
use tempo_core::{score, CatalogItem, ItemId, Signals};
use tracing::{debug, info, warn};

pub mod memory;
pub mod sqlite;

pub use memory::MemorySignals;
pub use sqlite::SqliteSignals;

/// Source of approved catalog items.
#[async_trait::async_trait]
pub trait CatalogSource: Send + Sync {
    async fn approved_items(&self) -> Result<Vec<CatalogItem>>;
}

/// Source of engagement counts.
#[async_trait::async_trait]
pub trait EngagementSource: Send + Sync {
    /// Listens recorded at or after `since`.
    async fn listens_since(&self, item: ItemId, since: DateTime<Utc>) -> Result<u64>;
    async fn total_likes(&self, item: ItemId) -> Result<u64>;
}

/// An item left out of a cycle because one of its reads failed.
#[derive(Debug, Clone)]
pub struct SkippedItem {
    pub item_id: ItemId,
    pub reason: String,
}

/// Result of one aggregation pass. `signals` is in no particular order.
#[derive(Debug, Clone, Default)]
pub struct Aggregated {
    pub signals: Vec<(CatalogItem, Signals)>,
    pub skipped: Vec<SkippedItem>,
}

pub struct SignalAggregator {
    catalog: Arc<dyn CatalogSource>,
    engagement: Arc<dyn EngagementSource>,
    concurrency: usize,
}

impl SignalAggregator {
    pub fn new(catalog: Arc<dyn CatalogSource>, engagement: Arc<dyn EngagementSource>) -> Self {
        Self { catalog, engagement, concurrency: 16 }
    }

    /// Bound on in-flight per-item reads.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Read signals for every approved item as of `now`.
    ///
    /// Failing to list the catalog fails the whole pass. A failed read for a
    /// single item only drops that item.
    pub async fn collect(&self, now: DateTime<Utc>) -> Result<Aggregated> {
        let started = Instant::now();
        let items = self.catalog.approved_items().await.context("listing approved items")?;
        let total = items.len();
        debug!(total, "aggregate: catalog listed");

        let short_since = now - score::short_window();
        let long_since = now - score::long_window();
        let engagement = Arc::clone(&self.engagement);
        let results: Vec<(CatalogItem, Result<Signals>)> = stream::iter(items)
            .map(move |item| {
                let src = Arc::clone(&engagement);
                async move {
                    let res = read_signals(src.as_ref(), &item, now, short_since, long_since).await;
                    (item, res)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut out = Aggregated { signals: Vec::with_capacity(total), skipped: Vec::new() };
        for (item, res) in results {
            match res {
                Ok(s) => out.signals.push((item, s)),
                Err(e) => {
                    warn!(item = %item.id, error = %format!("{:#}", e), "aggregate: dropping item for this cycle");
                    counter!("signal_read_failures_total", 1u64);
                    out.skipped.push(SkippedItem { item_id: item.id, reason: format!("{:#}", e) });
                }
            }
        }
        gauge!("signal_candidates", out.signals.len() as f64);
        histogram!("signal_collect_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(total, ok = out.signals.len(), skipped = out.skipped.len(), took_ms = %started.elapsed().as_millis(), "aggregate: done");
        Ok(out)
    }
}

async fn read_signals(
    src: &dyn EngagementSource,
    item: &CatalogItem,
    now: DateTime<Utc>,
    short_since: DateTime<Utc>,
    long_since: DateTime<Utc>,
) -> Result<Signals> {
    let listens_short_window = src.listens_since(item.id, short_since).await.context("short-window listens")?;
    let listens_long_window = src.listens_since(item.id, long_since).await.context("long-window listens")?;
    let total_likes = src.total_likes(item.id).await.context("like count")?;
    Ok(Signals { listens_short_window, listens_long_window, total_likes, age_days: age_days(item.created_at, now) })
}

/// Fractional days between creation and `now`, never negative.
pub fn age_days(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let ms = (now - created_at).num_milliseconds().max(0);
    ms as f64 / 86_400_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn age_is_fractional_and_clamped() {
        let now = Utc.with_ymd_and_hms(2024, 5, 8, 0, 0, 0).unwrap();
        assert_eq!(age_days(now - Duration::hours(36), now), 1.5);
        assert_eq!(age_days(now + Duration::days(2), now), 0.0);
    }
}
