//! In-memory catalog and engagement source for tests and local runs.

use std::sync::RwLock;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use tempo_core::{CatalogItem, ItemId};

use crate::{CatalogSource, EngagementSource};

#[derive(Default)]
struct State {
    items: Vec<CatalogItem>,
    listens: FxHashMap<ItemId, Vec<DateTime<Utc>>>,
    likes: FxHashMap<ItemId, u64>,
    failing: FxHashSet<ItemId>,
    catalog_down: bool,
}

/// Implements both source traits over plain maps. Supports failure injection
/// per item or for the whole catalog, and an artificial delay on every read.
#[derive(Default)]
pub struct MemorySignals {
    state: RwLock<State>,
    delay: Option<Duration>,
}

impl MemorySignals {
    pub fn new() -> Self { Self::default() }

    /// Sleep this long inside every read.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn add_item(&self, id: ItemId, created_at: DateTime<Utc>) {
        if let Ok(mut st) = self.state.write() {
            st.items.retain(|i| i.id != id);
            st.items.push(CatalogItem { id, created_at });
        }
    }

    pub fn remove_item(&self, id: ItemId) {
        if let Ok(mut st) = self.state.write() {
            st.items.retain(|i| i.id != id);
        }
    }

    pub fn add_listens(&self, id: ItemId, at: DateTime<Utc>, count: usize) {
        if let Ok(mut st) = self.state.write() {
            st.listens.entry(id).or_default().extend(std::iter::repeat(at).take(count));
        }
    }

    pub fn set_likes(&self, id: ItemId, likes: u64) {
        if let Ok(mut st) = self.state.write() {
            st.likes.insert(id, likes);
        }
    }

    /// Make engagement reads for `id` fail until cleared.
    pub fn fail_item(&self, id: ItemId, on: bool) {
        if let Ok(mut st) = self.state.write() {
            if on {
                st.failing.insert(id);
            } else {
                st.failing.remove(&id);
            }
        }
    }

    /// Make catalog listing fail until cleared.
    pub fn fail_catalog(&self, on: bool) {
        if let Ok(mut st) = self.state.write() {
            st.catalog_down = on;
        }
    }

    async fn pause(&self) {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| anyhow!("memory signals lock poisoned"))
    }
}

#[async_trait::async_trait]
impl CatalogSource for MemorySignals {
    async fn approved_items(&self) -> Result<Vec<CatalogItem>> {
        self.pause().await;
        let st = self.read()?;
        if st.catalog_down {
            bail!("catalog unavailable");
        }
        Ok(st.items.clone())
    }
}

#[async_trait::async_trait]
impl EngagementSource for MemorySignals {
    async fn listens_since(&self, item: ItemId, since: DateTime<Utc>) -> Result<u64> {
        self.pause().await;
        let st = self.read()?;
        if st.failing.contains(&item) {
            bail!("listen store read failed for item {}", item);
        }
        let n = st.listens.get(&item).map(|v| v.iter().filter(|at| **at >= since).count()).unwrap_or(0);
        Ok(n as u64)
    }

    async fn total_likes(&self, item: ItemId) -> Result<u64> {
        self.pause().await;
        let st = self.read()?;
        if st.failing.contains(&item) {
            bail!("like store read failed for item {}", item);
        }
        Ok(st.likes.get(&item).copied().unwrap_or(0))
    }
}
