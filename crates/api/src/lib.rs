//! Tempo public API façade (in-process).
//!
//! `ChartReader` is the read path over the published list. `ChartApi` is the
//! stable surface frontends depend on; `InProcApi` serves it from the live
//! store and `MockApi` from a fixed list.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tempo_core::{ItemId, RankEntry, RankedList};
use tempo_engine::{CycleRunner, CycleStatus, EngineConfig, Trigger};
use tempo_store::RankingStore;
use tracing::{debug, info};

/// One window of the chart, cut from a single published list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page {
    pub entries: Vec<RankEntry>,
    pub offset: usize,
    /// Length of the list the page was cut from.
    pub total: usize,
    pub epoch: u64,
    pub published_at: Option<DateTime<Utc>>,
}

/// Slice `list` by position. Out-of-range offsets and zero limits yield an
/// empty vec, never an error.
pub fn paginate(list: &RankedList, offset: usize, limit: usize) -> Vec<RankEntry> {
    list.entries.iter().skip(offset).take(limit).cloned().collect()
}

fn page_of(list: &RankedList, offset: usize, limit: usize) -> Page {
    Page {
        entries: paginate(list, offset, limit),
        offset,
        total: list.len(),
        epoch: list.epoch,
        published_at: list.published_at,
    }
}

/// Lock-free reads of the currently published chart.
#[derive(Clone)]
pub struct ChartReader {
    store: Arc<RankingStore>,
}

impl ChartReader {
    pub fn new(store: Arc<RankingStore>) -> Self { Self { store } }

    /// The whole current list. Empty before the first publish.
    pub fn current(&self) -> Arc<RankedList> { self.store.current() }

    pub fn get_page(&self, offset: usize, limit: usize) -> Vec<RankEntry> {
        let list = self.store.current();
        paginate(&list, offset, limit)
    }

    /// Like `get_page` but also reports which list the entries came from.
    pub fn page(&self, offset: usize, limit: usize) -> Page {
        let started = Instant::now();
        let list = self.store.current();
        let page = page_of(&list, offset, limit);
        counter!("chart_reads_total", 1u64);
        histogram!("chart_read_us", started.elapsed().as_secs_f64() * 1_000_000.0);
        debug!(offset, limit, returned = page.entries.len(), epoch = page.epoch, "chart: page");
        page
    }

    pub fn entry(&self, item: ItemId) -> Option<RankEntry> {
        self.store.current().get(item).cloned()
    }
}

/// Stats and runtime configuration exposed to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Stats {
    pub epoch: u64,
    pub entries: usize,
    pub published_at: Option<DateTime<Utc>>,
    pub cadence_secs: u64,
    pub cycle_timeout_secs: u64,
    pub chart_size: usize,
    pub last_cycle: Option<LastCycle>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastCycle {
    pub finished_at: DateTime<Utc>,
    pub ok: bool,
    pub message: Option<String>,
}

impl From<&CycleStatus> for LastCycle {
    fn from(s: &CycleStatus) -> Self {
        Self { finished_at: s.finished_at, ok: s.ok, message: s.message.clone() }
    }
}

/// API errors suitable for transport over RPC later.
#[derive(Debug, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChartError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

pub type ChartResult<T> = Result<T, ChartError>;

#[async_trait::async_trait]
pub trait ChartApi: Send + Sync {
    async fn page(&self, offset: usize, limit: usize) -> ChartResult<Page>;
    /// Current entry for `item`; `NotFound` when it is not on the chart.
    async fn entry(&self, item: ItemId) -> ChartResult<RankEntry>;
    async fn stats(&self) -> ChartResult<Stats>;
    /// Request a cycle ahead of schedule. `Ok(false)` means a request was
    /// already pending and this one was merged into it.
    async fn trigger(&self) -> ChartResult<bool>;
}

// ----------------- Mock implementation -----------------

/// Serves a fixed list. Useful for frontend tests.
#[derive(Debug, Clone, Default)]
pub struct MockApi {
    pub list: RankedList,
    pub stats: Stats,
}

impl MockApi {
    pub fn new(list: RankedList) -> Self {
        let stats = Stats { epoch: list.epoch, entries: list.len(), published_at: list.published_at, ..Stats::default() };
        Self { list, stats }
    }
}

#[async_trait::async_trait]
impl ChartApi for MockApi {
    async fn page(&self, offset: usize, limit: usize) -> ChartResult<Page> { Ok(page_of(&self.list, offset, limit)) }

    async fn entry(&self, item: ItemId) -> ChartResult<RankEntry> {
        self.list.get(item).cloned().ok_or_else(|| ChartError::NotFound(format!("item {}", item)))
    }

    async fn stats(&self) -> ChartResult<Stats> { Ok(self.stats.clone()) }

    async fn trigger(&self) -> ChartResult<bool> { Ok(false) }
}

// ----------------- In-process implementation -----------------

/// In-process implementation over the live store.
pub struct InProcApi {
    reader: ChartReader,
    config: EngineConfig,
    runner: Option<Arc<CycleRunner>>,
    trigger: Option<Trigger>,
}

impl InProcApi {
    /// Read-only: `trigger` reports `Unavailable`.
    pub fn new(store: Arc<RankingStore>, config: EngineConfig) -> Self {
        Self { reader: ChartReader::new(store), config, runner: None, trigger: None }
    }

    /// Attach a running scheduler so `trigger` and cycle status work.
    pub fn with_scheduler(runner: Arc<CycleRunner>, trigger: Trigger) -> Self {
        let reader = ChartReader::new(runner.store().clone());
        let config = runner.config().clone();
        Self { reader, config, runner: Some(runner), trigger: Some(trigger) }
    }

    pub fn reader(&self) -> &ChartReader { &self.reader }
}

#[async_trait::async_trait]
impl ChartApi for InProcApi {
    async fn page(&self, offset: usize, limit: usize) -> ChartResult<Page> { Ok(self.reader.page(offset, limit)) }

    async fn entry(&self, item: ItemId) -> ChartResult<RankEntry> {
        self.reader.entry(item).ok_or_else(|| ChartError::NotFound(format!("item {}", item)))
    }

    async fn stats(&self) -> ChartResult<Stats> {
        let list = self.reader.current();
        let last_cycle = self.runner.as_ref().and_then(|r| r.last_status()).map(|s| LastCycle::from(s.as_ref()));
        Ok(Stats {
            epoch: list.epoch,
            entries: list.len(),
            published_at: list.published_at,
            cadence_secs: self.config.cadence.as_secs(),
            cycle_timeout_secs: self.config.cycle_timeout.as_secs(),
            chart_size: self.config.chart_size,
            last_cycle,
        })
    }

    async fn trigger(&self) -> ChartResult<bool> {
        let Some(trigger) = self.trigger.as_ref() else {
            return Err(ChartError::Unavailable("no scheduler attached".into()));
        };
        if trigger.is_closed() {
            return Err(ChartError::Unavailable("scheduler stopped".into()));
        }
        let queued = trigger.fire();
        info!(queued, "api: trigger");
        Ok(queued)
    }
}
