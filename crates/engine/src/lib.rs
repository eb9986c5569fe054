//! Tempo engine: one ranking cycle is aggregate, score, rank, diff, publish.
//!
//! Cycles are serialized by a non-reentrant guard. Anything that goes wrong
//! before the final swap leaves the previous list current.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use tempo_core::{score::trending_score, Scored};
use tempo_signals::SignalAggregator;
use tempo_store::{PublishError, RankingStore};
use tracing::{error, info, warn};
use uuid::Uuid;

pub mod config;
pub mod rank;
pub mod scheduler;

pub use config::EngineConfig;
pub use scheduler::{spawn_scheduler, SchedulerHandle, Trigger};

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("a ranking cycle is already running")]
    Busy,
    #[error("signal aggregation failed: {0:#}")]
    Aggregation(#[source] anyhow::Error),
    #[error("cycle did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),
}

impl CycleError {
    fn label(&self) -> &'static str {
        match self {
            CycleError::Busy => "busy",
            CycleError::Aggregation(_) => "aggregation_failed",
            CycleError::TimedOut(_) => "timed_out",
            CycleError::Publish(_) => "publish_failed",
        }
    }
}

/// What a successful cycle did.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub epoch: u64,
    /// Items that produced signals this cycle.
    pub candidates: usize,
    /// Items dropped because a signal read failed.
    pub skipped: usize,
    pub published: usize,
    pub took: Duration,
}

/// Outcome of the most recent cycle that got past the guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleStatus {
    pub cycle_id: Uuid,
    pub finished_at: DateTime<Utc>,
    pub ok: bool,
    pub epoch: u64,
    pub message: Option<String>,
}

pub struct CycleRunner {
    aggregator: SignalAggregator,
    store: Arc<RankingStore>,
    config: EngineConfig,
    guard: tokio::sync::Mutex<()>,
    last: ArcSwapOption<CycleStatus>,
}

impl CycleRunner {
    pub fn new(aggregator: SignalAggregator, store: Arc<RankingStore>, config: EngineConfig) -> Self {
        let aggregator = aggregator.with_concurrency(config.signal_concurrency);
        Self { aggregator, store, config, guard: tokio::sync::Mutex::new(()), last: ArcSwapOption::empty() }
    }

    pub fn store(&self) -> &Arc<RankingStore> { &self.store }
    pub fn config(&self) -> &EngineConfig { &self.config }
    pub fn last_status(&self) -> Option<Arc<CycleStatus>> { self.last.load_full() }

    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle as of `now`, which becomes the list's publish time.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport, CycleError> {
        let Ok(_running) = self.guard.try_lock() else {
            warn!("cycle: previous cycle still running; skipping");
            counter!("ranking_cycles_total", 1u64, "outcome" => "busy");
            return Err(CycleError::Busy);
        };
        let cycle_id = Uuid::new_v4();
        let started = Instant::now();
        info!(%cycle_id, "cycle: start");

        let res = self.execute(cycle_id, now, started).await;
        histogram!("ranking_cycle_ms", started.elapsed().as_secs_f64() * 1000.0);
        let status = match &res {
            Ok(r) => {
                counter!("ranking_cycles_total", 1u64, "outcome" => "ok");
                info!(%cycle_id, epoch = r.epoch, candidates = r.candidates, skipped = r.skipped, published = r.published, took_ms = %r.took.as_millis(), "cycle: published");
                CycleStatus { cycle_id, finished_at: Utc::now(), ok: true, epoch: r.epoch, message: None }
            }
            Err(e) => {
                counter!("ranking_cycles_total", 1u64, "outcome" => e.label());
                error!(%cycle_id, error = %e, took_ms = %started.elapsed().as_millis(), "cycle: failed; previous list stays current");
                CycleStatus { cycle_id, finished_at: Utc::now(), ok: false, epoch: self.store.epoch(), message: Some(e.to_string()) }
            }
        };
        self.last.store(Some(Arc::new(status)));
        res
    }

    async fn execute(&self, cycle_id: Uuid, now: DateTime<Utc>, started: Instant) -> Result<CycleReport, CycleError> {
        let previous = self.store.current();
        let timeout = self.config.cycle_timeout;

        let build = async {
            let agg = self.aggregator.collect(now).await.map_err(CycleError::Aggregation)?;
            let scored: Vec<Scored> = agg
                .signals
                .iter()
                .map(|(item, s)| Scored { item_id: item.id, score: trending_score(s) })
                .collect();
            let candidates = scored.len();
            let list = rank::build_ranked_list(scored, &previous, self.config.chart_size, previous.epoch + 1, now);
            Ok::<_, CycleError>((list, candidates, agg.skipped.len()))
        };
        let (list, candidates, skipped) = match tokio::time::timeout(timeout, build).await {
            Ok(built) => built?,
            Err(_) => return Err(CycleError::TimedOut(timeout)),
        };

        let entrants = list.entries.iter().filter(|e| e.previous_rank.is_none()).count();
        // The mirror write is blocking I/O; it runs off the runtime and is not
        // cut short by the cycle timeout.
        let store = Arc::clone(&self.store);
        let published = tokio::task::spawn_blocking(move || store.publish(list))
            .await
            .map_err(|e| PublishError::Mirror(anyhow::Error::new(e).context("publish task did not finish")))??;
        gauge!("ranking_new_entrants", entrants as f64);
        gauge!("ranking_published_entries", published.len() as f64);
        info!(%cycle_id, epoch = published.epoch, entrants, "cycle: swap done");
        Ok(CycleReport { cycle_id, epoch: published.epoch, candidates, skipped, published: published.len(), took: started.elapsed() })
    }
}
