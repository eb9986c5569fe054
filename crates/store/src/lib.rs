//! Tempo store: holds the one current ranked list.
//!
//! Readers load an `Arc` snapshot without locking. Publishing builds nothing in
//! place: the caller hands over a complete list and the store swaps a single
//! pointer, so a reader sees either the old list or the new one.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Context;
use arc_swap::ArcSwap;
use metrics::{counter, gauge, histogram};
use tempo_core::{ChartMirror, ListError, RankedList};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("stale publish: epoch {attempted} is not newer than current epoch {current}")]
    Stale { current: u64, attempted: u64 },
    #[error("invalid list: {0}")]
    Invalid(#[from] ListError),
    #[error("durable mirror write failed: {0:#}")]
    Mirror(#[source] anyhow::Error),
}

pub struct RankingStore {
    current: ArcSwap<RankedList>,
    epoch_tx: watch::Sender<u64>,
    mirror: Option<Arc<dyn ChartMirror>>,
    // Held by publishers only; readers never touch it.
    write: Mutex<()>,
}

impl Default for RankingStore {
    fn default() -> Self { Self::new() }
}

impl RankingStore {
    /// Store serving the empty epoch-0 list.
    pub fn new() -> Self {
        let (epoch_tx, _rx) = watch::channel(0u64);
        Self {
            current: ArcSwap::from_pointee(RankedList::empty()),
            epoch_tx,
            mirror: None,
            write: Mutex::new(()),
        }
    }

    /// Every publish is written to `mirror` before it becomes current.
    pub fn with_mirror(mirror: Arc<dyn ChartMirror>) -> Self {
        let mut me = Self::new();
        me.mirror = Some(mirror);
        me
    }

    /// Complete snapshot of the current list.
    pub fn current(&self) -> Arc<RankedList> { self.current.load_full() }

    pub fn epoch(&self) -> u64 { self.current.load().epoch }

    /// Receiver notified with the epoch of every publish.
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_tx.subscribe() }

    /// Replace the current list. On any error the previous list stays current.
    pub fn publish(&self, list: RankedList) -> Result<Arc<RankedList>, PublishError> {
        let started = Instant::now();
        let _w = self.write.lock().unwrap_or_else(|e| e.into_inner());
        let cur = self.current.load().epoch;
        if list.epoch <= cur {
            counter!("chart_publish_total", 1u64, "outcome" => "stale");
            return Err(PublishError::Stale { current: cur, attempted: list.epoch });
        }
        if let Err(e) = list.validate() {
            counter!("chart_publish_total", 1u64, "outcome" => "invalid");
            return Err(e.into());
        }
        if let Some(m) = &self.mirror {
            if let Err(e) = m.persist(&list) {
                counter!("chart_publish_total", 1u64, "outcome" => "mirror_failed");
                return Err(PublishError::Mirror(e));
            }
        }
        let next = Arc::new(list);
        self.current.store(Arc::clone(&next));
        self.epoch_tx.send_replace(next.epoch);

        counter!("chart_publish_total", 1u64, "outcome" => "ok");
        gauge!("chart_epoch", next.epoch as f64);
        gauge!("chart_entries", next.len() as f64);
        histogram!("chart_publish_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(epoch = next.epoch, entries = next.len(), "store: published");
        Ok(next)
    }

    /// Load the mirror's last list and make it current, so a restarted process
    /// keeps serving it and diffs the next cycle against it. Returns the
    /// restored epoch, if any.
    pub fn warm_start(&self) -> anyhow::Result<Option<u64>> {
        let Some(m) = &self.mirror else { return Ok(None) };
        let Some(list) = m.load().context("loading mirrored chart")? else {
            info!("store: no mirrored chart; starting empty");
            return Ok(None);
        };
        let _w = self.write.lock().unwrap_or_else(|e| e.into_inner());
        if list.epoch <= self.current.load().epoch {
            return Ok(None);
        }
        if let Err(e) = list.validate() {
            // Serve nothing, but keep the mirrored epoch so the next publish
            // is newer than what the mirror already holds.
            warn!(error = %e, epoch = list.epoch, "store: mirrored chart failed validation; serving empty");
            let epoch = list.epoch;
            self.current.store(Arc::new(RankedList { epoch, ..RankedList::empty() }));
            self.epoch_tx.send_replace(epoch);
            gauge!("chart_epoch", epoch as f64);
            gauge!("chart_entries", 0.0);
            return Ok(None);
        }
        let epoch = list.epoch;
        let entries = list.len();
        self.current.store(Arc::new(list));
        self.epoch_tx.send_replace(epoch);
        gauge!("chart_epoch", epoch as f64);
        gauge!("chart_entries", entries as f64);
        info!(epoch, entries, "store: warm start from mirror");
        Ok(Some(epoch))
    }
}
