//! Tempo persistence: SQLite mirror of the current chart.
//!
//! Rows are tagged with the epoch that produced them and `chart_head` names the
//! current epoch. A publish inserts the new epoch's rows and moves the head in
//! one transaction; readers only ever select rows of the head epoch. At most
//! two generations are kept on disk.

#![forbid(unsafe_code)]

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use metrics::{counter, histogram};
use tempo_core::{ChartMirror, ItemId, RankEntry, RankedList};
use tracing::{debug, info};

/// SQLite-backed chart mirror. Simple and synchronous; it runs once per cycle.
pub struct SqliteChartStore {
    db: std::sync::Mutex<rusqlite::Connection>,
}

impl SqliteChartStore {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("TEMPO_DB_PATH").unwrap_or_else(|_| default_db_path("chart.db"));
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", &"WAL").ok();
        db.pragma_update(None, "synchronous", &"NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS chart_entries (
                epoch         INTEGER NOT NULL,
                item_id       INTEGER NOT NULL,
                rank          INTEGER NOT NULL,
                previous_rank INTEGER,
                score         REAL NOT NULL,
                published_at  INTEGER NOT NULL,
                PRIMARY KEY (epoch, item_id)
            )",
            [],
        ).context("creating chart_entries table")?;
        db.execute(
            "CREATE TABLE IF NOT EXISTS chart_head (
                id           INTEGER PRIMARY KEY CHECK (id = 1),
                epoch        INTEGER NOT NULL,
                published_at INTEGER NOT NULL
            )",
            [],
        ).context("creating chart_head table")?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_chart_entries_epoch_rank ON chart_entries(epoch, rank)",
            [],
        ).ok();
        let me = Self { db: std::sync::Mutex::new(db) };
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(path = %path, "persist: chart db open");
        Ok(me)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.db.lock().map_err(|_| anyhow!("chart db mutex poisoned"))
    }

    /// Epochs that still have rows on disk, ascending.
    pub fn epochs_on_disk(&self) -> Result<Vec<u64>> {
        let db = self.lock()?;
        let mut stmt = db.prepare("SELECT DISTINCT epoch FROM chart_entries ORDER BY epoch")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let e: i64 = row.get(0)?;
            out.push(e as u64);
        }
        Ok(out)
    }
}

impl ChartMirror for SqliteChartStore {
    fn persist(&self, list: &RankedList) -> Result<()> {
        let started = std::time::Instant::now();
        let published_at = list.published_at.ok_or_else(|| anyhow!("refusing to persist an unpublished list"))?;
        let epoch = list.epoch as i64;
        let mut db = self.lock()?;
        let tx = db.transaction()?;
        let head: Option<i64> = tx
            .query_row("SELECT epoch FROM chart_head WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        if let Some(h) = head {
            if epoch <= h {
                bail!("stale persist: epoch {} is not newer than stored epoch {}", epoch, h);
            }
        }
        // Leftovers from an attempt that never became head.
        tx.execute("DELETE FROM chart_entries WHERE epoch = ?1", [epoch])?;
        {
            let mut ins = tx.prepare(
                "INSERT INTO chart_entries(epoch, item_id, rank, previous_rank, score, published_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for e in list.entries.iter() {
                ins.execute((
                    epoch,
                    e.item_id.0,
                    e.rank as i64,
                    e.previous_rank.map(|r| r as i64),
                    e.score,
                    e.published_at.timestamp_millis(),
                ))?;
            }
        }
        tx.execute(
            "INSERT INTO chart_head(id, epoch, published_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET epoch = excluded.epoch, published_at = excluded.published_at",
            (epoch, published_at.timestamp_millis()),
        )?;
        // Keep the new head and the generation it replaced.
        let keep_prev = head.unwrap_or(epoch);
        let pruned = tx.execute(
            "DELETE FROM chart_entries WHERE epoch <> ?1 AND epoch <> ?2",
            (epoch, keep_prev),
        )?;
        tx.commit()?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        debug!(epoch, entries = list.len(), pruned, "persist: chart written");
        Ok(())
    }

    fn load(&self) -> Result<Option<RankedList>> {
        let started = std::time::Instant::now();
        let mut db = self.lock()?;
        // One read transaction: head and rows come from the same generation.
        let tx = db.transaction()?;
        let head: Option<(i64, i64)> = tx
            .query_row("SELECT epoch, published_at FROM chart_head WHERE id = 1", [], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        let Some((epoch, published_ms)) = head else { return Ok(None) };
        let published_at = from_millis(published_ms)?;
        let mut entries = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT item_id, rank, previous_rank, score, published_at
                 FROM chart_entries WHERE epoch = ?1 ORDER BY rank",
            )?;
            let mut rows = stmt.query([epoch])?;
            while let Some(row) = rows.next()? {
                let item_id: i64 = row.get(0)?;
                let rank: i64 = row.get(1)?;
                let previous_rank: Option<i64> = row.get(2)?;
                let score: f64 = row.get(3)?;
                let at: i64 = row.get(4)?;
                entries.push(RankEntry {
                    item_id: ItemId(item_id),
                    rank: rank as u32,
                    previous_rank: previous_rank.map(|r| r as u32),
                    score,
                    published_at: from_millis(at)?,
                });
            }
        }
        tx.commit()?;
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(Some(RankedList { epoch: epoch as u64, published_at: Some(published_at), entries }))
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single().ok_or_else(|| anyhow!("invalid timestamp {}ms", ms))
}

/// `$HOME/.tempo/<file>`, or `<file>` in the working directory without a home.
pub fn default_db_path(file: &str) -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".tempo");
        let _ = std::fs::create_dir_all(&p);
        p.push(file);
        return p.to_string_lossy().to_string();
    }
    file.to_string()
}
