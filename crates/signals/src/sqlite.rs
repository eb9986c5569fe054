//! SQLite-backed catalog and engagement source. Read-only at runtime;
//! `ensure_schema` exists for dev databases and tests.
//!
//! rusqlite blocks, so every read runs on the blocking pool. The calling
//! future stays cancellable and a locked database cannot stall the runtime.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use metrics::{counter, histogram};
use rusqlite::{Connection, OpenFlags};
use tempo_core::{CatalogItem, ItemId};
use tracing::warn;

use crate::{CatalogSource, EngagementSource};

/// Tables: `songs(id, created_at, approved)`, `listens(song_id, listened_at)`,
/// `likes(song_id, user_id)`. Timestamps are unix seconds.
pub struct SqliteSignals {
    db: Arc<Mutex<Connection>>,
}

impl SqliteSignals {
    pub fn open(path: &str) -> Result<Self> {
        let db = Connection::open(path).with_context(|| format!("opening signals db at {}", path))?;
        Ok(Self { db: Arc::new(Mutex::new(db)) })
    }

    pub fn open_read_only(path: &str) -> Result<Self> {
        let db = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("opening signals db read-only at {}", path))?;
        Ok(Self { db: Arc::new(Mutex::new(db)) })
    }

    pub fn ensure_schema(&self) -> Result<()> {
        let db = lock(&self.db)?;
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS songs (
                id         INTEGER PRIMARY KEY,
                created_at INTEGER NOT NULL,
                approved   INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS listens (
                song_id     INTEGER NOT NULL,
                listened_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_listens_song_at ON listens(song_id, listened_at);
            CREATE TABLE IF NOT EXISTS likes (
                song_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                PRIMARY KEY (song_id, user_id)
            );",
        )
        .context("creating signals schema")?;
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let conn = lock(&db)?;
            f(&conn)
        })
        .await
        .context("joining signals read task")?
    }
}

fn lock(db: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>> {
    db.lock().map_err(|_| anyhow!("signals db mutex poisoned"))
}

fn count(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<u64> {
    let n: i64 = conn.query_row(sql, params, |row| row.get(0))?;
    Ok(n.max(0) as u64)
}

#[async_trait::async_trait]
impl CatalogSource for SqliteSignals {
    async fn approved_items(&self) -> Result<Vec<CatalogItem>> {
        let started = Instant::now();
        let out = self
            .with_conn(|db| {
                let mut stmt = db.prepare("SELECT id, created_at FROM songs WHERE approved = 1 ORDER BY id")?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let id: i64 = row.get(0)?;
                    let created: i64 = row.get(1)?;
                    match from_unix(created) {
                        Some(created_at) => out.push(CatalogItem { id: ItemId(id), created_at }),
                        None => {
                            warn!(item = id, created, "signals: song has unusable created_at; skipping");
                            counter!("signal_catalog_rows_skipped_total", 1u64);
                        }
                    }
                }
                Ok(out)
            })
            .await?;
        histogram!("signal_catalog_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }
}

#[async_trait::async_trait]
impl EngagementSource for SqliteSignals {
    async fn listens_since(&self, item: ItemId, since: DateTime<Utc>) -> Result<u64> {
        let since = since.timestamp();
        self.with_conn(move |db| {
            count(db, "SELECT COUNT(*) FROM listens WHERE song_id = ?1 AND listened_at >= ?2", (item.0, since))
        })
        .await
        .with_context(|| format!("counting listens for item {}", item))
    }

    async fn total_likes(&self, item: ItemId) -> Result<u64> {
        self.with_conn(move |db| count(db, "SELECT COUNT(*) FROM likes WHERE song_id = ?1", [item.0]))
            .await
            .with_context(|| format!("counting likes for item {}", item))
    }
}

fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}
