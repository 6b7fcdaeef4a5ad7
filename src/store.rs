//! SQLite persistence for bucket counts: schema, transaction profiles, batched upserts,
//! and the read helpers used by validation and the query layer.

use crate::aggregate::{BucketCount, BucketSink};
use crate::date::YearMonth;
use crate::error::{IngestError, Result};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS comment_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subreddit TEXT NOT NULL,
    year INTEGER NOT NULL,
    month INTEGER NOT NULL,
    week INTEGER,
    day INTEGER,
    hour INTEGER,
    comment_count INTEGER NOT NULL,
    period_date TEXT,
    UNIQUE(subreddit, year, month, week, day, hour)
);
CREATE INDEX IF NOT EXISTS idx_comment_history_subreddit ON comment_history(subreddit);
CREATE INDEX IF NOT EXISTS idx_comment_history_month ON comment_history(year, month);
CREATE INDEX IF NOT EXISTS idx_comment_history_day ON comment_history(year, month, day);
CREATE INDEX IF NOT EXISTS idx_comment_history_date ON comment_history(period_date);
";

const UPSERT_FINE_REPLACE: &str = "
INSERT OR REPLACE INTO comment_history
    (subreddit, year, month, week, day, hour, comment_count, period_date)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

const UPSERT_FINE_ACCUMULATE: &str = "
INSERT INTO comment_history
    (subreddit, year, month, week, day, hour, comment_count, period_date)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
ON CONFLICT(subreddit, year, month, week, day, hour)
DO UPDATE SET comment_count = comment_count + excluded.comment_count,
              period_date = excluded.period_date";

// NULLs are distinct under UNIQUE, so coarse rows are replaced by delete + insert.
const COARSE_PREVIOUS: &str = "
SELECT COALESCE(SUM(comment_count), 0) FROM comment_history
WHERE subreddit = ?1 AND year = ?2 AND month = ?3
  AND week IS NULL AND day IS NULL AND hour IS NULL";

const COARSE_DELETE: &str = "
DELETE FROM comment_history
WHERE subreddit = ?1 AND year = ?2 AND month = ?3
  AND week IS NULL AND day IS NULL AND hour IS NULL";

const COARSE_INSERT: &str = "
INSERT INTO comment_history
    (subreddit, year, month, week, day, hour, comment_count, period_date)
VALUES (?1, ?2, ?3, NULL, NULL, NULL, ?4, NULL)";

/// How a write treats an existing row with the same key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertMode {
    /// Insert-or-replace: last writer wins.
    Replace,
    /// Add to the stored count.
    Accumulate,
}

/// Connection tuning for the two phases of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreProfile {
    /// Bulk load: no fsync, in-memory temp tables, large page cache.
    Bulk,
    /// Normal operation: full fsync, default temp store and page cache.
    Durable,
}

/// Sub-month granularity for `Store::series`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Granularity {
    Week,
    Day,
    Hour,
}

impl Granularity {
    fn column(self) -> &'static str {
        match self {
            Granularity::Week => "week",
            Granularity::Day => "day",
            Granularity::Hour => "hour",
        }
    }
}

pub struct Store {
    conn: Connection,
    batch_size: usize,
    path: PathBuf,
}

impl Store {
    /// Open (or create) the database, switch to WAL and ensure the schema exists.
    pub fn open(path: &Path, batch_size: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(30))?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "store opened");
        Ok(Self { conn, batch_size: batch_size.max(1), path: path.to_path_buf() })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn apply_profile(&self, profile: StoreProfile) -> Result<()> {
        let sql = match profile {
            StoreProfile::Bulk => {
                "PRAGMA synchronous = OFF; PRAGMA temp_store = MEMORY; PRAGMA cache_size = -50000;"
            }
            StoreProfile::Durable => {
                "PRAGMA synchronous = FULL; PRAGMA temp_store = DEFAULT; PRAGMA cache_size = -2000;"
            }
        };
        self.conn.execute_batch(sql)?;
        tracing::debug!(?profile, "store profile applied");
        Ok(())
    }

    /// Delete every fine row of one period, atomically. Coarse rows are kept.
    pub fn clear_fine_period(&mut self, ym: YearMonth) -> Result<usize> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let n = delete_fine_period(&tx, ym)?;
        tx.commit()?;
        Ok(n)
    }

    /// Upsert rows in IMMEDIATE transactions of `batch_size`, so concurrent runs wait on the
    /// busy timeout. A failing batch is rolled back and surfaces as `StoreWrite`; earlier
    /// batches stay committed.
    pub fn write_buckets(&mut self, rows: &[BucketCount], mode: UpsertMode) -> Result<usize> {
        self.write_batches(rows, mode, None).map(|(written, _)| written)
    }

    /// As `write_buckets`, but when `clear` is set the period's fine rows are deleted inside
    /// the first batch's transaction. Returns `(rows written, rows cleared)`.
    fn write_batches(
        &mut self,
        rows: &[BucketCount],
        mode: UpsertMode,
        mut clear: Option<YearMonth>,
    ) -> Result<(usize, usize)> {
        let mut written = 0;
        let mut cleared = 0;
        for batch in rows.chunks(self.batch_size) {
            let tx = self
                .conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|source| IngestError::StoreWrite { rows: batch.len(), source })?;
            let n = clear
                .map_or(Ok(0), |ym| delete_fine_period(&tx, ym))
                .and_then(|n| write_batch(&tx, batch, mode).map(|()| n))
                .and_then(|n| tx.commit().map(|()| n))
                .map_err(|source| IngestError::StoreWrite { rows: batch.len(), source })?;
            clear = None;
            cleared += n;
            written += batch.len();
        }
        Ok((written, cleared))
    }

    /// A sink that replaces `ym`'s fine rows: the old rows are deleted in the same
    /// transaction as the first batch written, or by `StoreSink::finish` if nothing was.
    pub fn replacing_sink(&mut self, ym: YearMonth, mode: UpsertMode) -> StoreSink<'_> {
        StoreSink { store: self, mode, pending_clear: Some(ym), cleared: 0 }
    }

    /// Drop and rebuild `comment_count_YYYY_MM(subreddit, month_comment_count)`.
    pub fn replace_month_table(&mut self, ym: YearMonth, totals: &BTreeMap<String, u64>) -> Result<usize> {
        let table = format!("comment_count_{}", ym.table_suffix());
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table};
             CREATE TABLE {table} (subreddit TEXT PRIMARY KEY, month_comment_count INTEGER);"
        ))?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR REPLACE INTO {table} (subreddit, month_comment_count) VALUES (?1, ?2)"
            ))?;
            for (name, count) in totals {
                stmt.execute(params![name, to_sql_count(*count)])?;
            }
        }
        tx.commit()
            .map_err(|source| IngestError::StoreWrite { rows: totals.len(), source })?;
        Ok(totals.len())
    }

    /// `(bucket, total)` for one community and period, grouped by `granularity`.
    pub fn series(&self, identifier: &str, ym: YearMonth, granularity: Granularity) -> Result<Vec<(u8, u64)>> {
        let col = granularity.column();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {col}, SUM(comment_count) FROM comment_history
             WHERE subreddit = ?1 AND year = ?2 AND month = ?3 AND {col} IS NOT NULL
             GROUP BY {col} ORDER BY {col}"
        ))?;
        let rows = stmt.query_map(params![identifier, ym.year, ym.month], |row| {
            Ok((row.get::<_, u8>(0)?, row.get::<_, i64>(1)?.max(0) as u64))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Sum of fine rows for one community and period (0 if none).
    pub fn fine_month_total(&self, identifier: &str, ym: YearMonth) -> Result<u64> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(comment_count), 0) FROM comment_history
             WHERE subreddit = ?1 AND year = ?2 AND month = ?3 AND week IS NOT NULL",
            params![identifier, ym.year, ym.month],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }

    /// The coarse monthly row for one community and period, if loaded.
    pub fn coarse_month_total(&self, identifier: &str, ym: YearMonth) -> Result<Option<u64>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT comment_count FROM comment_history
             WHERE subreddit = ?1 AND year = ?2 AND month = ?3
               AND week IS NULL AND day IS NULL AND hour IS NULL",
        )?;
        let mut rows = stmt.query(params![identifier, ym.year, ym.month])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get::<_, i64>(0)?.max(0) as u64)),
            None => Ok(None),
        }
    }
}

fn to_sql_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn delete_fine_period(tx: &Transaction<'_>, ym: YearMonth) -> rusqlite::Result<usize> {
    tx.execute(
        "DELETE FROM comment_history WHERE year = ?1 AND month = ?2 AND week IS NOT NULL",
        params![ym.year, ym.month],
    )
}

fn write_batch(tx: &Transaction<'_>, batch: &[BucketCount], mode: UpsertMode) -> rusqlite::Result<()> {
    let fine_sql = match mode {
        UpsertMode::Replace => UPSERT_FINE_REPLACE,
        UpsertMode::Accumulate => UPSERT_FINE_ACCUMULATE,
    };
    let mut fine = tx.prepare_cached(fine_sql)?;
    for row in batch {
        let k = &row.key;
        let count = to_sql_count(row.count);
        match &k.fine {
            Some(slot) => {
                fine.execute(params![
                    k.identifier, k.year, k.month, slot.week, slot.day, slot.hour, count, slot.date
                ])?;
            }
            None => {
                let previous: i64 = match mode {
                    UpsertMode::Replace => 0,
                    UpsertMode::Accumulate => tx.query_row(
                        COARSE_PREVIOUS,
                        params![k.identifier, k.year, k.month],
                        |r| r.get(0),
                    )?,
                };
                tx.prepare_cached(COARSE_DELETE)?.execute(params![k.identifier, k.year, k.month])?;
                tx.prepare_cached(COARSE_INSERT)?
                    .execute(params![k.identifier, k.year, k.month, previous.saturating_add(count)])?;
            }
        }
    }
    Ok(())
}

/// `BucketSink` over a store with a fixed write mode that replaces one period's fine rows.
pub struct StoreSink<'a> {
    store: &'a mut Store,
    mode: UpsertMode,
    pending_clear: Option<YearMonth>,
    cleared: usize,
}

impl StoreSink<'_> {
    /// Run a period clear that no flush has carried yet. Returns the rows cleared overall.
    pub fn finish(mut self) -> Result<usize> {
        if let Some(ym) = self.pending_clear.take() {
            self.cleared += self.store.clear_fine_period(ym)?;
        }
        Ok(self.cleared)
    }
}

impl BucketSink for StoreSink<'_> {
    fn write_buckets(&mut self, rows: &[BucketCount]) -> Result<usize> {
        let (written, cleared) = self.store.write_batches(rows, self.mode, self.pending_clear)?;
        if written > 0 {
            self.pending_clear = None;
        }
        self.cleared += cleared;
        Ok(written)
    }
}
