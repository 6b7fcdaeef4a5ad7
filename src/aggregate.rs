//! In-memory comment counts keyed by (community, calendar bucket), flushed to a sink
//! whenever the map grows past a key threshold or a number of chunks has elapsed.

use crate::error::Result;
use ahash::AHashMap;
use time::macros::format_description;
use time::OffsetDateTime;

/// Sub-month part of a bucket key. All UTC.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FineSlot {
    pub week: u8, // ((day - 1) / 7) + 1, so 1..=5
    pub day: u8,
    pub hour: u8,
    pub date: String, // YYYY-MM-DD
}

/// Composite bucket identity. `fine == None` is a coarse whole-month bucket.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub identifier: String,
    pub year: u16,
    pub month: u8,
    pub fine: Option<FineSlot>,
}

impl BucketKey {
    pub fn coarse(identifier: impl Into<String>, year: u16, month: u8) -> Self {
        Self { identifier: identifier.into(), year, month, fine: None }
    }

    /// Fine key for an epoch timestamp; None if the timestamp is not representable.
    pub fn from_timestamp(identifier: &str, ts: i64) -> Option<Self> {
        let dt = OffsetDateTime::from_unix_timestamp(ts).ok()?;
        let year = u16::try_from(dt.year()).ok()?;
        let day = dt.day();
        let date = dt
            .date()
            .format(format_description!("[year]-[month]-[day]"))
            .ok()?;
        Some(Self {
            identifier: identifier.to_string(),
            year,
            month: u8::from(dt.month()),
            fine: Some(FineSlot { week: (day - 1) / 7 + 1, day, hour: dt.hour(), date }),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketCount {
    pub key: BucketKey,
    pub count: u64,
}

/// Destination of a flush. The store implements this; tests can use a Vec.
pub trait BucketSink {
    /// Persist every row; returns the number written.
    fn write_buckets(&mut self, rows: &[BucketCount]) -> Result<usize>;
}

impl BucketSink for Vec<BucketCount> {
    fn write_buckets(&mut self, rows: &[BucketCount]) -> Result<usize> {
        self.extend_from_slice(rows);
        Ok(rows.len())
    }
}

/// When to flush the map.
#[derive(Clone, Copy, Debug)]
pub struct FlushPolicy {
    pub max_keys: usize,
    pub every_chunks: usize,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self { max_keys: 100_000, every_chunks: 50 }
    }
}

#[derive(Default)]
pub struct BucketAggregator {
    counts: AHashMap<BucketKey, u64>,
    policy: FlushPolicy,
    chunks_since_flush: usize,
    flushes: u64,
    rows_written: u64,
}

impl BucketAggregator {
    pub fn new(policy: FlushPolicy) -> Self {
        Self { policy, ..Default::default() }
    }

    /// Count one admitted record. Returns false if its timestamp cannot be bucketed.
    pub fn observe(&mut self, identifier: &str, ts: i64) -> bool {
        match BucketKey::from_timestamp(identifier, ts) {
            Some(key) => {
                *self.counts.entry(key).or_insert(0) += 1;
                true
            }
            None => false,
        }
    }

    pub fn over_key_limit(&self) -> bool {
        self.counts.len() > self.policy.max_keys
    }

    /// Flush if the key threshold is exceeded. Call after each observation.
    pub fn flush_if_full<S: BucketSink>(&mut self, sink: &mut S) -> Result<bool> {
        if self.over_key_limit() {
            self.flush(sink)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Mark the end of a processing chunk; flushes when either threshold is reached.
    pub fn end_chunk<S: BucketSink>(&mut self, sink: &mut S) -> Result<bool> {
        self.chunks_since_flush += 1;
        if self.chunks_since_flush >= self.policy.every_chunks || self.over_key_limit() {
            self.flush(sink)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Write the whole map to `sink` and clear it. An empty map is a no-op flush.
    /// The map is only cleared once the sink accepted every row.
    pub fn flush<S: BucketSink>(&mut self, sink: &mut S) -> Result<usize> {
        self.chunks_since_flush = 0;
        self.flushes += 1;
        if self.counts.is_empty() {
            return Ok(0);
        }
        let mut rows: Vec<BucketCount> = self
            .counts
            .iter()
            .map(|(k, &count)| BucketCount { key: k.clone(), count })
            .collect();
        rows.sort_unstable_by(|a, b| a.key.cmp(&b.key));
        let written = sink.write_buckets(&rows)?;
        tracing::debug!(rows = written, "flushed bucket counts");
        self.counts.clear();
        self.rows_written += written as u64;
        Ok(written)
    }

    /// Final unconditional flush at end of stream.
    pub fn finish<S: BucketSink>(&mut self, sink: &mut S) -> Result<usize> {
        self.flush(sink)
    }

    pub fn pending_keys(&self) -> usize {
        self.counts.len()
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}
