use crate::aggregate::{BucketAggregator, FlushPolicy};
use crate::allowlist::AllowList;
use crate::concurrency::for_each_archive_limited;
use crate::config::IngestOptions;
use crate::date::YearMonth;
use crate::error::{IngestError, Result};
use crate::filters::Admission;
use crate::mem::MemoryWatch;
use crate::monthly::load_monthly_totals;
use crate::paths::{ArchiveJob, ArchiveNaming};
use crate::progress::{archive_progress_bar, compressed_size};
use crate::record::{FilterReason, LineOutcome};
use crate::store::{Store, StoreProfile, UpsertMode};
use crate::util::init_tracing_once;
use crate::validate::{validate_monthly_totals, ValidationReport};
use crate::zstd_lines::open_archive;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counters and outcome of one archive run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunSummary {
    pub archive: PathBuf,
    pub period: Option<YearMonth>,
    pub lines: u64,
    pub admitted: u64,
    pub skipped_parse: u64,
    pub skipped_filter: u64,
    pub not_allowed: u64,
    pub outside_window: u64,
    pub communities: usize,
    pub rows_written: u64,
    pub flushes: u64,
    pub memory_pauses: u64,
    pub discarded_tail_bytes: u64,
    pub cleared_rows: u64,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub community_totals: BTreeMap<String, u64>,
    pub validation: Option<ValidationReport>,
}

impl RunSummary {
    pub fn skipped(&self) -> u64 {
        self.skipped_parse + self.skipped_filter
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

/// Entry point: configure with builder methods, then ingest archives.
#[derive(Clone, Default)]
pub struct CommentCounter {
    pub(crate) opts: IngestOptions,
}

impl CommentCounter {
    pub fn new() -> Self {
        Self { opts: IngestOptions::default() }
    }

    pub fn with_options(opts: IngestOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &IngestOptions {
        &self.opts
    }

    // -------- Builder methods --------
    pub fn database(mut self, path: impl AsRef<Path>) -> Self { self.opts = self.opts.with_db_path(path); self }
    pub fn allowlist(mut self, path: impl AsRef<Path>) -> Self { self.opts = self.opts.with_allowlist(path); self }
    pub fn archive_naming(mut self, prefix: impl Into<String>, ext: impl Into<String>) -> Self { self.opts = self.opts.with_archive_naming(prefix, ext); self }
    pub fn batch_size(mut self, rows: usize) -> Self { self.opts = self.opts.with_batch_size(rows); self }
    pub fn flush_max_keys(mut self, keys: usize) -> Self { self.opts = self.opts.with_flush_max_keys(keys); self }
    pub fn chunking(mut self, lines_per_chunk: usize, flush_every_chunks: usize) -> Self { self.opts = self.opts.with_chunking(lines_per_chunk, flush_every_chunks); self }
    pub fn read_chunk_bytes(mut self, bytes: usize) -> Self { self.opts = self.opts.with_read_chunk_bytes(bytes); self }
    pub fn window_log_max(mut self, log: u32) -> Self { self.opts = self.opts.with_window_log_max(log); self }
    pub fn month_table(mut self, yes: bool) -> Self { self.opts = self.opts.with_month_table(yes); self }
    pub fn validation(mut self, yes: bool) -> Self { self.opts = self.opts.with_validation(yes); self }
    pub fn file_concurrency(mut self, n: usize) -> Self { self.opts = self.opts.with_file_concurrency(n); self }
    pub fn parallelism(mut self, threads: usize) -> Self { self.opts = self.opts.with_parallelism(threads); self }
    pub fn progress(mut self, yes: bool) -> Self { self.opts = self.opts.with_progress(yes); self }
    pub fn progress_label(mut self, label: impl Into<String>) -> Self { self.opts = self.opts.with_progress_label(label); self }
    pub fn low_memory_fraction(mut self, frac: f64) -> Self { self.opts = self.opts.with_low_memory_fraction(frac); self }
    pub fn cancel_flag(mut self, flag: Arc<std::sync::atomic::AtomicBool>) -> Self { self.opts = self.opts.with_cancel_flag(flag); self }

    // -------- Operations --------

    pub fn load_allowlist(&self) -> Result<AllowList> {
        AllowList::from_csv_path(&self.opts.allowlist_path)
    }

    fn naming(&self) -> Result<ArchiveNaming> {
        ArchiveNaming::new(&self.opts.archive_prefix, &self.opts.archive_extension)
    }

    /// Ingest one archive: configuration is resolved before the store is touched.
    pub fn ingest_archive(&self, path: &Path) -> Result<RunSummary> {
        init_tracing_once();
        let job = self.naming()?.job_for(path)?;
        let allow = self.load_allowlist()?;
        self.run_job(&allow, &job)
    }

    /// Same as `ingest_archive` with an allow-list the caller already loaded.
    pub fn ingest_with_allowlist(&self, allow: &AllowList, path: &Path) -> Result<RunSummary> {
        init_tracing_once();
        let job = self.naming()?.job_for(path)?;
        self.run_job(allow, &job)
    }

    /// Ingest several archives as independent runs, `file_concurrency` at a time.
    /// Every name is checked and the allow-list loaded before the first run starts; two
    /// archives for the same period are a configuration error.
    pub fn ingest_archives<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<RunSummary>> {
        init_tracing_once();
        let naming = self.naming()?;
        let mut jobs = paths
            .iter()
            .map(|p| naming.job_for(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        jobs.sort_by(|a, b| a.ym.cmp(&b.ym).then_with(|| a.path.cmp(&b.path)));
        // Each run replaces its period, so two archives for one period cannot both count.
        if let Some(pair) = jobs.windows(2).find(|w| w[0].ym == w[1].ym) {
            return Err(IngestError::config(format!(
                "archives {} and {} both cover {}",
                pair[0].path.display(),
                pair[1].path.display(),
                pair[0].ym
            )));
        }
        self.run_jobs(&jobs)
    }

    /// Ingest every `<prefix>YYYY-MM<ext>` archive found directly inside `dir`.
    pub fn ingest_dir(&self, dir: &Path) -> Result<Vec<RunSummary>> {
        init_tracing_once();
        let jobs = self.naming()?.discover(dir);
        if jobs.is_empty() {
            tracing::warn!(dir = %dir.display(), "no archives found matching the naming pattern");
        } else {
            tracing::info!(dir = %dir.display(), archives = jobs.len(), "planned archives");
        }
        self.run_jobs(&jobs)
    }

    /// Load a `subreddit,comment_count` CSV as coarse totals for `ym`.
    /// Restricted to the allow-list when the configured allow-list file exists.
    pub fn load_monthly_totals(&self, csv_path: &Path, ym: YearMonth) -> Result<usize> {
        init_tracing_once();
        let allow = if self.opts.allowlist_path.exists() { Some(self.load_allowlist()?) } else { None };
        let mut store = Store::open(&self.opts.db_path, self.opts.batch_size)?;
        store.apply_profile(StoreProfile::Bulk)?;
        let res = load_monthly_totals(&mut store, csv_path, ym, allow.as_ref());
        let restored = store.apply_profile(StoreProfile::Durable);
        let n = res?;
        restored?;
        Ok(n)
    }

    /// Validation pass over the configured store, optionally scoped to one period.
    pub fn validate(&self, scope: Option<YearMonth>) -> Result<ValidationReport> {
        init_tracing_once();
        let store = Store::open(&self.opts.db_path, self.opts.batch_size)?;
        validate_monthly_totals(store.connection(), scope)
    }

    fn run_jobs(&self, jobs: &[ArchiveJob]) -> Result<Vec<RunSummary>> {
        if let Some(n) = self.opts.parallelism {
            if n > 0 {
                rayon::ThreadPoolBuilder::new().num_threads(n).build_global().ok();
            }
        }
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let allow = self.load_allowlist()?;
        for_each_archive_limited(jobs, self.opts.file_concurrency, |job| self.run_job(&allow, job))
    }

    fn run_job(&self, allow: &AllowList, job: &ArchiveJob) -> Result<RunSummary> {
        let started = Instant::now();
        tracing::info!(archive = %job.path.display(), period = %job.ym, "ingest starting");
        if allow.is_empty() {
            tracing::warn!("allow-list is empty; no record will be admitted");
        }

        let mut store = Store::open(&self.opts.db_path, self.opts.batch_size)?;
        store.apply_profile(StoreProfile::Bulk)?;
        let res = self.stream_into(&mut store, allow, job);
        let restored = store.apply_profile(StoreProfile::Durable);
        let mut summary = res?;
        restored?;

        if self.opts.write_month_table {
            store.replace_month_table(job.ym, &summary.community_totals)?;
        }
        if self.opts.validate {
            summary.validation = Some(validate_monthly_totals(store.connection(), Some(job.ym))?);
        }
        summary.duration = started.elapsed();

        tracing::info!(
            archive = %job.path.display(),
            period = %job.ym,
            admitted = summary.admitted,
            skipped_parse = summary.skipped_parse,
            skipped_filter = summary.skipped_filter,
            communities = summary.communities,
            rows = summary.rows_written,
            secs = summary.duration.as_secs_f64(),
            "ingest complete"
        );
        Ok(summary)
    }

    /// decode -> classify -> aggregate -> flush, for one archive.
    fn stream_into(&self, store: &mut Store, allow: &AllowList, job: &ArchiveJob) -> Result<RunSummary> {
        let (mut lines, counter) =
            open_archive(&job.path, self.opts.window_log_max, self.opts.read_chunk_bytes)?;
        let admission = Admission::new(allow, job.ym);

        // A re-run replaces the whole period; flushes then add, so a key that is
        // flushed more than once in this run is summed rather than overwritten.
        // The old rows go in the first flush's transaction, never before decoding starts.
        let mut sink = store.replacing_sink(job.ym, UpsertMode::Accumulate);

        let mut agg = BucketAggregator::new(FlushPolicy {
            max_keys: self.opts.flush_max_keys,
            every_chunks: self.opts.flush_every_chunks,
        });
        let mut watch = MemoryWatch::new(self.opts.low_memory_fraction);
        let pb = if self.opts.progress {
            let label = self.opts.progress_label.clone().unwrap_or_else(|| format!("Counting {}", job.ym));
            Some(archive_progress_bar(compressed_size(job), &label))
        } else {
            None
        };
        let mut reported = 0u64;

        let mut s = RunSummary { archive: job.path.clone(), period: Some(job.ym), ..Default::default() };
        let mut in_chunk = 0usize;

        while let Some(line) = lines.next_line()? {
            s.lines += 1;
            match admission.classify(line) {
                LineOutcome::Admitted(rec) => {
                    if agg.observe(&rec.identifier, rec.timestamp) {
                        s.admitted += 1;
                        *s.community_totals.entry(rec.identifier).or_insert(0) += 1;
                        agg.flush_if_full(&mut sink)?;
                    } else {
                        s.skipped_parse += 1;
                    }
                }
                LineOutcome::SkippedParse(e) => {
                    s.skipped_parse += 1;
                    if s.skipped_parse <= 5 {
                        tracing::debug!(line = s.lines, error = %e, "skipping undecodable line");
                    } else {
                        tracing::trace!(line = s.lines, error = %e, "skipping undecodable line");
                    }
                }
                LineOutcome::SkippedFilter(reason) => {
                    s.skipped_filter += 1;
                    match reason {
                        FilterReason::NotAllowed => s.not_allowed += 1,
                        FilterReason::OutsideWindow => s.outside_window += 1,
                    }
                }
            }

            in_chunk += 1;
            if in_chunk >= self.opts.lines_per_chunk {
                in_chunk = 0;
                agg.end_chunk(&mut sink)?;
                if let Some(pb) = &pb {
                    let cur = counter.load(Ordering::Relaxed);
                    pb.inc(cur.saturating_sub(reported));
                    reported = cur;
                }
                watch.pause_if_low();
                if self.cancelled() {
                    tracing::warn!(archive = %job.path.display(), lines = s.lines, "cancelled between chunks");
                    return Err(IngestError::Cancelled);
                }
            }
        }
        agg.finish(&mut sink)?;
        let cleared = sink.finish()?;
        if cleared > 0 {
            tracing::info!(period = %job.ym, rows = cleared, "replaced previous fine rows for period");
        }

        if let Some(pb) = pb {
            let cur = counter.load(Ordering::Relaxed);
            pb.inc(cur.saturating_sub(reported));
            pb.finish_with_message(format!("{} done", job.ym));
        }

        s.communities = s.community_totals.len();
        s.rows_written = agg.rows_written();
        s.flushes = agg.flushes();
        s.memory_pauses = watch.pauses();
        s.discarded_tail_bytes = lines.discarded_tail_bytes() as u64;
        s.cleared_rows = cleared as u64;
        Ok(s)
    }

    fn cancelled(&self) -> bool {
        self.opts.cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed))
    }
}
