use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Explicit run configuration; every knob the pipeline uses lives here.
#[derive(Clone, Debug)]
pub struct IngestOptions {
    pub db_path: PathBuf,
    pub allowlist_path: PathBuf,

    // Archive naming: <prefix>YYYY-MM<extension>
    pub archive_prefix: String,
    pub archive_extension: String,

    // Store
    pub batch_size: usize,            // rows per write transaction
    pub write_month_table: bool,      // also (re)build comment_count_YYYY_MM
    pub validate: bool,               // run the validation pass for the period after ingest

    // Aggregation / flushing
    pub flush_max_keys: usize,        // flush once distinct keys exceed this
    pub lines_per_chunk: usize,       // one processing chunk
    pub flush_every_chunks: usize,    // flush after this many chunks

    // Decoder
    pub read_chunk_bytes: usize,      // fixed read size from the decompressor
    pub window_log_max: u32,          // 31 => 2 GiB window

    // Scheduling
    pub file_concurrency: usize,      // archives processed at once
    pub parallelism: Option<usize>,   // Some(N) to set rayon threads
    pub progress: bool,
    pub progress_label: Option<String>,
    pub low_memory_fraction: f64,     // back off between chunks below this available-RAM fraction
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("reddit_communities.db"),
            allowlist_path: PathBuf::from("subreddits.csv"),
            archive_prefix: "RC_".to_string(),
            archive_extension: ".zst".to_string(),

            batch_size: 1000,
            write_month_table: false,
            validate: true,

            flush_max_keys: 100_000,
            lines_per_chunk: 100_000,
            flush_every_chunks: 50,

            read_chunk_bytes: 8 * 1024,
            window_log_max: 31,

            file_concurrency: 1, // safe default: one 2 GiB window at a time
            parallelism: None,
            progress: true,
            progress_label: None,
            low_memory_fraction: 0.10,
            cancel: None,
        }
    }
}

impl IngestOptions {
    /// Defaults overridden by `SUBCOUNT_*` environment variables. Only the binary calls this.
    pub fn from_env() -> Self {
        let mut opts = Self::default();
        if let Some(p) = env_nonempty("SUBCOUNT_DB") {
            opts.db_path = PathBuf::from(p);
        }
        if let Some(p) = env_nonempty("SUBCOUNT_ALLOWLIST") {
            opts.allowlist_path = PathBuf::from(p);
        }
        if let Some(n) = env_usize("SUBCOUNT_BATCH_SIZE") {
            opts = opts.with_batch_size(n);
        }
        if let Some(n) = env_usize("SUBCOUNT_FLUSH_KEYS") {
            opts = opts.with_flush_max_keys(n);
        }
        if let Some(n) = env_usize("SUBCOUNT_FILE_CONCURRENCY") {
            opts = opts.with_file_concurrency(n);
        }
        opts
    }

    pub fn with_db_path(mut self, path: impl AsRef<Path>) -> Self {
        self.db_path = path.as_ref().to_path_buf();
        self
    }
    pub fn with_allowlist(mut self, path: impl AsRef<Path>) -> Self {
        self.allowlist_path = path.as_ref().to_path_buf();
        self
    }
    pub fn with_archive_naming(mut self, prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        self.archive_prefix = prefix.into();
        self.archive_extension = extension.into();
        self
    }
    pub fn with_batch_size(mut self, rows: usize) -> Self {
        self.batch_size = rows.max(1);
        self
    }
    pub fn with_month_table(mut self, yes: bool) -> Self {
        self.write_month_table = yes;
        self
    }
    pub fn with_validation(mut self, yes: bool) -> Self {
        self.validate = yes;
        self
    }
    pub fn with_flush_max_keys(mut self, keys: usize) -> Self {
        self.flush_max_keys = keys.max(1);
        self
    }
    pub fn with_chunking(mut self, lines_per_chunk: usize, flush_every_chunks: usize) -> Self {
        self.lines_per_chunk = lines_per_chunk.max(1);
        self.flush_every_chunks = flush_every_chunks.max(1);
        self
    }
    pub fn with_read_chunk_bytes(mut self, bytes: usize) -> Self {
        self.read_chunk_bytes = bytes.max(1);
        self
    }
    pub fn with_window_log_max(mut self, log: u32) -> Self {
        self.window_log_max = log;
        self
    }
    pub fn with_file_concurrency(mut self, n: usize) -> Self {
        self.file_concurrency = n.max(1);
        self
    }
    pub fn with_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = Some(threads);
        self
    }
    pub fn with_progress(mut self, yes: bool) -> Self {
        self.progress = yes;
        self
    }
    pub fn with_progress_label(mut self, label: impl Into<String>) -> Self {
        self.progress_label = Some(label.into());
        self
    }
    pub fn with_low_memory_fraction(mut self, frac: f64) -> Self {
        self.low_memory_fraction = frac.clamp(0.0, 1.0);
        self
    }
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn env_usize(key: &str) -> Option<usize> {
    let raw = env_nonempty(key)?;
    match raw.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(%key, value = %raw, "ignoring non-numeric environment override");
            None
        }
    }
}
