mod config;
mod date;
mod error;
mod paths;
mod zstd_lines;

mod allowlist;
mod record;
mod filters;
mod aggregate;
mod store;
mod validate;
mod monthly;

mod progress;
mod concurrency;
mod util;
mod mem;
mod pipeline;

pub use crate::config::IngestOptions;
pub use crate::date::YearMonth;
pub use crate::error::{IngestError, RecordDecodeError, Result};
pub use crate::pipeline::{CommentCounter, RunSummary};

// Building blocks, usable on their own (and by the integration tests).
pub use crate::allowlist::{normalize_identifier, AllowList};
pub use crate::paths::{ArchiveJob, ArchiveNaming};
pub use crate::zstd_lines::{open_archive, LineDecoder};
pub use crate::record::{decode_line, CommentRecord, FilterReason, LineOutcome, RawRecord};
pub use crate::filters::Admission;
pub use crate::aggregate::{BucketAggregator, BucketCount, BucketKey, BucketSink, FineSlot, FlushPolicy};
pub use crate::store::{Granularity, Store, StoreProfile, StoreSink, UpsertMode};
pub use crate::validate::{validate_monthly_totals, Mismatch, ValidationReport};
pub use crate::monthly::{load_monthly_totals, read_monthly_totals};

// Progress and memory helpers for binaries.
pub use crate::progress::set_global_multiprogress;
pub use crate::mem::available_memory_fraction;
pub use crate::util::init_tracing_once;
