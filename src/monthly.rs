//! Loader for pre-aggregated monthly totals (`subreddit,comment_count` CSV) into coarse rows.

use crate::aggregate::{BucketCount, BucketKey};
use crate::allowlist::{normalize_identifier, AllowList};
use crate::date::YearMonth;
use crate::error::{IngestError, Result};
use crate::store::{Store, UpsertMode};
use crate::util::open_with_retry;
use std::io::Read;
use std::path::Path;

/// Parse monthly totals for `ym`. Rows outside `allow` (when given), without a name,
/// or with a count that is not a positive integer are dropped.
pub fn read_monthly_totals<R: Read>(rdr: R, ym: YearMonth, allow: Option<&AllowList>) -> Result<Vec<BucketCount>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(rdr);
    let headers = reader
        .headers()
        .map_err(|e| IngestError::config(format!("monthly totals header: {e}")))?
        .clone();
    let col = |name: &str| headers.iter().position(|h| h.trim().trim_matches('"') == name);
    let (name_col, count_col) = match (col("subreddit"), col("comment_count")) {
        (Some(n), Some(c)) => (n, c),
        _ => return Err(IngestError::config("monthly totals need 'subreddit' and 'comment_count' columns")),
    };

    let mut out = Vec::new();
    for rec in reader.records() {
        let rec = match rec {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable monthly row");
                continue;
            }
        };
        let name = normalize_identifier(rec.get(name_col).unwrap_or(""));
        if name.is_empty() || allow.is_some_and(|a| !a.contains(&name)) {
            continue;
        }
        let count: u64 = rec.get(count_col).and_then(|c| c.trim().parse().ok()).unwrap_or(0);
        if count > 0 {
            out.push(BucketCount { key: BucketKey::coarse(name, ym.year, ym.month), count });
        }
    }
    Ok(out)
}

/// Load a monthly-totals CSV and replace the coarse rows it names.
pub fn load_monthly_totals(store: &mut Store, path: &Path, ym: YearMonth, allow: Option<&AllowList>) -> Result<usize> {
    let f = open_with_retry(path, 8, 50)
        .map_err(|e| IngestError::config(format!("monthly totals {} unreadable: {e}", path.display())))?;
    let rows = read_monthly_totals(f, ym, allow)?;
    let written = store.write_buckets(&rows, UpsertMode::Replace)?;
    tracing::info!(path = %path.display(), period = %ym, rows = written, "loaded monthly totals");
    Ok(written)
}
