//! Bounded parallelism across independent archive runs.

use crate::error::Result;
use crate::paths::ArchiveJob;
use rayon::prelude::*;

/// Run `f` over `jobs` with at most `limit` in flight; the first error stops the schedule.
/// Each job owns its own state, so nothing is shared between concurrent calls.
pub fn for_each_archive_limited<T, F>(jobs: &[ArchiveJob], limit: usize, f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Sync + Fn(&ArchiveJob) -> Result<T>,
{
    if limit <= 1 {
        return jobs.iter().map(&f).collect();
    }
    let mut out = Vec::with_capacity(jobs.len());
    for chunk in jobs.chunks(limit) {
        let part: Vec<T> = chunk.par_iter().map(&f).collect::<Result<Vec<T>>>()?;
        out.extend(part);
    }
    Ok(out)
}
