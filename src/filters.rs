//! Admission predicates: allow-list membership, then the archive's closed time window.

use crate::allowlist::AllowList;
use crate::date::YearMonth;
use crate::record::{decode_line, CommentRecord, FilterReason, LineOutcome};

/// Decides which decoded records reach the aggregator for one archive.
pub struct Admission<'a> {
    allow: &'a AllowList,
    start: i64,
    end: i64,
}

impl<'a> Admission<'a> {
    pub fn new(allow: &'a AllowList, period: YearMonth) -> Self {
        let (start, end) = period.utc_window();
        Self { allow, start, end }
    }

    /// Inclusive on both ends.
    #[inline]
    pub fn within_window(&self, ts: i64) -> bool {
        ts >= self.start && ts <= self.end
    }

    pub fn check(&self, rec: &CommentRecord) -> Option<FilterReason> {
        if !self.allow.contains(&rec.identifier) {
            return Some(FilterReason::NotAllowed);
        }
        if !self.within_window(rec.timestamp) {
            return Some(FilterReason::OutsideWindow);
        }
        None
    }

    /// Decode and filter a raw line into its outcome.
    pub fn classify(&self, line: &[u8]) -> LineOutcome {
        match decode_line(line) {
            Err(e) => LineOutcome::SkippedParse(e),
            Ok(rec) => match self.check(&rec) {
                Some(reason) => LineOutcome::SkippedFilter(reason),
                None => LineOutcome::Admitted(rec),
            },
        }
    }

    pub fn window(&self) -> (i64, i64) {
        (self.start, self.end)
    }
}
