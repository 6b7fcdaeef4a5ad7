//! Read-only cross-check of fine buckets against loaded coarse monthly totals.
//! Mismatches are reported, never corrected.

use crate::date::YearMonth;
use crate::error::Result;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub identifier: String,
    pub year: u16,
    pub month: u8,
    pub aggregated_total: u64,
    pub recorded_total: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Keys present in both shapes and compared.
    pub checked: usize,
    /// Keys with fine rows but no coarse total to compare against.
    pub unverified: usize,
    /// Keys with a coarse total but no fine rows.
    pub missing_fine: usize,
    pub mismatches: Vec<Mismatch>,
}

impl ValidationReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

type MonthKey = (String, u16, u8);

/// Compare per-(community, year, month) fine sums with coarse rows, over the whole table
/// or one period.
pub fn validate_monthly_totals(conn: &Connection, scope: Option<YearMonth>) -> Result<ValidationReport> {
    let fine = month_totals(
        conn,
        "SELECT subreddit, year, month, SUM(comment_count) FROM comment_history
         WHERE week IS NOT NULL AND (?1 IS NULL OR (year = ?1 AND month = ?2))
         GROUP BY subreddit, year, month",
        scope,
    )?;
    let coarse = month_totals(
        conn,
        "SELECT subreddit, year, month, SUM(comment_count) FROM comment_history
         WHERE week IS NULL AND day IS NULL AND hour IS NULL
           AND (?1 IS NULL OR (year = ?1 AND month = ?2))
         GROUP BY subreddit, year, month",
        scope,
    )?;

    let mut report = ValidationReport::default();
    for (key, &aggregated_total) in &fine {
        match coarse.get(key) {
            None => report.unverified += 1,
            Some(&recorded_total) => {
                report.checked += 1;
                if aggregated_total != recorded_total {
                    let (identifier, year, month) = key.clone();
                    report.mismatches.push(Mismatch { identifier, year, month, aggregated_total, recorded_total });
                }
            }
        }
    }
    report.missing_fine = coarse.keys().filter(|k| !fine.contains_key(*k)).count();

    for m in &report.mismatches {
        tracing::warn!(
            identifier = %m.identifier, period = %format!("{:04}-{:02}", m.year, m.month),
            aggregated = m.aggregated_total, recorded = m.recorded_total,
            "monthly total mismatch"
        );
    }
    tracing::info!(
        checked = report.checked, unverified = report.unverified,
        missing_fine = report.missing_fine, mismatches = report.mismatches.len(),
        "validation finished"
    );
    Ok(report)
}

fn month_totals(conn: &Connection, sql: &str, scope: Option<YearMonth>) -> Result<BTreeMap<MonthKey, u64>> {
    let (y, m) = match scope {
        Some(ym) => (Some(ym.year), Some(ym.month)),
        None => (None, None),
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![y, m], |row| {
        Ok((
            (row.get::<_, String>(0)?, row.get::<_, u16>(1)?, row.get::<_, u8>(2)?),
            row.get::<_, i64>(3)?.max(0) as u64,
        ))
    })?;
    let mut out = BTreeMap::new();
    for r in rows {
        let (k, v) = r?;
        out.insert(k, v);
    }
    Ok(out)
}
