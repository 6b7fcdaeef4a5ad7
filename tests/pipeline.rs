#[path = "common/mod.rs"]
mod common;

use common::*;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use subcount::{IngestError, YearMonth};

/// End to end: only allow-listed communities are counted, per hour bucket.
/// Outcome: alpha gets 3 in 2024-03-01 00h, gamma gets no rows at all.
#[test]
fn counts_allowlisted_communities() {
    let ws = Workspace::new(&["alpha", "beta"]);
    let path = ws.archive(
        "ARCHIVE_2024-03.ext",
        &[
            comment("alpha", MARCH_2024_START + 10, "a1"),
            comment("Alpha", MARCH_2024_START + 20, "a2"),
            comment("alpha", MARCH_2024_START + 30, "a3"),
            comment("gamma", MARCH_2024_START + 40, "g1"),
        ],
    );

    let s = ws.counter().ingest_archive(&path).unwrap();
    assert_eq!(s.period, Some(YearMonth::new(2024, 3)));
    assert_eq!((s.lines, s.admitted, s.not_allowed), (4, 3, 1));
    assert_eq!(s.community_totals.get("alpha"), Some(&3));
    assert_eq!(s.communities, 1);

    let conn = ws.conn();
    assert_eq!(fine_count(&conn, "alpha", 1, 0), Some(3));
    assert!(all_rows(&conn).iter().all(|r| r.0 != "gamma"));
    let date: String = conn
        .query_row("SELECT period_date FROM comment_history WHERE subreddit = 'alpha'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(date, "2024-03-01");
}

/// A malformed line is skipped and counted; the rest of the archive is unaffected.
#[test]
fn malformed_line_is_skipped() {
    let ws = Workspace::new(&["alpha"]);
    let path = ws.archive(
        "ARCHIVE_2024-03.ext",
        &[
            comment("alpha", MARCH_2024_START, "1"),
            comment("alpha", MARCH_2024_START + 1, "2"),
            "{\"subreddit\": \"alpha\", \"created_utc\": ".to_string(),
            comment("alpha", MARCH_2024_START + 2, "3"),
            comment("alpha", MARCH_2024_START + 3, "4"),
        ],
    );
    let s = ws.counter().ingest_archive(&path).unwrap();
    assert_eq!((s.admitted, s.skipped_parse, s.skipped_filter), (4, 1, 0));
    assert_eq!(s.skipped(), 1);
    assert_eq!(fine_count(&ws.conn(), "alpha", 1, 0), Some(4));
}

/// Records just outside the month are filtered, the boundary seconds are not.
#[test]
fn window_edges_in_archive() {
    let ws = Workspace::new(&["alpha"]);
    let path = ws.archive(
        "ARCHIVE_2024-03.ext",
        &[
            comment("alpha", MARCH_2024_START - 1, "before"),
            comment("alpha", MARCH_2024_START, "first"),
            comment("alpha", MARCH_2024_END, "last"),
            comment("alpha", MARCH_2024_END + 1, "after"),
        ],
    );
    let s = ws.counter().ingest_archive(&path).unwrap();
    assert_eq!((s.admitted, s.outside_window), (2, 2));
    let conn = ws.conn();
    assert_eq!(fine_count(&conn, "alpha", 1, 0), Some(1));
    assert_eq!(fine_count(&conn, "alpha", 31, 23), Some(1));
}

/// A tiny key threshold forces intermediate flushes; repeated keys across flushes
/// still sum to the exact count.
#[test]
fn intermediate_flushes_keep_exact_counts() {
    let ws = Workspace::new(&["alpha"]);
    let mut lines = Vec::new();
    for round in 0..3 {
        for h in 0..5 {
            lines.push(comment("alpha", MARCH_2024_START + h * 3600 + round, &format!("{h}-{round}")));
        }
    }
    let path = ws.archive("ARCHIVE_2024-03.ext", &lines);

    let s = ws.counter().flush_max_keys(2).chunking(4, 1).ingest_archive(&path).unwrap();
    assert!(s.flushes > 1, "expected several flushes, got {}", s.flushes);
    assert_eq!(s.admitted, 15);
    let conn = ws.conn();
    for h in 0..5u8 {
        assert_eq!(fine_count(&conn, "alpha", 1, h), Some(3), "hour {h}");
    }
}

/// Running the same archive twice leaves the same rows and counts.
#[test]
fn rerun_is_idempotent() {
    let ws = Workspace::new(&["alpha", "beta"]);
    let path = ws.archive(
        "ARCHIVE_2024-03.ext",
        &[
            comment("alpha", MARCH_2024_START, "1"),
            comment("beta", MARCH_2024_START + 7200, "2"),
            comment("beta", MARCH_2024_END, "3"),
        ],
    );
    let counter = ws.counter().flush_max_keys(1);
    counter.ingest_archive(&path).unwrap();
    let first = all_rows(&ws.conn());
    let second_run = counter.ingest_archive(&path).unwrap();
    assert_eq!(all_rows(&ws.conn()), first);
    assert_eq!(second_run.cleared_rows, 3);
}

/// A filename without a derivable period fails before any database is created.
#[test]
fn bad_filename_is_configuration_error() {
    let ws = Workspace::new(&["alpha"]);
    let path = ws.archive("ARCHIVE_march.ext", &[comment("alpha", MARCH_2024_START, "1")]);
    let err = ws.counter().ingest_archive(&path).unwrap_err();
    assert!(matches!(err, IngestError::Configuration(_)), "got {err:?}");
    assert!(!ws.db.exists());

    let path = ws.archive("ARCHIVE_2024-13.ext", &[]);
    assert!(ws.counter().ingest_archive(&path).unwrap_err().is_configuration());
}

/// A missing allow-list is fatal at startup.
#[test]
fn missing_allowlist_is_configuration_error() {
    let ws = Workspace::new(&["alpha"]);
    let path = ws.archive("ARCHIVE_2024-03.ext", &[comment("alpha", MARCH_2024_START, "1")]);
    let err = ws.counter().allowlist(ws.dir.join("absent.csv")).ingest_archive(&path).unwrap_err();
    assert!(err.is_configuration(), "got {err:?}");
    assert!(!ws.db.exists());
}

/// An empty archive and an empty allow-list both complete with zero rows.
#[test]
fn empty_inputs_complete_cleanly() {
    let ws = Workspace::new(&[]);
    let empty = ws.archive("ARCHIVE_2024-03.ext", &[]);
    let s = ws.counter().ingest_archive(&empty).unwrap();
    assert_eq!((s.lines, s.rows_written, s.flushes), (0, 0, 1));

    let path = ws.archive("ARCHIVE_2024-04.ext", &[comment("alpha", MARCH_2024_END + 1, "1")]);
    let s = ws.counter().ingest_archive(&path).unwrap();
    assert_eq!((s.admitted, s.not_allowed), (0, 1));
    assert!(all_rows(&ws.conn()).is_empty());
}

/// An unterminated final line is dropped and reported.
#[test]
fn unterminated_tail_is_not_counted() {
    let ws = Workspace::new(&["alpha"]);
    let path = ws.dir.join("archives").join("ARCHIVE_2024-03.ext");
    let mut bytes = comment("alpha", MARCH_2024_START, "1").into_bytes();
    bytes.push(b'\n');
    let tail = comment("alpha", MARCH_2024_START, "2");
    bytes.extend_from_slice(tail.as_bytes());
    write_zst_bytes(&path, &bytes);

    let s = ws.counter().ingest_archive(&path).unwrap();
    assert_eq!(s.admitted, 1);
    assert_eq!(s.discarded_tail_bytes, tail.len() as u64);
}

/// The month table mirrors the run's per-community totals when enabled.
#[test]
fn month_table_written_when_enabled() {
    let ws = Workspace::new(&["alpha", "beta"]);
    let path = ws.archive(
        "ARCHIVE_2024-03.ext",
        &[comment("alpha", MARCH_2024_START, "1"), comment("alpha", MARCH_2024_END, "2"), comment("beta", MARCH_2024_START, "3")],
    );
    ws.counter().month_table(true).ingest_archive(&path).unwrap();
    let n: i64 = ws
        .conn()
        .query_row("SELECT month_comment_count FROM comment_count_2024_03 WHERE subreddit = 'alpha'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(n, 2);
}

/// Directory discovery picks up matching names only and runs them in period order.
#[test]
fn ingest_dir_runs_each_archive() {
    let ws = Workspace::new(&["alpha"]);
    ws.archive("ARCHIVE_2024-04.ext", &[comment("alpha", MARCH_2024_END + 1, "apr")]);
    ws.archive("ARCHIVE_2024-03.ext", &[comment("alpha", MARCH_2024_START, "mar")]);
    ws.archive("notes.txt", &["ignored".to_string()]);

    let summaries = ws.counter().file_concurrency(2).ingest_dir(&ws.dir.join("archives")).unwrap();
    let periods: Vec<_> = summaries.iter().map(|s| s.period.unwrap()).collect();
    assert_eq!(periods, vec![YearMonth::new(2024, 3), YearMonth::new(2024, 4)]);
    assert!(summaries.iter().all(|s| s.admitted == 1));
    assert_eq!(all_rows(&ws.conn()).len(), 2);
}

/// Explicit archive lists are validated up front: one bad name aborts the whole batch.
#[test]
fn ingest_archives_checks_names_first() {
    let ws = Workspace::new(&["alpha"]);
    let good = ws.archive("ARCHIVE_2024-03.ext", &[comment("alpha", MARCH_2024_START, "1")]);
    let bad = ws.archive("other.ext", &[]);
    let err = ws.counter().ingest_archives(&[good.clone(), bad]).unwrap_err();
    assert!(err.is_configuration());
    assert!(!ws.db.exists());

    let summaries = ws.counter().ingest_archives(&[good]).unwrap();
    assert_eq!(summaries.len(), 1);
}

/// A raised cancel flag stops the run at the first chunk boundary.
#[test]
fn cancellation_between_chunks() {
    let ws = Workspace::new(&["alpha"]);
    let lines: Vec<String> = (0..10).map(|i| comment("alpha", MARCH_2024_START + i, &i.to_string())).collect();
    let path = ws.archive("ARCHIVE_2024-03.ext", &lines);
    let flag = Arc::new(AtomicBool::new(true));
    let err = ws.counter().chunking(2, 50).cancel_flag(flag).ingest_archive(&path).unwrap_err();
    assert!(matches!(err, IngestError::Cancelled), "got {err:?}");
}

/// With coarse totals loaded first, the post-run validation reports the comparison.
#[test]
fn run_validates_against_loaded_totals() {
    let ws = Workspace::new(&["alpha", "beta"]);
    let csv = ws.dir.join("totals.csv");
    std::fs::write(&csv, "subreddit,comment_count\nalpha,2\nbeta,5\n").unwrap();
    let ym = YearMonth::new(2024, 3);
    assert_eq!(ws.counter().load_monthly_totals(&csv, ym).unwrap(), 2);

    let path = ws.archive(
        "ARCHIVE_2024-03.ext",
        &[comment("alpha", MARCH_2024_START, "1"), comment("alpha", MARCH_2024_END, "2"), comment("beta", MARCH_2024_START, "3")],
    );
    let s = ws.counter().ingest_archive(&path).unwrap();
    let report = s.validation.unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.mismatches.len(), 1);
    assert_eq!(report.mismatches[0].identifier, "beta");
    assert_eq!((report.mismatches[0].aggregated_total, report.mismatches[0].recorded_total), (1, 5));
}

/// A rerun whose archive turns out to be corrupt fails before any write, so the
/// period keeps the counts from the last good run.
#[test]
fn corrupt_rerun_keeps_previous_rows() {
    let ws = Workspace::new(&["alpha"]);
    let path = ws.archive(
        "ARCHIVE_2024-03.ext",
        &[comment("alpha", MARCH_2024_START, "1"), comment("alpha", MARCH_2024_START + 5, "2")],
    );
    ws.counter().ingest_archive(&path).unwrap();
    let before = all_rows(&ws.conn());
    assert_eq!(fine_count(&ws.conn(), "alpha", 1, 0), Some(2));

    std::fs::write(&path, b"this is not a zstd frame\n").unwrap();
    let err = ws.counter().ingest_archive(&path).unwrap_err();
    assert!(matches!(err, IngestError::Decompression(_)), "got {err:?}");
    assert_eq!(all_rows(&ws.conn()), before);
}

/// Two archives for the same period in one batch are refused up front,
/// since the stored total would depend on which run finished last.
#[test]
fn duplicate_period_is_rejected() {
    let ws = Workspace::new(&["alpha"]);
    let lines: Vec<String> = (0..20).map(|i| comment("alpha", MARCH_2024_START + i, &i.to_string())).collect();
    let a = ws.archive("a/ARCHIVE_2024-03.ext", &lines);
    let b = ws.archive("b/ARCHIVE_2024-03.ext", &lines);

    let err = ws.counter().file_concurrency(2).ingest_archives(&[a.clone(), b]).unwrap_err();
    assert!(err.is_configuration(), "got {err:?}");
    assert!(!ws.db.exists());

    let summaries = ws.counter().ingest_archives(&[a]).unwrap();
    assert_eq!(summaries[0].admitted, 20);
}

/// A flush the database rejects aborts the run with StoreWrite, and the period's
/// earlier rows survive because the clear rolls back with the failed batch.
#[test]
fn store_write_failure_aborts_run() {
    let ws = Workspace::new(&["alpha"]);
    let path = ws.archive("ARCHIVE_2024-03.ext", &[comment("alpha", MARCH_2024_START, "1")]);
    ws.counter().ingest_archive(&path).unwrap();
    let before = all_rows(&ws.conn());

    ws.conn()
        .execute_batch(
            "CREATE TRIGGER reject_writes BEFORE INSERT ON comment_history
             BEGIN SELECT RAISE(ABORT, 'writes rejected'); END;",
        )
        .unwrap();
    let err = ws.counter().ingest_archive(&path).unwrap_err();
    assert!(matches!(err, IngestError::StoreWrite { .. }), "got {err:?}");
    assert_eq!(all_rows(&ws.conn()), before);
}
