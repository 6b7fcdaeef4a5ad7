#![allow(dead_code)]

use serde_json::json;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use subcount::CommentCounter;

/// 2024-03-01T00:00:00Z and 2024-03-31T23:59:59Z.
pub const MARCH_2024_START: i64 = 1_709_251_200;
pub const MARCH_2024_END: i64 = 1_711_929_599;

/// Write a compressed `.zst` file containing the provided lines, each `\n`-terminated.
pub fn write_zst_lines(path: &Path, lines: &[String]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let f = File::create(path).unwrap();
    let mut enc = zstd::stream::write::Encoder::new(f, 3).unwrap();
    for l in lines {
        writeln!(&mut enc, "{}", l).unwrap();
    }
    enc.finish().unwrap();
}

/// Write raw bytes through the zstd encoder (for unterminated tails and odd bytes).
pub fn write_zst_bytes(path: &Path, bytes: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let f = File::create(path).unwrap();
    let mut enc = zstd::stream::write::Encoder::new(f, 3).unwrap();
    enc.write_all(bytes).unwrap();
    enc.finish().unwrap();
}

/// One archive comment line in the corpus shape.
pub fn comment(subreddit: &str, created_utc: i64, id: &str) -> String {
    json!({
        "subreddit": subreddit, "created_utc": created_utc, "id": id,
        "author": "alice", "body": "hello", "score": 1, "parent_id": "t3_x"
    })
    .to_string()
}

/// Allow-list CSV with a header row, one community per row.
pub fn write_allowlist(path: &Path, names: &[&str]) {
    let mut f = File::create(path).unwrap();
    writeln!(f, "subreddit,subscribers").unwrap();
    for n in names {
        writeln!(f, "{n},5000").unwrap();
    }
}

/// A scratch workspace: temp dir with `allow.csv` and a database path.
pub struct Workspace {
    pub dir: PathBuf,
    pub allowlist: PathBuf,
    pub db: PathBuf,
}

impl Workspace {
    pub fn new(allowed: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap().into_path();
        let allowlist = dir.join("allow.csv");
        write_allowlist(&allowlist, allowed);
        let db = dir.join("counts.db");
        Self { dir, allowlist, db }
    }

    /// A counter pointed at this workspace, quiet and with the generic archive naming.
    pub fn counter(&self) -> CommentCounter {
        CommentCounter::new()
            .database(&self.db)
            .allowlist(&self.allowlist)
            .archive_naming("ARCHIVE_", ".ext")
            .progress(false)
            .low_memory_fraction(0.0)
    }

    pub fn archive(&self, name: &str, lines: &[String]) -> PathBuf {
        let p = self.dir.join("archives").join(name);
        write_zst_lines(&p, lines);
        p
    }

    pub fn conn(&self) -> rusqlite::Connection {
        rusqlite::Connection::open(&self.db).unwrap()
    }
}

/// Fine count for one (community, day, hour) in March 2024.
pub fn fine_count(conn: &rusqlite::Connection, sub: &str, day: u8, hour: u8) -> Option<i64> {
    conn.query_row(
        "SELECT comment_count FROM comment_history
         WHERE subreddit = ?1 AND year = 2024 AND month = 3 AND day = ?2 AND hour = ?3",
        rusqlite::params![sub, day, hour],
        |r| r.get(0),
    )
    .ok()
}

/// Every comment_history row as a sortable tuple.
pub fn all_rows(conn: &rusqlite::Connection) -> Vec<(String, i64, i64, Option<i64>, Option<i64>, Option<i64>, i64, Option<String>)> {
    let mut stmt = conn
        .prepare(
            "SELECT subreddit, year, month, week, day, hour, comment_count, period_date
             FROM comment_history ORDER BY subreddit, year, month, week, day, hour",
        )
        .unwrap();
    stmt.query_map([], |r| {
        Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?, r.get(7)?))
    })
    .unwrap()
    .map(|r| r.unwrap())
    .collect()
}
