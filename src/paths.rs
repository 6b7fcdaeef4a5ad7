use crate::date::YearMonth;
use crate::error::{IngestError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One archive to ingest: its path and the period its filename declares.
#[derive(Clone, Debug)]
pub struct ArchiveJob {
    pub ym: YearMonth,
    pub path: PathBuf,
}

/// Matches `<prefix>YYYY-MM<extension>` against a bare file name.
#[derive(Clone, Debug)]
pub struct ArchiveNaming {
    re: Regex,
}

impl ArchiveNaming {
    pub fn new(prefix: &str, extension: &str) -> Result<Self> {
        let pat = format!(r"^{}(\d{{4}})-(\d{{2}}){}$", regex::escape(prefix), regex::escape(extension));
        let re = Regex::new(&pat).map_err(|e| IngestError::config(format!("archive pattern: {e}")))?;
        Ok(Self { re })
    }

    /// Period encoded in a file name, or None if it does not follow the pattern.
    pub fn period_of(&self, name: &str) -> Option<YearMonth> {
        let caps = self.re.captures(name)?;
        let year: u16 = caps[1].parse().ok()?;
        let month: u8 = caps[2].parse().ok()?;
        YearMonth::try_new(year, month)
    }

    /// Resolve a path into a job. A name that does not match is fatal for the run:
    /// without it there is no time window.
    pub fn job_for(&self, path: &Path) -> Result<ArchiveJob> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| IngestError::config(format!("archive path has no file name: {}", path.display())))?;
        let ym = self.period_of(name).ok_or_else(|| {
            IngestError::config(format!(
                "archive name {name:?} does not match {}",
                self.re.as_str()
            ))
        })?;
        Ok(ArchiveJob { ym, path: path.to_path_buf() })
    }

    /// Archives directly inside `dir`, one per period, in period order.
    /// Non-matching names are ignored here; only explicit paths are strict. When two names
    /// map to one period the lexically smaller path is kept.
    pub fn discover(&self, dir: &Path) -> Vec<ArchiveJob> {
        let mut map: BTreeMap<YearMonth, PathBuf> = BTreeMap::new();
        if !dir.exists() {
            return Vec::new();
        }
        for ent in WalkDir::new(dir).min_depth(1).max_depth(1).into_iter().flatten() {
            if !ent.file_type().is_file() {
                continue;
            }
            if let Some(ym) = ent.file_name().to_str().and_then(|n| self.period_of(n)) {
                let path = ent.path().to_path_buf();
                match map.get(&ym) {
                    Some(kept) => {
                        let (kept, dropped) = if path < *kept { (path, kept.clone()) } else { (kept.clone(), path) };
                        tracing::warn!(
                            period = %ym, kept = %kept.display(), ignored = %dropped.display(),
                            "more than one archive for period; ignoring one"
                        );
                        map.insert(ym, kept);
                    }
                    None => {
                        map.insert(ym, path);
                    }
                }
            }
        }
        map.into_iter().map(|(ym, path)| ArchiveJob { ym, path }).collect()
    }
}
