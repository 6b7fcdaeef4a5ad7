//! Allow-list of eligible communities, loaded fully before any archive is read.

use crate::error::{IngestError, Result};
use crate::util::open_with_retry;
use ahash::AHashSet;
use std::io::Read;
use std::path::Path;

/// Trimmed + lowercased identifier; the join key between archives and the store.
#[inline]
pub fn normalize_identifier(s: &str) -> String {
    s.trim().to_lowercase()
}

#[derive(Clone, Debug, Default)]
pub struct AllowList {
    names: AHashSet<String>,
}

impl AllowList {
    /// Load from a CSV file: header row skipped, first column is the identifier.
    /// A file with only a header yields an empty list, which means "nothing qualifies".
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let f = open_with_retry(path, 8, 50).map_err(|e| {
            IngestError::config(format!("allow-list {} unreadable: {e}", path.display()))
        })?;
        let list = Self::from_csv_reader(f)
            .map_err(|e| IngestError::config(format!("allow-list {}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), communities = list.len(), "loaded allow-list");
        Ok(list)
    }

    pub fn from_csv_reader<R: Read>(rdr: R) -> std::result::Result<Self, csv::Error> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(rdr);
        let mut names = AHashSet::new();
        for rec in reader.byte_records() {
            let rec = rec?;
            if let Some(first) = rec.get(0) {
                let n = normalize_identifier(&String::from_utf8_lossy(first));
                if !n.is_empty() {
                    names.insert(n);
                }
            }
        }
        Ok(Self { names })
    }

    #[inline]
    pub fn contains(&self, identifier: &str) -> bool {
        self.names.contains(identifier)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for AllowList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let names = iter
            .into_iter()
            .map(|s| normalize_identifier(s.as_ref()))
            .filter(|s| !s.is_empty())
            .collect();
        Self { names }
    }
}
