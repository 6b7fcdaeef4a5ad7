//! Byte-based progress over compressed input.

use crate::paths::ArchiveJob;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::fs;
use std::sync::{Arc, OnceLock};

/// Optional global MultiProgress so concurrent archive runs render one bar each.
static GLOBAL_MP: OnceLock<Arc<MultiProgress>> = OnceLock::new();

/// Install a global MultiProgress used by all subsequently created bars. First call wins.
pub fn set_global_multiprogress(mp: Arc<MultiProgress>) {
    let _ = GLOBAL_MP.set(mp);
}

pub fn archive_progress_bar(total_bytes: u64, label: &str) -> ProgressBar {
    let pb = match GLOBAL_MP.get() {
        Some(mp) => mp.add(ProgressBar::new(total_bytes)),
        None => ProgressBar::new(total_bytes),
    };
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} {msg} {bytes:>10}/{total_bytes:<10} [{bar:.cyan/blue}] {percent:>3}%  \
         {bytes_per_sec}  elapsed: {elapsed_precise}  eta: {eta_precise}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(label.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

pub fn compressed_size(job: &ArchiveJob) -> u64 {
    fs::metadata(&job.path).map(|m| m.len()).unwrap_or(0)
}
