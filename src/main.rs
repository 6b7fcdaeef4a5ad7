use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use subcount::{CommentCounter, IngestOptions, RunSummary, YearMonth};

const USAGE: &str = "usage:
  subcount ingest <RC_YYYY-MM.zst | dir>...
  subcount monthly <totals.csv> <YYYY-MM>
  subcount validate [YYYY-MM]

environment: SUBCOUNT_DB, SUBCOUNT_ALLOWLIST, SUBCOUNT_BATCH_SIZE,
             SUBCOUNT_FLUSH_KEYS, SUBCOUNT_FILE_CONCURRENCY, RUST_LOG";

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let counter = CommentCounter::with_options(IngestOptions::from_env());

    match args.first().map(String::as_str) {
        Some("ingest") if args.len() > 1 => {
            let mut summaries: Vec<RunSummary> = Vec::new();
            let (dirs, files): (Vec<PathBuf>, Vec<PathBuf>) =
                args[1..].iter().map(PathBuf::from).partition(|p| p.is_dir());
            for dir in &dirs {
                summaries.extend(counter.ingest_dir(dir).with_context(|| format!("ingesting {}", dir.display()))?);
            }
            if !files.is_empty() {
                summaries.extend(counter.ingest_archives(&files).context("ingesting archives")?);
            }
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        Some("monthly") if args.len() == 3 => {
            let ym: YearMonth = args[2].parse().map_err(anyhow::Error::msg)?;
            let n = counter
                .load_monthly_totals(&PathBuf::from(&args[1]), ym)
                .with_context(|| format!("loading monthly totals from {}", args[1]))?;
            println!("Loaded {n} monthly totals for {ym}");
        }
        Some("validate") if args.len() <= 2 => {
            let scope = match args.get(1) {
                Some(s) => Some(s.parse::<YearMonth>().map_err(anyhow::Error::msg)?),
                None => None,
            };
            let report = counter.validate(scope).context("validation pass")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => bail!("{USAGE}"),
    }
    Ok(())
}
