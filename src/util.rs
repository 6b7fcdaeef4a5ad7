use std::fs::File;
use std::io;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

static INIT_ONCE: std::sync::Once = std::sync::Once::new();

/// Install the fmt subscriber once per process; `RUST_LOG` wins, default `info`.
pub fn init_tracing_once() {
    INIT_ONCE.call_once(|| {
        let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
    });
}

/// Transient errors seen on network/USB volumes and Windows sharing violations.
/// The raw codes are Win32 errors; on unix the same numbers mean EIO, EISDIR and so on.
fn is_retriable(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock)
        || (cfg!(windows)
            && matches!(e.raw_os_error(), Some(5) | Some(21) | Some(32) | Some(33) | Some(1006) | Some(1117)))
}

/// Open for reading, retrying transient failures with linear backoff.
/// Anything else (not found, permission denied, EIO) returns immediately.
pub fn open_with_retry(path: &Path, tries: usize, delay_ms: u64) -> io::Result<File> {
    let tries = tries.max(1);
    let mut attempt = 0;
    loop {
        match File::open(path) {
            Ok(f) => return Ok(f),
            Err(e) if is_retriable(&e) && attempt + 1 < tries => {
                attempt += 1;
                tracing::debug!(path = %path.display(), attempt, error = %e, "retrying open");
                sleep(Duration::from_millis(delay_ms.saturating_mul(attempt as u64)));
            }
            Err(e) => return Err(e),
        }
    }
}
