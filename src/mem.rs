use parking_lot::Mutex;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use sysinfo::{System, SystemExt};

/// Process-wide cached view of available RAM, refreshed at most every `REFRESH_EVERY`.
struct Probe {
    sys: System,
    last_check: Instant,
    last_frac: f64, // available / total (0.0..1.0)
}

static PROBE: OnceLock<Mutex<Probe>> = OnceLock::new();
const REFRESH_EVERY: Duration = Duration::from_millis(500);
const BACKOFF: Duration = Duration::from_millis(25);

/// Recent estimate of the available memory fraction (0.0..1.0).
pub fn available_memory_fraction() -> f64 {
    let probe = PROBE.get_or_init(|| {
        let mut sys = System::new();
        sys.refresh_memory();
        Mutex::new(Probe { sys, last_check: Instant::now().checked_sub(REFRESH_EVERY * 2).unwrap_or_else(Instant::now), last_frac: 1.0 })
    });
    let mut p = probe.lock();
    let now = Instant::now();
    if now.duration_since(p.last_check) >= REFRESH_EVERY {
        p.sys.refresh_memory();
        let total = p.sys.total_memory() as f64;
        let avail = p.sys.available_memory() as f64;
        p.last_frac = if total > 0.0 { (avail / total).clamp(0.0, 1.0) } else { 1.0 };
        p.last_check = now;
    }
    p.last_frac
}

/// Per-run backoff between chunks while free memory is below `threshold`.
pub struct MemoryWatch {
    threshold: f64,
    pauses: u64,
}

impl MemoryWatch {
    pub fn new(threshold: f64) -> Self {
        Self { threshold, pauses: 0 }
    }

    /// Sleep briefly if memory is low; returns whether it paused.
    pub fn pause_if_low(&mut self) -> bool {
        if self.threshold <= 0.0 || available_memory_fraction() >= self.threshold {
            return false;
        }
        self.pauses += 1;
        if self.pauses == 1 {
            tracing::warn!(threshold = self.threshold, "low memory; backing off between chunks");
        }
        std::thread::sleep(BACKOFF);
        true
    }

    pub fn pauses(&self) -> u64 {
        self.pauses
    }
}
