//! Monotonic interval measurement with an optional frozen "now" snapshot.
//!
//! A [`Chrono`] measures elapsed time against `Instant::now()` by default. When many
//! `Chrono` values need to be checked against the same instant (e.g. scanning a queue
//! of timeouts), call [`Chrono::refnow`] once and pass `frozen = true` to every
//! subsequent query; this trades one syscall for N.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static PROCESS_START: OnceLock<Instant> = OnceLock::new();
static FROZEN_NOW_NANOS: AtomicU64 = AtomicU64::new(0);

fn process_start() -> Instant {
    *PROCESS_START.get_or_init(Instant::now)
}

fn nanos_since_start(i: Instant) -> u64 {
    i.saturating_duration_since(process_start()).as_nanos() as u64
}

/// A stopwatch measuring elapsed time since construction or the last `restart`.
pub struct Chrono {
    orig: Instant,
}

impl Default for Chrono {
    fn default() -> Self {
        Self::new()
    }
}

impl Chrono {
    /// Starts a new stopwatch at the current instant.
    pub fn new() -> Self {
        Chrono { orig: Instant::now() }
    }

    /// Snapshots the current instant into process-wide static storage. Subsequent
    /// calls to the `frozen` variants of `millis`/`micros`/`nanos`/`secs` on any
    /// `Chrono` read this snapshot instead of calling `Instant::now()` again.
    pub fn refnow() {
        FROZEN_NOW_NANOS.store(nanos_since_start(Instant::now()), Ordering::Relaxed);
    }

    fn reference(&self, frozen: bool) -> Instant {
        if frozen {
            let nanos = FROZEN_NOW_NANOS.load(Ordering::Relaxed);
            process_start() + std::time::Duration::from_nanos(nanos)
        } else {
            Instant::now()
        }
    }

    /// Returns nanoseconds elapsed since origin, then resets origin to now.
    pub fn urestart(&mut self) -> i64 {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.orig).as_micros() as i64;
        self.orig = now;
        elapsed
    }

    /// Returns milliseconds elapsed since origin, then resets origin to now.
    pub fn restart(&mut self) -> i64 {
        self.urestart() / 1_000
    }

    pub fn nanos(&self, frozen: bool) -> i64 {
        self.reference(frozen)
            .saturating_duration_since(self.orig)
            .as_nanos() as i64
    }

    pub fn micros(&self, frozen: bool) -> i64 {
        self.nanos(frozen) / 1_000
    }

    pub fn millis(&self, frozen: bool) -> i64 {
        self.nanos(frozen) / 1_000_000
    }

    pub fn secs(&self, frozen: bool) -> f32 {
        self.nanos(frozen) as f32 / 1_000_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn elapsed_grows_with_real_sleep() {
        let c = Chrono::new();
        sleep(Duration::from_millis(5));
        assert!(c.millis(false) >= 5);
    }

    #[test]
    fn restart_resets_origin() {
        let mut c = Chrono::new();
        sleep(Duration::from_millis(5));
        let first = c.restart();
        assert!(first >= 5);
        assert!(c.millis(false) < first);
    }

    #[test]
    fn frozen_now_is_stable_across_queries() {
        Chrono::refnow();
        let c = Chrono::new();
        let a = c.millis(true);
        sleep(Duration::from_millis(5));
        let b = c.millis(true);
        assert_eq!(a, b);
    }
}
