//! Injectable time source, so expiration checks are deterministic in tests.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds-since-epoch time source. Production code uses [`SystemClock`];
/// tests use a fixed value to exercise expiration boundaries exactly.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall-clock time, via `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_millis() as i64
    }
}

/// A clock pinned to a fixed instant, for exercising expiration boundaries
/// in tests (both unit tests here and the integration suite under `tests/`).
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0
    }
}
