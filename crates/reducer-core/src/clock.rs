//! A seam for "now" (ambient): every call site that needs wall-clock time
//! goes through a `Clock` instead of calling `Utc::now()` directly, so
//! tests can pin a fixed instant instead of asserting against a moving
//! target.

use chrono::Utc;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.0
    }
}
