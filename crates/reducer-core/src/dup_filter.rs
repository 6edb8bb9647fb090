//! Duplicate filter (§4.D): a fast in-memory approximate set with an
//! authoritative store lookup fallback.
//!
//! False positives are expected (and handled by the caller re-checking the
//! store); a growable bloom filter has no false negatives, so `has(id) ==
//! false` is always trustworthy on its own.

use growable_bloom_filter::GrowableBloom;
use parking_lot::Mutex;

const DEFAULT_ERROR_RATIO: f64 = 0.01;
const DEFAULT_EST_ELEMENTS: usize = 100_000;

/// Process-local approximate membership set over document ids.
///
/// Process-local by design (§9 "Duplicate filter sharing"): multi-instance
/// deployments rely on input partitioning so each group has a single
/// writer instance, not on sharing this filter across processes.
pub struct DuplicateFilter {
    enabled: bool,
    seen: Mutex<GrowableBloom>,
}

impl DuplicateFilter {
    pub fn new(enabled: bool) -> Self {
        DuplicateFilter {
            enabled,
            seen: Mutex::new(GrowableBloom::new(DEFAULT_ERROR_RATIO, DEFAULT_EST_ELEMENTS)),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// `true` means "possibly seen before" — the caller must still confirm
    /// against the authoritative store. `false` means "definitely novel".
    pub fn has(&self, id: &str) -> bool {
        if !self.enabled {
            return false;
        }
        self.seen.lock().contains(id)
    }

    pub fn add(&self, id: &str) {
        if !self.enabled {
            return;
        }
        self.seen.lock().insert(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_filter_always_reports_novel() {
        let filter = DuplicateFilter::new(false);
        filter.add("t/1/k/o1");
        assert!(!filter.has("t/1/k/o1"));
    }

    #[test]
    fn enabled_filter_remembers_additions() {
        let filter = DuplicateFilter::new(true);
        assert!(!filter.has("t/1/k/o1"));
        filter.add("t/1/k/o1");
        assert!(filter.has("t/1/k/o1"));
    }
}
