//! Metric name constants for the reduce pipeline, documented the way
//! `noria/noria/src/metrics.rs` documents its recorded events: one doc
//! comment with a tag table per constant. No exporter is wired up here;
//! components accept an `Arc<dyn Recorder>` and default to a no-op.

use std::sync::Arc;

/// Receives pipeline events. All methods have a default no-op body so a
/// caller implementing only the events it cares about doesn't have to
/// stub the rest.
pub trait Recorder: Send + Sync {
    /// Incremented once per [`recorded::DUPLICATE_REJECTED`] event.
    fn increment(&self, _metric: &'static str, _by: u64) {}
    /// Observed once per [`recorded::REDUCE_DURATION`] / sink-POST-duration event.
    fn observe_duration_ms(&self, _metric: &'static str, _millis: f64) {}
}

#[derive(Default)]
pub struct NoopRecorder;

impl Recorder for NoopRecorder {}

pub fn noop() -> Arc<dyn Recorder> {
    Arc::new(NoopRecorder)
}

pub mod recorded {
    /// Counter. Incremented every time the duplicate filter (or its store
    /// fallback) rejects an input as already processed.
    ///
    /// | Tag | Description |
    /// | --- | --- |
    /// | none | |
    pub const DUPLICATE_REJECTED: &str = "reducer_duplicate_rejected";

    /// Histogram (milliseconds). One observation per completed group
    /// reduce, from lock acquisition to lock release.
    ///
    /// | Tag | Description |
    /// | --- | --- |
    /// | group | the group key the reduce ran under |
    pub const REDUCE_DURATION: &str = "reducer_reduce_duration_ms";

    /// Counter. Incremented once per sink POST outcome.
    ///
    /// | Tag | Description |
    /// | --- | --- |
    /// | outcome | one of `success`, `slack_conflict`, `sink_error` |
    pub const SINK_POST_OUTCOME: &str = "reducer_sink_post_outcome";

    /// Counter. Incremented on every circuit breaker state transition.
    ///
    /// | Tag | Description |
    /// | --- | --- |
    /// | to | one of `open`, `half_open`, `closed` |
    pub const BREAKER_TRANSITION: &str = "reducer_breaker_transition";

    /// Counter. Incremented once per input replayed or failed-to-replay.
    ///
    /// | Tag | Description |
    /// | --- | --- |
    /// | outcome | one of `replayed`, `failed` |
    pub const REPLAY_OUTCOME: &str = "reducer_replay_outcome";

    /// Counter. Incremented once per store `put` conflict (409).
    ///
    /// | Tag | Description |
    /// | --- | --- |
    /// | store | one of `input`, `output`, `error` |
    pub const STORE_CONFLICT: &str = "reducer_store_conflict";
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingRecorder(AtomicU64);

    impl Recorder for CountingRecorder {
        fn increment(&self, _metric: &'static str, by: u64) {
            self.0.fetch_add(by, Ordering::SeqCst);
        }
    }

    #[test]
    fn recorder_default_methods_are_noops() {
        let recorder = NoopRecorder;
        recorder.increment(recorded::DUPLICATE_REJECTED, 1);
        recorder.observe_duration_ms(recorded::REDUCE_DURATION, 12.0);
    }

    #[test]
    fn custom_recorder_observes_increments() {
        let recorder = CountingRecorder(AtomicU64::new(0));
        recorder.increment(recorded::SINK_POST_OUTCOME, 3);
        assert_eq!(recorder.0.load(Ordering::SeqCst), 3);
    }
}
