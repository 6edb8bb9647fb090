//! Replay driver (§4.J): rescans a time window of input docs and
//! re-submits any that have no recorded output and no recorded error.

use std::sync::Arc;

use async_trait::async_trait;
use reducer_errors::ReduceResult;
use reducer_types::{decode_tkuri, kturi, pad16, tkuri, InputDoc};
use tracing::warn;

use crate::clock::Clock;
use crate::options::{AuthContext, OutputKeysFn, OutputTimesFn};
use crate::store::{RangeQuery, Store};

/// Re-submits an input doc through the normal `play` path. Implemented by
/// [`crate::pipeline::Pipeline`]; kept as a trait here so `replay` does not
/// depend on the pipeline module that in turn depends on it.
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, idoc: InputDoc, auth: AuthContext) -> ReduceResult<()>;
}

/// Outcome counters for one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub replayed: u64,
    pub failed: u64,
}

pub struct ReplayDriver {
    input_store: Arc<dyn Store>,
    output_store: Option<Arc<dyn Store>>,
    error_store: Option<Arc<dyn Store>>,
    output_keys: Arc<dyn OutputKeysFn>,
    output_times: Arc<dyn OutputTimesFn>,
    submitter: Arc<dyn Submitter>,
    clock: Arc<dyn Clock>,
    page_size: usize,
}

impl ReplayDriver {
    pub fn new(
        input_store: Arc<dyn Store>,
        output_store: Option<Arc<dyn Store>>,
        error_store: Option<Arc<dyn Store>>,
        output_keys: Arc<dyn OutputKeysFn>,
        output_times: Arc<dyn OutputTimesFn>,
        submitter: Arc<dyn Submitter>,
        clock: Arc<dyn Clock>,
        page_size: usize,
    ) -> Self {
        ReplayDriver {
            input_store,
            output_store,
            error_store,
            output_keys,
            output_times,
            submitter,
            clock,
            page_size,
        }
    }

    /// Scans inputs logged within `window_ms` of now, re-submitting every
    /// one missing both an output and an error record.
    pub async fn run(&self, window_ms: u64, auth: AuthContext) -> ReduceResult<ReplayStats> {
        let now = self.clock.now_ms();
        let window_start = now - window_ms as i64;
        let mut stats = ReplayStats::default();
        let mut cursor = format!("t/{}", pad16(window_start.max(0)));
        let endkey = format!("t/{}", pad16(now));

        loop {
            let page = self
                .input_store
                .all_docs(RangeQuery::new(cursor.clone(), endkey.clone()).limit(self.page_size))
                .await?;
            if page.is_empty() {
                break;
            }
            let page_len = page.len();
            let mut last_id = cursor.clone();

            for row in &page {
                last_id = row.id.clone();
                let input: InputDoc = match serde_json::from_value(serde_json::Value::Object(row.body.clone())) {
                    Ok(doc) => doc,
                    Err(err) => {
                        warn!(id = %row.id, error = %err, "replay: input doc failed to deserialize, skipping");
                        stats.failed += 1;
                        continue;
                    }
                };

                if self.needs_replay(&input).await? {
                    let mut resubmit = input;
                    resubmit.processed_id = String::new();
                    resubmit.processed = 0;
                    resubmit.id = String::new();
                    match self.submitter.submit(resubmit, auth.clone()).await {
                        Ok(()) => stats.replayed += 1,
                        Err(err) => {
                            warn!(error = %err, "replay: resubmission failed");
                            stats.failed += 1;
                        }
                    }
                }
            }

            if page_len < self.page_size {
                break;
            }
            // advance past the last row seen; appending a NUL byte produces
            // the lexicographically-next possible key.
            cursor = format!("{last_id}\u{0}");
        }

        Ok(stats)
    }

    async fn needs_replay(&self, idoc: &InputDoc) -> ReduceResult<bool> {
        let okeys = self.output_keys.keys(&idoc.payload);
        let otimes = self.output_times.times(&idoc.payload);
        let (Some(okey), Some(otime)) = (okeys.last(), otimes.last()) else {
            return Ok(false);
        };
        let output_id = kturi(okey, *otime).to_string();
        if let Some(output_store) = &self.output_store {
            if output_store.get(&output_id).await?.is_some() {
                return Ok(false);
            }
        }
        if let Some(error_store) = &self.error_store {
            if let Some((ekey, etime)) = decode_tkuri(&idoc.id) {
                let error_id = tkuri(ekey, etime).to_string();
                if error_store.get(&error_id).await?.is_some() {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::{Map, Value};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    struct LastKey;
    impl OutputKeysFn for LastKey {
        fn keys(&self, payload: &Map<String, Value>) -> Vec<String> {
            vec![payload.get("org").and_then(Value::as_str).unwrap_or("o1").to_string()]
        }
    }
    struct TimesFromPayload;
    impl OutputTimesFn for TimesFromPayload {
        fn times(&self, payload: &Map<String, Value>) -> Vec<i64> {
            vec![payload.get("otime").and_then(Value::as_i64).unwrap_or(0)]
        }
    }

    struct CountingSubmitter {
        submitted: Mutex<Vec<String>>,
        calls: AtomicU64,
    }
    impl CountingSubmitter {
        fn new() -> Self {
            CountingSubmitter {
                submitted: Mutex::new(Vec::new()),
                calls: AtomicU64::new(0),
            }
        }
    }
    #[async_trait]
    impl Submitter for CountingSubmitter {
        async fn submit(&self, idoc: InputDoc, _auth: AuthContext) -> ReduceResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.submitted.lock().unwrap().push(idoc.payload.get("marker").and_then(Value::as_str).unwrap_or("").to_string());
            Ok(())
        }
    }

    fn input_row(id: &str, marker: &str, otime: i64) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("id".into(), Value::from(id));
        body.insert("processed_id".into(), Value::from("0000000000000001"));
        body.insert("processed".into(), Value::from(1_700_000_000_000i64));
        body.insert("marker".into(), Value::from(marker));
        body.insert("org".into(), Value::from("o1"));
        body.insert("otime".into(), Value::from(otime));
        body
    }

    #[tokio::test]
    async fn replay_skips_inputs_that_already_have_an_output() {
        let input_store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let output_store: Arc<dyn Store> = Arc::new(InMemoryStore::new());

        let has_output_id = reducer_types::tkuri("o1", 1_700_000_000_000).to_string();
        input_store
            .put(input_row(&has_output_id, "has-output", 1_700_000_000_000), None)
            .await
            .unwrap();
        let missing_id = reducer_types::tkuri("o1", 1_700_000_000_001).to_string();
        input_store
            .put(input_row(&missing_id, "missing-output", 1_700_000_000_001), None)
            .await
            .unwrap();

        let mut accum = Map::new();
        accum.insert("id".into(), Value::from(kturi("o1", 1_700_000_000_000).to_string()));
        output_store.put(accum, None).await.unwrap();

        let submitter = Arc::new(CountingSubmitter::new());
        let driver = ReplayDriver::new(
            input_store,
            Some(output_store),
            None,
            Arc::new(LastKey),
            Arc::new(TimesFromPayload),
            submitter.clone(),
            Arc::new(crate::clock::FixedClock(1_700_000_100_000)),
            200,
        );

        let stats = driver.run(3_600_000, AuthContext::default()).await.unwrap();
        assert_eq!(stats.replayed, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(*submitter.submitted.lock().unwrap(), vec!["missing-output".to_string()]);
    }
}
