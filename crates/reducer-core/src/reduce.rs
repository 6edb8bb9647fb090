//! Reduce engine (§4.F): the heart of the pipeline. For a batch of calls
//! sharing a group, reads each output slot's latest accumulator once, folds
//! every call's input through the user reducer in order, and materializes
//! the resulting output docs.
//!
//! A batch's calls are assumed to share `okeys`/`otimes` (they address the
//! same output slots; only the input doc differs per call) — the same
//! assumption the source's fold makes when it says the result "is an array
//! aligned with okeys" for every call in the batch.

use std::sync::Arc;

use reducer_errors::{ReduceError, ReduceResult};
use reducer_types::{kturi, pad16, InputDoc, OutputDoc};

use crate::clock::Clock;
use crate::options::{AuthContext, Reducer, ReducerSlot};
use crate::store::{RangeQuery, Store, StoredDoc};

/// One unit of work submitted to the reduce engine. `skeys`/`stimes` are
/// carried through from the call shape but are not consulted by the
/// algorithm below — every output in this target routes and logs under
/// `okeys`/`otimes`.
#[derive(Clone)]
pub struct ReduceCall {
    pub idoc: InputDoc,
    pub itime: i64,
    pub igroups: Vec<String>,
    pub okeys: Vec<String>,
    pub otimes: Vec<i64>,
    pub skeys: Vec<String>,
    pub stimes: Vec<i64>,
    pub auth: AuthContext,
}

impl ReduceCall {
    pub fn group_key(&self) -> String {
        self.igroups.join("/")
    }
}

pub struct ReduceEngine {
    output_store: Option<Arc<dyn Store>>,
    reducer: Arc<dyn Reducer>,
    clock: Arc<dyn Clock>,
}

impl ReduceEngine {
    pub fn new(output_store: Option<Arc<dyn Store>>, reducer: Arc<dyn Reducer>, clock: Arc<dyn Clock>) -> Self {
        ReduceEngine {
            output_store,
            reducer,
            clock,
        }
    }

    /// Range-scans for the latest accumulator at `(okey, otime)`'s month,
    /// per §4.F step 2: `startkey` is past the end of the month (the "ZZZ"
    /// suffix sorts after any real `pad16` time in that month), `endkey` is
    /// the start of the month, scanned descending with `limit=1`.
    async fn last_accum(&self, store: &dyn Store, okey: &str, otime: i64) -> ReduceResult<Option<StoredDoc>> {
        let (start_of_month, end_of_month) = month_bounds(otime);
        let startkey = format!("{}ZZZ", kturi(okey, end_of_month));
        let endkey = kturi(okey, start_of_month).to_string();
        let rows = store
            .all_docs(RangeQuery::new(startkey, endkey).descending(true).limit(1))
            .await?;
        Ok(rows.into_iter().next())
    }

    fn slot_from_stored(doc: &StoredDoc) -> ReducerSlot {
        let mut payload = doc.body.clone();
        for field in ["id", "processed_id", "processed", "rev"] {
            payload.remove(field);
        }
        let error = payload.remove("error");
        ReducerSlot { payload, error }
    }

    /// Runs steps 2–4 of §4.F for one group batch. Returns, per call, the
    /// materialized output docs aligned with `okeys`; the caller is
    /// responsible for steps 5–8 (error detection, sink POST, conditional
    /// logging, lock release).
    pub async fn reduce_batch(&self, calls: &[ReduceCall]) -> ReduceResult<Vec<Vec<OutputDoc>>> {
        let Some(first) = calls.first() else {
            return Ok(Vec::new());
        };
        let okeys = &first.okeys;
        let otimes = &first.otimes;

        let mut accum_ids: Vec<Option<String>> = Vec::with_capacity(okeys.len());
        let mut accum_revs: Vec<Option<reducer_types::Revision>> = Vec::with_capacity(okeys.len());
        let mut running: Vec<Option<ReducerSlot>> = Vec::with_capacity(okeys.len());

        if let Some(store) = &self.output_store {
            for (okey, otime) in okeys.iter().zip(otimes.iter()) {
                match self.last_accum(store.as_ref(), okey, *otime).await? {
                    Some(stored) => {
                        accum_ids.push(Some(stored.id.clone()));
                        accum_revs.push(Some(stored.rev.clone()));
                        running.push(Some(Self::slot_from_stored(&stored)));
                    }
                    None => {
                        accum_ids.push(None);
                        accum_revs.push(None);
                        running.push(None);
                    }
                }
            }
        } else {
            // odb not configured: step 2 returns {} for every slot, step 7
            // (the caller's logging step) is skipped entirely.
            accum_ids.resize(okeys.len(), None);
            accum_revs.resize(okeys.len(), None);
            running.resize(okeys.len(), None);
        }

        let mut per_call = Vec::with_capacity(calls.len());
        for call in calls {
            let slots = self.reducer.reduce(&running, &call.idoc);
            if slots.len() != okeys.len() {
                return Err(ReduceError::Reducer(format!(
                    "reducer returned {} output slot(s), expected {} to match okeys",
                    slots.len(),
                    okeys.len()
                )));
            }

            let now = self.clock.now_ms();
            let mut materialized = Vec::with_capacity(slots.len());
            for (i, slot) in slots.into_iter().enumerate() {
                let id = kturi(&call.okeys[i], call.otimes[i]).to_string();
                let rev = if accum_ids[i].as_deref() == Some(id.as_str()) {
                    accum_revs[i].clone()
                } else {
                    None
                };
                let doc = OutputDoc {
                    id,
                    processed_id: pad16(now),
                    processed: now,
                    back_ref: if call.idoc.id.is_empty() { None } else { Some(call.idoc.id.clone()) },
                    rev,
                    error: slot.error.clone(),
                    payload: slot.payload.clone(),
                };
                running[i] = Some(slot);
                materialized.push(doc);
            }
            per_call.push(materialized);
        }
        Ok(per_call)
    }
}

/// `(start_of_month_ms, end_of_month_ms)` for the month containing
/// `time_ms`, both inclusive bounds.
fn month_bounds(time_ms: i64) -> (i64, i64) {
    use chrono::{Datelike, TimeZone, Utc};

    let dt = Utc.timestamp_millis_opt(time_ms).single().unwrap_or_else(Utc::now);
    let start = Utc
        .with_ymd_and_hms(dt.year(), dt.month(), 1, 0, 0, 0)
        .single()
        .expect("first of month is always representable");
    let (next_year, next_month) = if dt.month() == 12 { (dt.year() + 1, 1) } else { (dt.year(), dt.month() + 1) };
    let next_month_start = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .expect("first of next month is always representable");
    (start.timestamp_millis(), next_month_start.timestamp_millis() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::{Map, Value};

    struct SumReducer;

    impl Reducer for SumReducer {
        fn reduce(&self, accum: &[Option<ReducerSlot>], input: &InputDoc) -> Vec<ReducerSlot> {
            let added = input.payload.get("usage").and_then(Value::as_i64).unwrap_or(0);
            accum
                .iter()
                .map(|slot| {
                    let prior = slot
                        .as_ref()
                        .and_then(|s| s.payload.get("total"))
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    let mut payload = Map::new();
                    payload.insert("total".into(), Value::from(prior + added));
                    ReducerSlot::ok(payload)
                })
                .collect()
        }
    }

    fn input(id: &str, usage: i64, processed: i64) -> InputDoc {
        let mut payload = Map::new();
        payload.insert("usage".into(), Value::from(usage));
        InputDoc {
            id: id.to_string(),
            processed_id: pad16(processed),
            processed,
            rev: None,
            payload,
        }
    }

    fn call(id: &str, usage: i64, processed: i64) -> ReduceCall {
        ReduceCall {
            idoc: input(id, usage, processed),
            itime: processed,
            igroups: vec!["o1".into()],
            okeys: vec!["o1".into()],
            otimes: vec![processed],
            skeys: vec![],
            stimes: vec![],
            auth: AuthContext::default(),
        }
    }

    #[tokio::test]
    async fn first_reduce_seeds_from_empty_accumulator() {
        let engine = ReduceEngine::new(None, Arc::new(SumReducer), Arc::new(FixedClockForTest(42)));
        let calls = vec![call("t/1/k/o1", 1, 1)];
        let results = engine.reduce_batch(&calls).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0][0].payload.get("total").unwrap(), 1);
        assert_eq!(results[0][0].processed, 42);
        assert!(results[0][0].rev.is_none());
    }

    #[tokio::test]
    async fn second_reduce_folds_against_logged_accumulator() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let mut seed = Map::new();
        seed.insert("id".into(), Value::from("k/o1/t/0000000000000001"));
        seed.insert("total".into(), Value::from(1));
        let rev = store.put(seed, None).await.unwrap();

        let engine = ReduceEngine::new(Some(store), Arc::new(SumReducer), Arc::new(FixedClockForTest(100)));
        let calls = vec![call("t/2/k/o1", 2, 1)];
        let results = engine.reduce_batch(&calls).await.unwrap();
        assert_eq!(results[0][0].payload.get("total").unwrap(), 3);
        assert_eq!(results[0][0].rev, Some(rev));
    }

    #[tokio::test]
    async fn batch_folds_sequentially_across_calls() {
        let engine = ReduceEngine::new(None, Arc::new(SumReducer), Arc::new(FixedClockForTest(7)));
        let calls = vec![call("t/1/k/o1", 1, 1), call("t/2/k/o1", 2, 2)];
        let results = engine.reduce_batch(&calls).await.unwrap();
        assert_eq!(results[0][0].payload.get("total").unwrap(), 1);
        assert_eq!(results[1][0].payload.get("total").unwrap(), 3);
    }

    #[test]
    fn month_bounds_cover_the_whole_month() {
        // 2023-11-14T22:13:20Z
        let (start, end) = month_bounds(1_700_000_000_000);
        assert!(start <= 1_700_000_000_000);
        assert!(end >= 1_700_000_000_000);
        // November has 30 days.
        assert_eq!(end - start, 30 * 24 * 3600 * 1000 - 1);
    }

    struct FixedClockForTest(i64);
    impl Clock for FixedClockForTest {
        fn now_ms(&self) -> i64 {
            self.0
        }
    }
}
