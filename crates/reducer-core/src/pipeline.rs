//! Pipeline (§4.x): wires the partitioner, store, duplicate filter,
//! per-group lock, reduce engine, sink poster, logger, and replay driver
//! into the router-facing contracts `play`, `getInput`, `getOutput`,
//! `getErrors`, `deleteError`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{info_span, warn, Instrument};

use reducer_errors::{ReduceError, ReduceResult};
use reducer_types::{kturi, pad16, tkuri, ErrorDoc, InputDoc, OutputDoc, Revision};

use crate::clock::Clock;
use crate::dup_filter::DuplicateFilter;
use crate::lock::GroupLock;
use crate::logger::Logger;
use crate::metrics::{noop, recorded, Recorder};
use crate::options::{AuthContext, PipelineOptions};
use crate::reduce::{ReduceCall, ReduceEngine};
use crate::replay::{ReplayDriver, ReplayStats, Submitter};
use crate::sink::SinkPoster;
use crate::store::{RangeQuery, Store};

/// Error-list queries spanning more than this many milliseconds (an
/// average month) are rejected with [`ReduceError::WindowLimit`] (§8
/// boundary behavior).
const ERROR_WINDOW_LIMIT_MS: i64 = 2_629_746_000;

pub struct Pipeline {
    options: PipelineOptions,
    input_store: Arc<dyn Store>,
    output_store: Option<Arc<dyn Store>>,
    error_store: Option<Arc<dyn Store>>,
    dup_filter: DuplicateFilter,
    group_lock: GroupLock,
    reduce_engine: ReduceEngine,
    sink_poster: Option<SinkPoster>,
    logger: Logger,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn Recorder>,
    page_size: usize,
}

impl Pipeline {
    pub fn new(
        options: PipelineOptions,
        input_store: Arc<dyn Store>,
        output_store: Option<Arc<dyn Store>>,
        error_store: Option<Arc<dyn Store>>,
        sink_poster: Option<SinkPoster>,
        page_size: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let dup_filter = DuplicateFilter::new(options.input.dedupe);
        let reduce_engine = ReduceEngine::new(output_store.clone(), options.reducer.clone(), clock.clone());
        let logger = Logger::new(input_store.clone(), output_store.clone(), error_store.clone());
        Pipeline {
            options,
            input_store,
            output_store,
            error_store,
            dup_filter,
            group_lock: GroupLock::new(),
            reduce_engine,
            sink_poster,
            logger,
            clock,
            metrics: noop(),
            page_size,
        }
    }

    pub fn with_recorder(mut self, metrics: Arc<dyn Recorder>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Runs one input through the full pipeline: lock the group, reject
    /// duplicates, log the input, reduce against the latest accumulator,
    /// fan out to the sink, and log the outcome.
    pub async fn play(&self, payload: Map<String, Value>, auth: AuthContext) -> ReduceResult<InputDoc> {
        let ikey = self.options.input.key.key(&payload, &auth);
        let itime = self.options.input.time.time(&payload);
        let igroups = self.options.input.groups.groups(&payload);
        let group_key = igroups.join("/");

        let span = info_span!("reduce", group = %group_key);
        async {
            let _guard = self.group_lock.acquire(&group_key).await;

            let id = tkuri(&ikey, itime).to_string();

            if self.options.input.dedupe && self.dup_filter.has(&id) && self.input_store.get(&id).await?.is_some() {
                self.metrics.increment(recorded::DUPLICATE_REJECTED, 1);
                return Err(ReduceError::Duplicate { id });
            }
            self.dup_filter.add(&id);

            let mut idoc = InputDoc {
                id: id.clone(),
                processed_id: pad16(itime),
                processed: itime,
                rev: None,
                payload,
            };
            self.logger.log_input(&mut idoc).await?;

            let okeys = self.options.output.keys.keys(&idoc.payload);
            let otimes = self.options.output.times.times(&idoc.payload);

            let call = ReduceCall {
                idoc: idoc.clone(),
                itime,
                igroups,
                okeys,
                otimes,
                skeys: Vec::new(),
                stimes: Vec::new(),
                auth: auth.clone(),
            };

            let mut outputs = match self.reduce_engine.reduce_batch(std::slice::from_ref(&call)).await {
                Ok(mut per_call) => per_call.pop().unwrap_or_default(),
                Err(err) => {
                    self.record_error(&idoc, &err).await;
                    return Err(err);
                }
            };

            if let Some(err) = Self::first_reducer_error(&outputs) {
                self.record_error(&idoc, &err).await;
                return Err(err);
            }

            let back_ref_field = self.options.input.back_ref_field();
            let authorization = self
                .options
                .sink
                .authentication
                .as_ref()
                .and_then(|provider| provider.authorization(&auth));

            if let Some(sink) = &self.sink_poster {
                if let Err(err) = sink.post_all(&outputs, &back_ref_field, authorization.as_deref()).await {
                    self.record_error(&idoc, &err).await;
                    return Err(err);
                }
            }

            if self.output_store.is_some() {
                self.logger.log_outputs(&mut outputs, &back_ref_field).await?;
            }

            Ok(idoc)
        }
        .instrument(span)
        .await
    }

    fn first_reducer_error(outputs: &[OutputDoc]) -> Option<ReduceError> {
        let errored = outputs.iter().find(|o| o.is_error())?;
        let value = errored.error.clone().unwrap_or(Value::Null);
        let kind = value.get("kind").and_then(Value::as_str);
        Some(match kind {
            Some("expression") => ReduceError::Expression(value.to_string()),
            Some("timeout") => ReduceError::Timeout(value.to_string()),
            _ => ReduceError::Reducer(value.to_string()),
        })
    }

    async fn record_error(&self, idoc: &InputDoc, err: &ReduceError) {
        if !err.should_log() || self.error_store.is_none() {
            return;
        }
        let body = err.to_body();
        let error_doc = ErrorDoc {
            id: idoc.id.clone(),
            error: body.error,
            reason: body.reason,
            cause: None,
            original_input_id: Some(idoc.id.clone()),
            payload: idoc.payload.clone(),
        };
        if let Err(log_err) = self.logger.log_error(&error_doc).await {
            warn!(error = %log_err, "failed to write error doc");
        }
    }

    pub async fn get_input(&self, k: &str, t: i64) -> ReduceResult<InputDoc> {
        let id = tkuri(k, t).to_string();
        let stored = self.input_store.get(&id).await?.ok_or_else(|| ReduceError::NotFound { id: id.clone() })?;
        Self::doc_from_stored::<InputDoc>(stored.body, stored.rev)
    }

    pub async fn get_output(&self, k: &str, t: i64) -> ReduceResult<OutputDoc> {
        let id = kturi(k, t).to_string();
        let store = self
            .output_store
            .as_ref()
            .ok_or_else(|| ReduceError::Config("output store not configured".to_string()))?;
        let stored = store.get(&id).await?.ok_or_else(|| ReduceError::NotFound { id: id.clone() })?;
        Self::doc_from_stored::<OutputDoc>(stored.body, stored.rev)
    }

    fn doc_from_stored<T: serde::de::DeserializeOwned>(mut body: Map<String, Value>, rev: Revision) -> ReduceResult<T> {
        body.insert("rev".into(), serde_json::to_value(&rev).unwrap_or(Value::Null));
        serde_json::from_value(Value::Object(body)).map_err(|e| ReduceError::Config(format!("stored doc failed to deserialize: {e}")))
    }

    /// Range-scans the error store descending over `[tstart, tend]`,
    /// rejecting windows wider than [`ERROR_WINDOW_LIMIT_MS`].
    pub async fn get_errors(&self, tstart: i64, tend: i64) -> ReduceResult<Vec<ErrorDoc>> {
        if tend - tstart > ERROR_WINDOW_LIMIT_MS {
            return Err(ReduceError::WindowLimit);
        }
        let store = self
            .error_store
            .as_ref()
            .ok_or_else(|| ReduceError::Config("error store not configured".to_string()))?;
        let startkey = format!("t/{}ZZZ", pad16(tend));
        let endkey = format!("t/{}", pad16(tstart));
        let rows = store.all_docs(RangeQuery::new(startkey, endkey).descending(true)).await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(Value::Object(row.body)).map_err(|e| ReduceError::Config(format!("error doc failed to deserialize: {e}"))))
            .collect()
    }

    pub async fn delete_error(&self, k: &str, t: i64) -> ReduceResult<()> {
        let id = tkuri(k, t).to_string();
        let store = self
            .error_store
            .as_ref()
            .ok_or_else(|| ReduceError::Config("error store not configured".to_string()))?;
        let stored = store.get(&id).await?.ok_or_else(|| ReduceError::NotFound { id: id.clone() })?;
        store.remove(&id, &stored.rev).await
    }

    /// Runs replay over `window_ms`. Requires `self` to be held behind an
    /// `Arc` since the replay driver re-submits through `play` via the
    /// [`Submitter`] trait.
    pub async fn run_replay(self: &Arc<Self>, window_ms: u64, auth: AuthContext) -> ReduceResult<ReplayStats> {
        let driver = ReplayDriver::new(
            self.input_store.clone(),
            self.output_store.clone(),
            self.error_store.clone(),
            self.options.output.keys.clone(),
            self.options.output.times.clone(),
            self.clone() as Arc<dyn Submitter>,
            self.clock.clone(),
            self.page_size,
        );
        let stats = driver.run(window_ms, auth).await?;
        self.metrics.increment(recorded::REPLAY_OUTCOME, stats.replayed);
        Ok(stats)
    }
}

#[async_trait]
impl Submitter for Pipeline {
    async fn submit(&self, idoc: InputDoc, auth: AuthContext) -> ReduceResult<()> {
        self.play(idoc.payload, auth).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{GroupFn, InputOptions, KeyFn, OutputKeysFn, OutputOptions, OutputTimesFn, Reducer, ReducerSlot, SinkOptions, TimeFn};
    use crate::store::InMemoryStore;

    struct OrgKey;
    impl KeyFn for OrgKey {
        fn key(&self, payload: &Map<String, Value>, _auth: &AuthContext) -> String {
            payload.get("org").and_then(Value::as_str).unwrap_or("o1").to_string()
        }
    }
    struct PayloadTime;
    impl TimeFn for PayloadTime {
        fn time(&self, payload: &Map<String, Value>) -> i64 {
            payload.get("t").and_then(Value::as_i64).unwrap_or(0)
        }
    }
    struct OrgGroup;
    impl GroupFn for OrgGroup {
        fn groups(&self, payload: &Map<String, Value>) -> Vec<String> {
            vec![payload.get("org").and_then(Value::as_str).unwrap_or("o1").to_string()]
        }
    }
    struct SameAsOrg;
    impl OutputKeysFn for SameAsOrg {
        fn keys(&self, payload: &Map<String, Value>) -> Vec<String> {
            vec![payload.get("org").and_then(Value::as_str).unwrap_or("o1").to_string()]
        }
    }
    struct SameAsTime;
    impl OutputTimesFn for SameAsTime {
        fn times(&self, payload: &Map<String, Value>) -> Vec<i64> {
            vec![payload.get("t").and_then(Value::as_i64).unwrap_or(0)]
        }
    }
    struct SumReducer;
    impl Reducer for SumReducer {
        fn reduce(&self, accum: &[Option<ReducerSlot>], input: &InputDoc) -> Vec<ReducerSlot> {
            let added = input.payload.get("usage").and_then(Value::as_i64).unwrap_or(0);
            accum
                .iter()
                .map(|slot| {
                    let prior = slot.as_ref().and_then(|s| s.payload.get("total")).and_then(Value::as_i64).unwrap_or(0);
                    let mut payload = Map::new();
                    payload.insert("total".into(), Value::from(prior + added));
                    ReducerSlot::ok(payload)
                })
                .collect()
        }
    }

    fn test_options() -> PipelineOptions {
        PipelineOptions {
            input: InputOptions {
                type_name: "usage".to_string(),
                dbname: Some("input".to_string()),
                key: Arc::new(OrgKey),
                groups: Arc::new(OrgGroup),
                time: Arc::new(PayloadTime),
                dedupe: true,
            },
            output: OutputOptions {
                dbname: Some("output".to_string()),
                keys: Arc::new(SameAsOrg),
                times: Arc::new(SameAsTime),
            },
            sink: SinkOptions {
                host: "http://sink.test".to_string(),
                apps: 1,
                posts: "/output".to_string(),
                authentication: None,
            },
            error: Default::default(),
            reducer: Arc::new(SumReducer),
        }
    }

    fn payload(org: &str, t: i64, usage: i64) -> Map<String, Value> {
        let mut p = Map::new();
        p.insert("org".into(), Value::from(org));
        p.insert("t".into(), Value::from(t));
        p.insert("usage".into(), Value::from(usage));
        p
    }

    #[tokio::test]
    async fn happy_reduce_logs_input_and_output_without_a_sink() {
        let pipeline = Pipeline::new(
            test_options(),
            Arc::new(InMemoryStore::new()),
            Some(Arc::new(InMemoryStore::new())),
            Some(Arc::new(InMemoryStore::new())),
            None,
            200,
            Arc::new(crate::clock::FixedClock(1_700_000_100_000)),
        );
        let idoc = pipeline.play(payload("o1", 1_700_000_000_000, 1), AuthContext::default()).await.unwrap();
        assert_eq!(idoc.id, "t/000001700000000000/k/o1");

        let output = pipeline.get_output("o1", 1_700_000_000_000).await.unwrap();
        assert_eq!(output.payload.get("total").unwrap(), 1);
        assert_eq!(output.back_ref.as_deref(), Some(idoc.id.as_str()));
    }

    #[tokio::test]
    async fn duplicate_submission_is_rejected_on_the_second_play() {
        let pipeline = Pipeline::new(
            test_options(),
            Arc::new(InMemoryStore::new()),
            Some(Arc::new(InMemoryStore::new())),
            Some(Arc::new(InMemoryStore::new())),
            None,
            200,
            Arc::new(crate::clock::FixedClock(1_700_000_100_000)),
        );
        pipeline.play(payload("o1", 1_700_000_000_000, 1), AuthContext::default()).await.unwrap();
        let err = pipeline.play(payload("o1", 1_700_000_000_000, 1), AuthContext::default()).await.unwrap_err();
        assert!(matches!(err, ReduceError::Duplicate { .. }));

        // a duplicate is not a failure: no error doc is written.
        let errors = pipeline.get_errors(0, 1_700_000_200_000).await.unwrap();
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn error_window_wider_than_a_month_is_rejected() {
        let pipeline = Pipeline::new(
            test_options(),
            Arc::new(InMemoryStore::new()),
            Some(Arc::new(InMemoryStore::new())),
            Some(Arc::new(InMemoryStore::new())),
            None,
            200,
            Arc::new(crate::clock::FixedClock(0)),
        );
        let err = pipeline.get_errors(0, ERROR_WINDOW_LIMIT_MS + 1).await.unwrap_err();
        assert!(matches!(err, ReduceError::WindowLimit));
        pipeline.get_errors(0, ERROR_WINDOW_LIMIT_MS).await.unwrap();
    }
}
