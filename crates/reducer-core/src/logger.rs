//! Durable logging (§4.C): writes input, output, and error documents with
//! the idempotency guarantee each doc type needs against resubmission and
//! partial-batch interruption.

use std::sync::Arc;

use reducer_errors::{ReduceError, ReduceResult};
use reducer_types::{ErrorDoc, InputDoc, OutputDoc};

use crate::store::Store;

pub struct Logger {
    input_store: Arc<dyn Store>,
    output_store: Option<Arc<dyn Store>>,
    error_store: Option<Arc<dyn Store>>,
}

impl Logger {
    pub fn new(input_store: Arc<dyn Store>, output_store: Option<Arc<dyn Store>>, error_store: Option<Arc<dyn Store>>) -> Self {
        Logger {
            input_store,
            output_store,
            error_store,
        }
    }

    /// Logs an input doc. A write conflict here means a same-key,
    /// same-time resubmission raced this one and landed first — duplicate
    /// detection itself is the filter's job (§4.D), not this method's, so
    /// the conflict is swallowed rather than surfaced.
    pub async fn log_input(&self, doc: &mut InputDoc) -> ReduceResult<()> {
        let body = doc.without_rev();
        match self.input_store.put(body, None).await {
            Ok(rev) => {
                doc.rev = Some(rev);
                Ok(())
            }
            Err(ReduceError::StoreConflict { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Writes (or updates) a single output/accumulator doc, presenting
    /// whatever revision the caller read earlier in this reduce. A no-op
    /// when the output store is not configured (§4.F: "if odb is not
    /// configured... step 7 is skipped").
    pub async fn log_output(&self, doc: &mut OutputDoc, back_ref_field: &str) -> ReduceResult<()> {
        let Some(output_store) = &self.output_store else {
            return Ok(());
        };
        let prior_rev = doc.rev.clone();
        let body = doc.without_rev(back_ref_field);
        let rev = output_store.put(body, prior_rev.as_ref()).await?;
        doc.rev = Some(rev);
        Ok(())
    }

    /// Writes every output doc produced by one reduce call. Two calls in a
    /// batch can target the same output id; the slot with the latest
    /// `processed` time wins, and writes happen in descending `processed`
    /// order so an interruption partway through still leaves the newest
    /// surviving write as the one `lastAccum`'s descending scan (§4.B)
    /// finds first.
    pub async fn log_outputs(&self, docs: &mut [OutputDoc], back_ref_field: &str) -> ReduceResult<()> {
        let mut order: Vec<usize> = Vec::new();
        for (i, doc) in docs.iter().enumerate() {
            if let Some(slot) = order.iter().position(|&j| docs[j].id == doc.id) {
                order[slot] = i;
            } else {
                order.push(i);
            }
        }
        order.sort_by(|&a, &b| docs[b].processed.cmp(&docs[a].processed));
        for i in order {
            self.log_output(&mut docs[i], back_ref_field).await?;
        }
        Ok(())
    }

    /// Logs an error doc, but only the first time: error docs are
    /// immutable once written, so a resubmission that lands on the same
    /// error id leaves the original failure record untouched. A no-op when
    /// the error store is not configured.
    pub async fn log_error(&self, doc: &ErrorDoc) -> ReduceResult<()> {
        let Some(error_store) = &self.error_store else {
            return Ok(());
        };
        if error_store.get(&doc.id).await?.is_some() {
            return Ok(());
        }
        let value = serde_json::to_value(doc).map_err(|e| ReduceError::Config(format!("error doc serialization failed: {e}")))?;
        let body = value
            .as_object()
            .ok_or_else(|| ReduceError::Config("error doc did not serialize to an object".to_string()))?
            .clone();
        match error_store.put(body, None).await {
            Ok(_) => Ok(()),
            Err(ReduceError::StoreConflict { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
