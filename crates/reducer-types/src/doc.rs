//! Document model: input docs, output/accumulator docs, and error docs.
//!
//! Payloads are opaque to the pipeline (§4.F step 3 folds them through a
//! user-supplied reducer), so each doc flattens an arbitrary JSON object
//! alongside the engine-assigned envelope fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque revision token returned by the store on `put`.
///
/// Never parsed or compared by the engine; only threaded through so a
/// later `put` can present it back for optimistic concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision(pub String);

/// An input document (a usage event) as received, stamped, and logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDoc {
    pub id: String,
    /// `pad16(itime)`.
    pub processed_id: String,
    /// Numeric `itime`, carried alongside `processed_id` for range scans
    /// that need it as a number rather than a padded string.
    pub processed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rev: Option<Revision>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl InputDoc {
    /// Body posted to the sink: the doc minus its revision.
    pub fn without_rev(&self) -> Map<String, Value> {
        let mut body = self.payload.clone();
        body.insert("id".into(), Value::String(self.id.clone()));
        body.insert("processed_id".into(), Value::String(self.processed_id.clone()));
        body.insert("processed".into(), Value::from(self.processed));
        body
    }
}

/// An output document produced by the reducer; also the accumulator doc
/// shape when it is the latest state for its group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDoc {
    pub id: String,
    pub processed_id: String,
    pub processed: i64,
    /// Back-reference to the originating input doc's id, keyed by
    /// `<inputType>_id` in the wire format; kept as a plain field here
    /// since the input type name is a deployment-time concern (threaded
    /// through `PipelineOptions`), not part of the document model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rev: Option<Revision>,
    /// Set when the reducer marked this output as failed; such outputs are
    /// skipped at the sink and log steps but still returned as an error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl OutputDoc {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Body posted to the sink: the doc minus its revision, with the
    /// back-reference field folded in under `back_ref_field`.
    pub fn without_rev(&self, back_ref_field: &str) -> Map<String, Value> {
        let mut body = self.payload.clone();
        body.insert("id".into(), Value::String(self.id.clone()));
        body.insert("processed_id".into(), Value::String(self.processed_id.clone()));
        body.insert("processed".into(), Value::from(self.processed));
        if let Some(back_ref) = &self.back_ref {
            body.insert(back_ref_field.to_string(), Value::String(back_ref.clone()));
        }
        body
    }
}

/// An error document: the original input augmented with error detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDoc {
    pub id: String,
    pub error: &'static str,
    pub reason: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// The id the original input carried before it was overwritten by the
    /// error doc's own `tkuri(ekey, etime)` id (§9 open-question decision:
    /// stored so callers can recover it).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_input_id: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}
