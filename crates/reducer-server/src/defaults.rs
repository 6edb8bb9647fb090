//! Default key/time/group/reducer callbacks wired up by the standalone
//! binary. A real deployment links `reducer-core` directly and supplies
//! its own domain-specific callbacks (§9: "dynamic options object" →
//! trait objects supplied by the binary crate at startup); these are the
//! conventions this binary falls back to when none are provided.

use reducer_core::options::{GroupFn, KeyFn, OutputKeysFn, OutputTimesFn, Reducer, ReducerSlot, TimeFn};
use reducer_types::InputDoc;
use serde_json::{Map, Value};

/// Reads the input key from a top-level `"key"` string field.
pub struct FieldKey;
impl KeyFn for FieldKey {
    fn key(&self, payload: &Map<String, Value>, _auth: &reducer_core::options::AuthContext) -> String {
        payload.get("key").and_then(Value::as_str).unwrap_or("default").to_string()
    }
}

/// Reads the input time from a top-level `"time"` millisecond field.
pub struct FieldTime;
impl TimeFn for FieldTime {
    fn time(&self, payload: &Map<String, Value>) -> i64 {
        payload.get("time").and_then(Value::as_i64).unwrap_or(0)
    }
}

/// Groups by the same field `FieldKey` reads — one group per key.
pub struct KeyIsGroup;
impl GroupFn for KeyIsGroup {
    fn groups(&self, payload: &Map<String, Value>) -> Vec<String> {
        vec![payload.get("key").and_then(Value::as_str).unwrap_or("default").to_string()]
    }
}

pub struct SameAsInputKey;
impl OutputKeysFn for SameAsInputKey {
    fn keys(&self, payload: &Map<String, Value>) -> Vec<String> {
        vec![payload.get("key").and_then(Value::as_str).unwrap_or("default").to_string()]
    }
}

pub struct SameAsInputTime;
impl OutputTimesFn for SameAsInputTime {
    fn times(&self, payload: &Map<String, Value>) -> Vec<i64> {
        vec![payload.get("time").and_then(Value::as_i64).unwrap_or(0)]
    }
}

/// Replaces the accumulator with the incoming payload on every reduce.
/// Stands in for a domain reducer in the generic binary; real deployments
/// that need genuine accumulation (sums, merges, ...) supply a [`Reducer`]
/// of their own when embedding `reducer-core` as a library.
pub struct PassthroughReducer;
impl Reducer for PassthroughReducer {
    fn reduce(&self, accum: &[Option<ReducerSlot>], input: &InputDoc) -> Vec<ReducerSlot> {
        accum.iter().map(|_| ReducerSlot::ok(input.payload.clone())).collect()
    }
}
