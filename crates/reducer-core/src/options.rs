//! Pipeline configuration and user-supplied callbacks.
//!
//! The source threads a dynamic `options` object through every layer
//! (`opt.input.key`, `opt.sink.posts`, ...). This target models that as an
//! explicit record of plain fields plus trait-object callbacks, per the
//! design note in §9.

use std::sync::Arc;

use serde_json::{Map, Value};

use reducer_types::InputDoc;

/// Pre-authenticated caller identity, threaded through `play` and into the
/// sink poster. Scope/authz checks themselves happen upstream of this
/// crate (§1 out-of-scope: "authorization/scope checks").
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub token: Option<String>,
    pub scope: Option<String>,
}

/// Derives the input key tuple `ikey` from a payload and caller identity.
pub trait KeyFn: Send + Sync {
    fn key(&self, payload: &Map<String, Value>, auth: &AuthContext) -> String;
}

/// Derives the input time `itime` from a payload.
pub trait TimeFn: Send + Sync {
    fn time(&self, payload: &Map<String, Value>) -> i64;
}

/// Derives the group identifiers an input belongs to; `igroups.join("/")`
/// is the lock key (§4.E).
pub trait GroupFn: Send + Sync {
    fn groups(&self, payload: &Map<String, Value>) -> Vec<String>;
}

/// Derives the output key(s) an input contributes to.
pub trait OutputKeysFn: Send + Sync {
    fn keys(&self, payload: &Map<String, Value>) -> Vec<String>;
}

/// Derives the output time bucket(s) an input contributes to, aligned by
/// position with [`OutputKeysFn::keys`].
pub trait OutputTimesFn: Send + Sync {
    fn times(&self, payload: &Map<String, Value>) -> Vec<i64>;
}

/// One slot of reducer output, aligned by position with the output keys
/// for a call. `error` marks the slot as failed per §4.F step 5.
#[derive(Debug, Clone)]
pub struct ReducerSlot {
    pub payload: Map<String, Value>,
    pub error: Option<Value>,
}

impl ReducerSlot {
    pub fn ok(payload: Map<String, Value>) -> Self {
        ReducerSlot { payload, error: None }
    }

    pub fn failed(error: Value) -> Self {
        ReducerSlot {
            payload: Map::new(),
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// The user-supplied reduction function (§4.F step 3).
///
/// `accum` is aligned by position with the output slots for this call:
/// `accum[i]` is the prior output for slot `i`, or `None` on the first
/// reduce for that slot. The returned vector must have the same length.
pub trait Reducer: Send + Sync {
    fn reduce(&self, accum: &[Option<ReducerSlot>], input: &InputDoc) -> Vec<ReducerSlot>;
}

/// Resolves an `Authorization` header value for the sink poster.
pub trait AuthProvider: Send + Sync {
    fn authorization(&self, auth: &AuthContext) -> Option<String>;
}

/// An `AuthProvider` that forwards the caller's own token unchanged.
pub struct PassthroughAuth;

impl AuthProvider for PassthroughAuth {
    fn authorization(&self, auth: &AuthContext) -> Option<String> {
        auth.token.clone()
    }
}

#[derive(Clone)]
pub struct InputOptions {
    /// Name used to build the output back-reference field, `<type>_id`.
    pub type_name: String,
    pub dbname: Option<String>,
    pub key: Arc<dyn KeyFn>,
    pub groups: Arc<dyn GroupFn>,
    pub time: Arc<dyn TimeFn>,
    pub dedupe: bool,
}

#[derive(Clone)]
pub struct OutputOptions {
    pub dbname: Option<String>,
    pub keys: Arc<dyn OutputKeysFn>,
    pub times: Arc<dyn OutputTimesFn>,
}

#[derive(Clone)]
pub struct SinkOptions {
    pub host: String,
    pub apps: u32,
    pub posts: String,
    pub authentication: Option<Arc<dyn AuthProvider>>,
}

#[derive(Clone, Default)]
pub struct ErrorOptions {
    pub dbname: Option<String>,
}

#[derive(Clone)]
pub struct PipelineOptions {
    pub input: InputOptions,
    pub output: OutputOptions,
    pub sink: SinkOptions,
    pub error: ErrorOptions,
    pub reducer: Arc<dyn Reducer>,
}

impl InputOptions {
    /// The `<inputType>_id` back-reference field name carried on outputs.
    pub fn back_ref_field(&self) -> String {
        format!("{}_id", self.type_name)
    }
}
