//! Error taxonomy for the reduce pipeline.
//!
//! Every fallible operation in `reducer-core` and `reducer-server` returns
//! [`ReduceResult<T>`]. The HTTP surface is the only consumer of
//! [`ReduceError::status_code`] and [`ReduceError::reason`] — core logic
//! matches on variants directly and never inspects the HTTP mapping.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Crate-wide error type for the reduce pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ReduceError {
    /// The input was already processed; on the `play` path this is mapped
    /// back to a success response, never surfaced to a caller as a failure.
    #[error("duplicate input {id}")]
    Duplicate { id: String },

    /// One or more sink POSTs failed (non-409, or a disallowed 409).
    #[error("sink rejected {} output(s)", reasons.len())]
    Sink { reasons: Vec<Value> },

    /// The store returned a conflict (409) on a `put`. Input-log conflicts
    /// are swallowed before this ever escapes `reducer-core`; output-log
    /// conflicts propagate so the caller retries the whole batch.
    #[error("store conflict writing {id}")]
    StoreConflict { id: String },

    /// The user-supplied reducer panicked or returned an error value.
    #[error("reducer failed: {0}")]
    Reducer(String),

    /// The reducer's output carried a nested `{error}` of kind `expression`.
    #[error("expression error: {0}")]
    Expression(String),

    /// The reducer's output carried a nested `{error}` of kind `timeout`.
    #[error("timeout error: {0}")]
    Timeout(String),

    /// An error-list query spanned more than one month.
    #[error("error query window exceeds retention limit")]
    WindowLimit,

    /// No document exists at the requested id.
    #[error("no document at {id}")]
    NotFound { id: String },

    /// Required configuration was absent or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport failure talking to the backing store or the sink.
    #[error("transport error: {0}")]
    Transport(String),

    /// Wraps a [`reqwest::Error`] from the sink poster's HTTP client.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Result alias used throughout the reduce pipeline.
pub type ReduceResult<T> = Result<T, ReduceError>;

/// Machine-readable error body, mirroring the `{error, reason}` shape
/// documented in §7 of the pipeline's error handling design.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub reason: Value,
}

impl ReduceError {
    /// HTTP status this error maps to when surfaced through the router.
    ///
    /// Mirrors the `POST {input.post}` mapping: expression errors are 422,
    /// timeout errors are 500, a widened error-list window is 409, and
    /// everything else defaults to 500 unless the variant names its own
    /// status.
    pub fn status_code(&self) -> u16 {
        match self {
            ReduceError::Duplicate { .. } => 409,
            ReduceError::Sink { .. } => 502,
            ReduceError::StoreConflict { .. } => 409,
            ReduceError::Reducer(_) => 500,
            ReduceError::Expression(_) => 422,
            ReduceError::Timeout(_) => 500,
            ReduceError::WindowLimit => 409,
            ReduceError::NotFound { .. } => 404,
            ReduceError::Config(_) => 500,
            ReduceError::Transport(_) => 502,
            ReduceError::Http(_) => 502,
        }
    }

    /// The short machine code carried in the JSON error body (`error` field
    /// in §7, e.g. `conflict`, `esink`, `errlimit`).
    pub fn reason(&self) -> &'static str {
        match self {
            ReduceError::Duplicate { .. } => "conflict",
            ReduceError::Sink { .. } => "esink",
            ReduceError::StoreConflict { .. } => "econflict",
            ReduceError::Reducer(_) => "ereducer",
            ReduceError::Expression(_) => "eexpression",
            ReduceError::Timeout(_) => "etimeout",
            ReduceError::WindowLimit => "errlimit",
            ReduceError::NotFound { .. } => "enotfound",
            ReduceError::Config(_) => "econfig",
            ReduceError::Transport(_) => "etransport",
            ReduceError::Http(_) => "etransport",
        }
    }

    /// Whether this error should be written to the error store.
    ///
    /// Duplicates are not failures and must never produce an error doc;
    /// everything else does (subject to an error already existing at the
    /// same id, which `reducer-core`'s logger checks separately).
    pub fn should_log(&self) -> bool {
        !matches!(self, ReduceError::Duplicate { .. })
    }

    /// Whether a caller may usefully retry the operation that produced
    /// this error (used by the retry layer around the store and sink).
    pub fn noretry(&self) -> bool {
        matches!(
            self,
            ReduceError::Duplicate { .. } | ReduceError::WindowLimit | ReduceError::NotFound { .. }
        )
    }

    pub fn to_body(&self) -> ErrorBody {
        let reason = match self {
            ReduceError::Sink { reasons } => Value::Array(reasons.clone()),
            other => Value::String(other.to_string()),
        };
        ErrorBody {
            error: self.reason(),
            reason,
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{error: {}, reason: {}}}", self.error, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_is_not_logged() {
        let err = ReduceError::Duplicate { id: "t/x".into() };
        assert!(!err.should_log());
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn expression_maps_to_422() {
        let err = ReduceError::Expression("bad op".into());
        assert_eq!(err.status_code(), 422);
        assert_eq!(err.reason(), "eexpression");
    }

    #[test]
    fn window_limit_is_noretry() {
        assert!(ReduceError::WindowLimit.noretry());
    }
}
