//! The reduce pipeline: duplicate detection, per-group serialization,
//! accumulator read-modify-write, sink fan-out, durable logging, and
//! replay, wired together in [`pipeline::Pipeline`].

pub mod clock;
pub mod dup_filter;
pub mod lock;
pub mod logger;
pub mod metrics;
pub mod middleware;
pub mod options;
pub mod partition;
pub mod pipeline;
pub mod reduce;
pub mod replay;
pub mod sink;
pub mod store;

pub use pipeline::Pipeline;
pub use reduce::{ReduceCall, ReduceEngine};
pub use replay::{ReplayDriver, ReplayStats, Submitter};
pub use store::{InMemoryStore, RangeQuery, Store, StoredDoc};
