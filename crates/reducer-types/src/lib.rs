//! Shared document model, composite id coding, and configuration for the
//! reduce pipeline. Kept dependency-light (no async runtime, no HTTP
//! client) so it can be used from both `reducer-core` and any future
//! tooling that just needs to decode/encode ids.

pub mod config;
pub mod doc;
pub mod id;

pub use config::Config;
pub use doc::{ErrorDoc, InputDoc, OutputDoc, Revision};
pub use id::{decode_kturi, decode_tkuri, k, kturi, pad16, t, tkuri, DocId};
