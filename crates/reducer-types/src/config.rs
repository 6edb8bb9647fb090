//! Environment-driven configuration (§6, §9 "Global `uris`/env lookups").
//!
//! `Config` is loaded once at startup and threaded through the pipeline as
//! an immutable value (wrapped in `Arc` by the caller where sharing is
//! needed). There is no process-wide mutable configuration state.

use std::env;

use reducer_errors::{ReduceError, ReduceResult};

const DEFAULT_DB_PARTITIONS: u32 = 1;
const DEFAULT_SINK_APPS: u32 = 1;
const DEFAULT_SINK_RETRIES: u32 = 5;
const DEFAULT_PAGE_SIZE: usize = 200;

/// Configuration recognized from the environment, per §6.
#[derive(Debug, Clone)]
pub struct Config {
    /// `DB_URI` — required; store connection.
    pub db_uri: String,
    /// `DB_PARTITIONS` — output partition count (default 1).
    pub db_partitions: u32,
    /// `SINK_APPS` — sink partition count (default 1).
    pub sink_apps: u32,
    /// `SINK_RETRIES` — sink POST retry count (default 5).
    pub sink_retries: u32,
    /// `INPUT_DB` — `None` when unset, `false`, or `""` (store disabled).
    pub input_db: Option<String>,
    /// `OUTPUT_DB` — `None` when unset, `false`, or `""` (store disabled).
    pub output_db: Option<String>,
    /// `ERROR_DB` — `None` when unset, `false`, or `""` (store disabled).
    pub error_db: Option<String>,
    /// `REPLAY` — replay window in ms; `None` disables replay.
    pub replay_window_ms: Option<u64>,
    /// `PAGE_SIZE` — replay page size (default 200).
    pub page_size: usize,
    /// `SINK_HOST` — base sink URL the sink router rewrites per partition.
    pub sink_host: String,
    /// `DEDUPE` — enables/disables the in-memory duplicate filter.
    pub dedupe: bool,
}

/// Parse a store-name variable: absent, `"false"`, or `""` all disable the
/// store; anything else is the store name.
fn db_name_var(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if value.is_empty() || value.eq_ignore_ascii_case("false") => None,
        Ok(value) => Some(value),
        Err(_) => None,
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Returns [`ReduceError::Config`] when `DB_URI` is missing, matching
    /// the source's "Missing DB configuration" construction failure.
    pub fn from_env() -> ReduceResult<Self> {
        let db_uri = env::var("DB_URI")
            .map_err(|_| ReduceError::Config("Missing DB configuration".to_string()))?;

        let replay_window_ms = match parse_var::<u64>("REPLAY", 0) {
            0 => None,
            ms => Some(ms),
        };

        Ok(Config {
            db_uri,
            db_partitions: parse_var("DB_PARTITIONS", DEFAULT_DB_PARTITIONS),
            sink_apps: parse_var("SINK_APPS", DEFAULT_SINK_APPS),
            sink_retries: parse_var("SINK_RETRIES", DEFAULT_SINK_RETRIES),
            input_db: db_name_var("INPUT_DB"),
            output_db: db_name_var("OUTPUT_DB"),
            error_db: db_name_var("ERROR_DB"),
            replay_window_ms,
            page_size: parse_var("PAGE_SIZE", DEFAULT_PAGE_SIZE),
            sink_host: env::var("SINK_HOST").unwrap_or_else(|_| "http://localhost:9080".to_string()),
            dedupe: parse_var("DEDUPE", true),
        })
    }

    /// A `Config` suitable for tests: an in-memory store, replay and dedupe
    /// enabled, no real sink host.
    #[cfg(any(test, feature = "test-support"))]
    pub fn for_tests() -> Self {
        Config {
            db_uri: "memory://test".to_string(),
            db_partitions: 1,
            sink_apps: 1,
            sink_retries: 5,
            input_db: Some("input".to_string()),
            output_db: Some("output".to_string()),
            error_db: Some("error".to_string()),
            replay_window_ms: Some(3_600_000),
            page_size: DEFAULT_PAGE_SIZE,
            sink_host: "http://sink.test".to_string(),
            dedupe: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch
    // them so they don't race each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn missing_db_uri_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("DB_URI");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ReduceError::Config(_)));
    }

    #[test]
    fn disabled_store_names_parse_to_none() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("DB_URI", "http://store.test");
        env::set_var("ERROR_DB", "false");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.error_db, None);
        env::remove_var("DB_URI");
        env::remove_var("ERROR_DB");
    }

    #[test]
    fn zero_replay_disables_replay() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("DB_URI", "http://store.test");
        env::remove_var("REPLAY");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.replay_window_ms, None);
        env::remove_var("DB_URI");
    }
}
