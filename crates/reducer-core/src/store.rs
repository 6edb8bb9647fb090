//! Store facade (§4.B): a typed async handle over the partitioned
//! document store, with `get`/`put`/`remove`/`all_docs`.
//!
//! Wrapping (batching, retry, circuit breaking) is layered on top via
//! [`crate::middleware`] so it stays transparent to callers — every caller
//! in this crate talks to a `dyn Store`, never to a concrete backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use reducer_errors::{ReduceError, ReduceResult};
use reducer_types::Revision;
use serde_json::{Map, Value};

/// Parameters for a range scan over a store's keyspace, mirroring
/// `allDocs({startkey, endkey, descending, limit, include_docs})`.
#[derive(Debug, Clone)]
pub struct RangeQuery {
    pub startkey: String,
    pub endkey: String,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl RangeQuery {
    pub fn new(startkey: impl Into<String>, endkey: impl Into<String>) -> Self {
        RangeQuery {
            startkey: startkey.into(),
            endkey: endkey.into(),
            descending: false,
            limit: None,
        }
    }

    pub fn descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A document with its envelope id and revision, as returned by the store.
#[derive(Debug, Clone)]
pub struct StoredDoc {
    pub id: String,
    pub rev: Revision,
    pub body: Map<String, Value>,
}

/// Async facade over a partitioned key/value document store.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, id: &str) -> ReduceResult<Option<StoredDoc>>;

    /// Writes `doc` (which must carry an `"id"` field). `prior_rev` is the
    /// revision read earlier in this transaction, if any; a mismatch
    /// between it and the store's current revision for `id` surfaces as
    /// [`ReduceError::StoreConflict`].
    async fn put(&self, doc: Map<String, Value>, prior_rev: Option<&Revision>) -> ReduceResult<Revision>;

    async fn remove(&self, id: &str, rev: &Revision) -> ReduceResult<()>;

    async fn all_docs(&self, query: RangeQuery) -> ReduceResult<Vec<StoredDoc>>;
}

/// In-memory `Store` double used by tests and by the single-process dev
/// binary. Backed by a `BTreeMap` so lexicographic range scans (which
/// every `pad16`-keyed query in this pipeline relies on) behave exactly
/// like a real partitioned store's key range.
#[derive(Default)]
pub struct InMemoryStore {
    docs: RwLock<BTreeMap<String, (u64, Map<String, Value>)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn doc_id(doc: &Map<String, Value>) -> ReduceResult<String> {
        doc.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ReduceError::Config("document missing \"id\" field".to_string()))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, id: &str) -> ReduceResult<Option<StoredDoc>> {
        let docs = self.docs.read();
        Ok(docs.get(id).map(|(rev, body)| StoredDoc {
            id: id.to_string(),
            rev: Revision(rev.to_string()),
            body: body.clone(),
        }))
    }

    async fn put(&self, doc: Map<String, Value>, prior_rev: Option<&Revision>) -> ReduceResult<Revision> {
        let id = Self::doc_id(&doc)?;
        let mut docs = self.docs.write();
        let next_rev = match docs.get(&id) {
            Some((current_rev, _)) => {
                let matches = prior_rev
                    .map(|r| r.0.parse::<u64>().ok() == Some(*current_rev))
                    .unwrap_or(false);
                if !matches {
                    return Err(ReduceError::StoreConflict { id });
                }
                current_rev + 1
            }
            None => {
                if prior_rev.is_some() {
                    return Err(ReduceError::StoreConflict { id });
                }
                1
            }
        };
        docs.insert(id, (next_rev, doc));
        Ok(Revision(next_rev.to_string()))
    }

    async fn remove(&self, id: &str, rev: &Revision) -> ReduceResult<()> {
        let mut docs = self.docs.write();
        match docs.get(id) {
            Some((current_rev, _)) if current_rev.to_string() == rev.0 => {
                docs.remove(id);
                Ok(())
            }
            Some(_) => Err(ReduceError::StoreConflict { id: id.to_string() }),
            None => Err(ReduceError::NotFound { id: id.to_string() }),
        }
    }

    async fn all_docs(&self, query: RangeQuery) -> ReduceResult<Vec<StoredDoc>> {
        let docs = self.docs.read();
        // Descending scans (per the `allDocs` contract in §4.B) pass
        // `startkey` >= `endkey`; `BTreeMap::range` requires the opposite
        // order, so the bounds are swapped before scanning and the result
        // reversed back into descending order afterwards.
        let (lo, hi) = if query.descending {
            (query.endkey.clone(), query.startkey.clone())
        } else {
            (query.startkey.clone(), query.endkey.clone())
        };
        let mut rows: Vec<StoredDoc> = docs
            .range(lo..=hi)
            .map(|(id, (rev, body))| StoredDoc {
                id: id.clone(),
                rev: Revision(rev.to_string()),
                body: body.clone(),
            })
            .collect();
        if query.descending {
            rows.reverse();
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryStore::new();
        let mut doc = Map::new();
        doc.insert("id".into(), Value::from("k/o1/t/1"));
        doc.insert("total".into(), Value::from(1));
        let rev = store.put(doc, None).await.unwrap();
        assert_eq!(rev.0, "1");
        let got = store.get("k/o1/t/1").await.unwrap().unwrap();
        assert_eq!(got.body.get("total").unwrap(), 1);
    }

    #[tokio::test]
    async fn put_with_stale_revision_conflicts() {
        let store = InMemoryStore::new();
        let mut doc = Map::new();
        doc.insert("id".into(), Value::from("k/o1/t/1"));
        let rev = store.put(doc.clone(), None).await.unwrap();
        // a second writer using the same stale rev should succeed...
        let rev2 = store.put(doc.clone(), Some(&rev)).await.unwrap();
        assert_eq!(rev2.0, "2");
        // ...but reusing the now-stale first rev must conflict.
        let err = store.put(doc, Some(&rev)).await.unwrap_err();
        assert!(matches!(err, ReduceError::StoreConflict { .. }));
    }

    #[tokio::test]
    async fn range_scan_is_lexicographic_and_descending() {
        let store = InMemoryStore::new();
        for (id, total) in [("k/o1/t/0000000000000001", 1), ("k/o1/t/0000000000000002", 2)] {
            let mut doc = Map::new();
            doc.insert("id".into(), Value::from(id));
            doc.insert("total".into(), Value::from(total));
            store.put(doc, None).await.unwrap();
        }
        let rows = store
            .all_docs(
                RangeQuery::new("k/o1/t/0000000000000002zzz", "k/o1/t/0000000000000000")
                    .descending(true)
                    .limit(1),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].body.get("total").unwrap(), 2);
    }
}
