//! In-memory `DocumentStore` used by every test and the dev server. No
//! network, no database, no Docker. Transactions are optimistic: version
//! counters detect interleaved writes and the update is retried once, the
//! same guarantee the production adapter is expected to give.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::docstore::{
    compare_values, field_value, DocQuery, DocWrite, DocumentStore, Filter, UpdateFn, WriteOp,
};

#[derive(Debug, Clone)]
struct VersionedDoc {
    version: u64,
    doc: Value,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, BTreeMap<String, VersionedDoc>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All documents of a collection, for test assertions.
    pub fn dump(&self, collection: &str) -> Vec<(String, Value)> {
        let inner = self.inner.lock().unwrap();
        inner
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, vd)| (id.clone(), vd.doc.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn apply(inner: &mut HashMap<String, BTreeMap<String, VersionedDoc>>, write: DocWrite) {
        let docs = inner.entry(write.collection).or_default();
        match write.op {
            WriteOp::Set(doc) => {
                let version = docs.get(&write.id).map(|d| d.version + 1).unwrap_or(1);
                docs.insert(write.id, VersionedDoc { version, doc });
            }
            WriteOp::Merge(patch) => {
                let (version, base) = docs
                    .get(&write.id)
                    .map(|d| (d.version + 1, d.doc.clone()))
                    .unwrap_or((1, Value::Object(Default::default())));
                let doc = merge_patch(base, patch);
                docs.insert(write.id, VersionedDoc { version, doc });
            }
            WriteOp::Delete => {
                docs.remove(&write.id);
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|vd| vd.doc.clone()))
    }

    async fn set(&self, collection: &str, id: &str, doc: Value) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::apply(&mut inner, DocWrite::set(collection, id, doc));
        Ok(())
    }

    async fn merge(&self, collection: &str, id: &str, patch: Value) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::apply(
            &mut inner,
            DocWrite {
                collection: collection.to_string(),
                id: id.to_string(),
                op: WriteOp::Merge(patch),
            },
        );
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::apply(&mut inner, DocWrite::delete(collection, id));
        Ok(())
    }

    async fn batch_set(&self, writes: Vec<DocWrite>) -> Result<()> {
        if writes.len() > 100 {
            return Err(anyhow!("batch too large: {} writes (max 100)", writes.len()));
        }
        let mut inner = self.inner.lock().unwrap();
        for write in writes {
            Self::apply(&mut inner, write);
        }
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        f: &mut UpdateFn<'_>,
    ) -> Result<Option<Value>> {
        // One retry on contention, then give up.
        for _ in 0..2 {
            let snapshot = {
                let inner = self.inner.lock().unwrap();
                inner
                    .get(collection)
                    .and_then(|docs| docs.get(id))
                    .cloned()
            };
            let base_version = snapshot.as_ref().map(|vd| vd.version);
            let current = snapshot.map(|vd| vd.doc);

            let Some(next) = f(current)? else {
                return Ok(None);
            };

            let mut inner = self.inner.lock().unwrap();
            let docs = inner.entry(collection.to_string()).or_default();
            let live_version = docs.get(id).map(|vd| vd.version);
            if live_version != base_version {
                continue; // someone wrote between read and write
            }
            let version = live_version.map(|v| v + 1).unwrap_or(1);
            docs.insert(
                id.to_string(),
                VersionedDoc {
                    version,
                    doc: next.clone(),
                },
            );
            return Ok(Some(next));
        }
        Err(anyhow!(
            "transaction contention on {collection}/{id} after retry"
        ))
    }

    async fn query(&self, collection: &str, query: DocQuery) -> Result<Vec<(String, Value)>> {
        let inner = self.inner.lock().unwrap();
        let Some(docs) = inner.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<(String, Value)> = docs
            .iter()
            .filter(|(_, vd)| query.filters.iter().all(|f| matches_filter(&vd.doc, f)))
            .map(|(id, vd)| (id.clone(), vd.doc.clone()))
            .collect();

        matched.sort_by(|(id_a, doc_a), (id_b, doc_b)| {
            for (field, direction) in &query.order_by {
                let ord = compare_values(field_value(doc_a, field), field_value(doc_b, field));
                let ord = match direction {
                    crate::docstore::Direction::Asc => ord,
                    crate::docstore::Direction::Desc => ord.reverse(),
                };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            id_a.cmp(id_b)
        });

        let iter = matched.into_iter().skip(query.offset);
        Ok(match query.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        })
    }
}

fn matches_filter(doc: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Eq(field, expected) => field_value(doc, field) == Some(expected),
        Filter::Gte(field, bound) => {
            field_value(doc, field).is_some()
                && compare_values(field_value(doc, field), Some(bound))
                    != std::cmp::Ordering::Less
        }
        Filter::Lt(field, bound) => {
            field_value(doc, field).is_some()
                && compare_values(field_value(doc, field), Some(bound))
                    == std::cmp::Ordering::Less
        }
        Filter::ArrayContainsAny(field, values) => field_value(doc, field)
            .and_then(|v| v.as_array())
            .map(|items| items.iter().any(|item| values.contains(item)))
            .unwrap_or(false),
    }
}

/// RFC 7386 merge patch: objects merge recursively, null removes, everything
/// else replaces.
fn merge_patch(base: Value, patch: Value) -> Value {
    match (base, patch) {
        (Value::Object(mut base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                if patch_value.is_null() {
                    base_map.remove(&key);
                } else {
                    let merged = match base_map.remove(&key) {
                        Some(existing) => merge_patch(existing, patch_value),
                        None => merge_patch(Value::Null, patch_value),
                    };
                    base_map.insert(key, merged);
                }
            }
            Value::Object(base_map)
        }
        (_, Value::Object(patch_map)) => {
            merge_patch(Value::Object(Default::default()), Value::Object(patch_map))
        }
        (_, patch) => patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docstore::Direction;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_round_trip() {
        let store = MemoryStore::new();
        store.set("events", "s1:e1", json!({"title": "Yoga"})).await.unwrap();
        let doc = store.get("events", "s1:e1").await.unwrap();
        assert_eq!(doc, Some(json!({"title": "Yoga"})));
        assert_eq!(store.get("events", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn merge_is_deep_and_null_removes() {
        let store = MemoryStore::new();
        store
            .set("events", "e", json!({"a": {"x": 1, "y": 2}, "b": 3}))
            .await
            .unwrap();
        store
            .merge("events", "e", json!({"a": {"y": null, "z": 9}}))
            .await
            .unwrap();
        let doc = store.get("events", "e").await.unwrap().unwrap();
        assert_eq!(doc, json!({"a": {"x": 1, "z": 9}, "b": 3}));
    }

    #[tokio::test]
    async fn merge_creates_when_absent() {
        let store = MemoryStore::new();
        store.merge("events", "new", json!({"a": 1})).await.unwrap();
        assert_eq!(store.get("events", "new").await.unwrap(), Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn update_creates_and_mutates() {
        let store = MemoryStore::new();
        let result = store
            .update("counters", "c", &mut |current| {
                let n = current
                    .and_then(|d| d.get("n").and_then(|v| v.as_i64()))
                    .unwrap_or(0);
                Ok(Some(json!({"n": n + 1})))
            })
            .await
            .unwrap();
        assert_eq!(result, Some(json!({"n": 1})));

        store
            .update("counters", "c", &mut |current| {
                let n = current
                    .and_then(|d| d.get("n").and_then(|v| v.as_i64()))
                    .unwrap_or(0);
                Ok(Some(json!({"n": n + 1})))
            })
            .await
            .unwrap();
        assert_eq!(
            store.get("counters", "c").await.unwrap(),
            Some(json!({"n": 2}))
        );
    }

    #[tokio::test]
    async fn batch_rejects_over_100() {
        let store = MemoryStore::new();
        let writes: Vec<DocWrite> = (0..101)
            .map(|i| DocWrite::set("interactions", format!("i{i}"), json!({})))
            .collect();
        assert!(store.batch_set(writes).await.is_err());
    }

    #[tokio::test]
    async fn query_filters_orders_and_paginates() {
        let store = MemoryStore::new();
        for (id, start, tags) in [
            ("e1", "2026-07-02T10:00:00Z", vec!["yoga"]),
            ("e2", "2026-07-01T10:00:00Z", vec!["music"]),
            ("e3", "2026-07-03T10:00:00Z", vec!["yoga", "outdoors"]),
            ("e4", "2026-08-01T10:00:00Z", vec!["yoga"]),
        ] {
            store
                .set("events", id, json!({"startTime": start, "tags": tags}))
                .await
                .unwrap();
        }

        let q = DocQuery::new()
            .filter(Filter::Gte("startTime".into(), json!("2026-07-01T00:00:00Z")))
            .filter(Filter::Lt("startTime".into(), json!("2026-08-01T00:00:00Z")))
            .filter(Filter::ArrayContainsAny("tags".into(), vec![json!("yoga")]))
            .order("startTime", Direction::Asc);
        let rows = store.query("events", q).await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e3"]);

        let q = DocQuery::new().order("startTime", Direction::Asc).offset(1).limit(2);
        let rows = store.query("events", q).await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e3"]);
    }

    #[tokio::test]
    async fn query_id_tie_break() {
        let store = MemoryStore::new();
        store.set("pins", "b", json!({"t": "2026-07-01T10:00:00Z"})).await.unwrap();
        store.set("pins", "a", json!({"t": "2026-07-01T10:00:00Z"})).await.unwrap();
        let rows = store
            .query("pins", DocQuery::new().order("t", Direction::Asc))
            .await
            .unwrap();
        let ids: Vec<&str> = rows.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
