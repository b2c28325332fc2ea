//! The document-store contract. The production database sits behind this
//! trait; everything the core needs is single-document reads/writes, one
//! single-document transaction primitive, atomic batches, and a small query
//! language (four filters, ordering, offset/limit).

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Collection names as they appear in the persisted layout.
pub mod collections {
    pub const EVENTS: &str = "events";
    pub const EVENT_SERIES: &str = "eventSeries";
    pub const EVENT_CATEGORIES: &str = "eventCategories";
    pub const TAG_PROPOSALS: &str = "tagProposals";
    pub const INTERACTIONS: &str = "interactions";

    pub fn pinned_entries(user_id: &str) -> String {
        format!("userPinnedEvents/{user_id}/entries")
    }

    pub fn pinned_series(user_id: &str) -> String {
        format!("userPinnedEvents/{user_id}/series")
    }

    pub fn category_bundles(user_id: &str) -> String {
        format!("users/{user_id}/categoryBundles")
    }
}

#[derive(Debug, Clone)]
pub enum Filter {
    Eq(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    /// Array field shares at least one element with the given values.
    ArrayContainsAny(String, Vec<Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Declarative query. Documents are always tie-broken by id ascending after
/// the explicit order keys.
#[derive(Debug, Clone, Default)]
pub struct DocQuery {
    pub filters: Vec<Filter>,
    pub order_by: Vec<(String, Direction)>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl DocQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push((field.into(), direction));
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone)]
pub enum WriteOp {
    Set(Value),
    Merge(Value),
    Delete,
}

#[derive(Debug, Clone)]
pub struct DocWrite {
    pub collection: String,
    pub id: String,
    pub op: WriteOp,
}

impl DocWrite {
    pub fn set(collection: impl Into<String>, id: impl Into<String>, doc: Value) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            op: WriteOp::Set(doc),
        }
    }

    pub fn delete(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            op: WriteOp::Delete,
        }
    }
}

/// Single-document transaction body: receives the current document (if any)
/// and returns the replacement (None leaves the document untouched).
pub type UpdateFn<'a> = dyn FnMut(Option<Value>) -> Result<Option<Value>> + Send + 'a;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// Full-document write (create or replace).
    async fn set(&self, collection: &str, id: &str, doc: Value) -> Result<()>;

    /// RFC 7386-style merge patch; creates the document when absent.
    /// `null` members remove keys.
    async fn merge(&self, collection: &str, id: &str, patch: Value) -> Result<()>;

    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// Atomic batch, at most 100 writes.
    async fn batch_set(&self, writes: Vec<DocWrite>) -> Result<()>;

    /// Single-document transaction. The closure may run more than once: the
    /// store retries exactly once on contention before surfacing a
    /// transaction error. Returns the document as written.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        f: &mut UpdateFn<'_>,
    ) -> Result<Option<Value>>;

    async fn query(&self, collection: &str, query: DocQuery) -> Result<Vec<(String, Value)>>;
}

/// Read a possibly-dotted field path out of a document.
pub fn field_value<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Total order over the JSON values this layout stores: numbers numerically,
/// timestamps chronologically, everything else by string form. Missing
/// values sort first.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => match (x, y) {
            (Value::Number(nx), Value::Number(ny)) => nx
                .as_f64()
                .unwrap_or(0.0)
                .partial_cmp(&ny.as_f64().unwrap_or(0.0))
                .unwrap_or(Ordering::Equal),
            (Value::String(sx), Value::String(sy)) => {
                let tx = chrono::DateTime::parse_from_rfc3339(sx);
                let ty = chrono::DateTime::parse_from_rfc3339(sy);
                match (tx, ty) {
                    (Ok(tx), Ok(ty)) => tx.cmp(&ty),
                    _ => sx.cmp(sy),
                }
            }
            (Value::Bool(bx), Value::Bool(by)) => bx.cmp(by),
            _ => x.to_string().cmp(&y.to_string()),
        },
    }
}
