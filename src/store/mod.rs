//! Document-store seam.
//!
//! The engine never owns persistence; it talks to a JSON document store
//! through [`DocumentStore`]. Two adapters ship with the crate: an in-memory
//! store for tests and single-process deployments, and a SQLite adapter.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::errors::AppResult;

/// Well-known collection names
pub mod collections {
    pub const APPROVAL_REQUESTS: &str = "approvalRequests";
    pub const AUDIT_TRAIL: &str = "auditTrail";
    pub const USER_NOTIFICATIONS: &str = "userNotifications";
    /// One slot per business document, naming the request that holds it.
    pub const PENDING_APPROVALS: &str = "pendingApprovals";
}

/// A committed write as seen by change-feed subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChange {
    pub collection: String,
    pub id: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldCondition {
    Equals(String, Value),
    Missing(String),
}

/// Conditions the stored document must satisfy for a write to apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Precondition {
    conditions: Vec<FieldCondition>,
}

impl Precondition {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn field_equals(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(FieldCondition::Equals(field.into(), value.into()));
        self
    }

    /// The field is absent or null.
    pub fn field_missing(mut self, field: impl Into<String>) -> Self {
        self.conditions.push(FieldCondition::Missing(field.into()));
        self
    }

    pub fn holds(&self, doc: &Value) -> bool {
        self.conditions.iter().all(|condition| match condition {
            FieldCondition::Equals(field, expected) => doc.get(field) == Some(expected),
            FieldCondition::Missing(field) => doc.get(field).map_or(true, Value::is_null),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    pub collection: String,
    pub id: String,
    pub body: Value,
}

impl NewDocument {
    pub fn new(collection: impl Into<String>, id: impl Into<String>, body: Value) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            body,
        }
    }
}

/// Read-modify-write of one document, plus documents created in the same
/// atomic commit (e.g. audit entries).
#[derive(Debug, Clone)]
pub struct ConditionalWrite {
    pub collection: String,
    pub id: String,
    pub precondition: Precondition,
    pub patch: Map<String, Value>,
    pub appends: Vec<NewDocument>,
}

impl ConditionalWrite {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            precondition: Precondition::none(),
            patch: Map::new(),
            appends: Vec::new(),
        }
    }

    pub fn precondition(mut self, precondition: Precondition) -> Self {
        self.precondition = precondition;
        self
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.patch.insert(field.into(), value.into());
        self
    }

    pub fn append(mut self, document: NewDocument) -> Self {
        self.appends.push(document);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Committed(Value),
    PreconditionFailed,
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Eq(Value),
    In(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
}

impl Filter {
    fn matches(&self, doc: &Value) -> bool {
        let value = doc.get(&self.field);
        match &self.op {
            FilterOp::Eq(expected) => value == Some(expected),
            FilterOp::In(options) => value.map_or(false, |v| options.contains(v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op: FilterOp::Eq(value.into()),
        });
        self
    }

    pub fn where_in(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op: FilterOp::In(values),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.filters.iter().all(|filter| filter.matches(doc))
    }

    /// Filter, sort and truncate an unordered set of documents.
    pub fn apply(&self, docs: impl IntoIterator<Item = Value>) -> Vec<Value> {
        let mut matched: Vec<Value> = docs.into_iter().filter(|doc| self.matches(doc)).collect();

        matched.sort_by(|a, b| {
            for order in &self.order_by {
                let ordering = compare_values(a.get(&order.field), b.get(&order.field));
                let ordering = match order.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            // Stable tiebreak so listings don't shuffle between calls.
            compare_values(a.get("id"), b.get("id"))
        });

        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

/// Ordering used by queries: missing < null < bool < number < string,
/// RFC 3339 strings compared as instants.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(_) => 5,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => x.with_timezone(&Utc).cmp(&y.with_timezone(&Utc)),
                _ => x.cmp(y),
            }
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Apply a top-level field patch to a document body.
pub fn apply_patch(doc: &mut Value, patch: &Map<String, Value>) {
    if let Value::Object(map) = doc {
        for (field, value) in patch {
            map.insert(field.clone(), value.clone());
        }
    }
}

/// Make sure the stored body carries its own id.
pub(crate) fn with_id(mut body: Value, id: &str) -> Value {
    if let Value::Object(map) = &mut body {
        map.entry("id").or_insert_with(|| Value::String(id.to_string()));
    }
    body
}

/// Broadcast channel behind [`DocumentStore::subscribe`].
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<DocumentChange>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, change: DocumentChange) {
        // No subscribers is fine.
        let _ = self.tx.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.tx.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// External document-store client consumed by the engine.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<Value>>;

    /// Create a document; fails with `Conflict` if the id is taken.
    async fn insert(&self, collection: &str, id: &str, body: Value) -> AppResult<()>;

    /// Create or replace a document.
    async fn set(&self, collection: &str, id: &str, body: Value) -> AppResult<()>;

    async fn query(&self, query: &Query) -> AppResult<Vec<Value>>;

    /// Atomically check the precondition, patch the document and create the
    /// appended documents. Nothing is written unless everything is.
    async fn transactional_update(&self, write: ConditionalWrite) -> AppResult<WriteOutcome>;

    /// Stream of committed changes, published after commit.
    fn subscribe(&self) -> broadcast::Receiver<DocumentChange>;
}
