use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::StoreError;

/// Address of a single document: collection name plus document id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DocPath {
    pub collection: String,
    pub id: String,
}

impl DocPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for DocPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A stored document as read back from the store.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: DocPath,
    pub data: Value,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Deserialize the document payload into a typed model.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Field-level write instruction. The store resolves `ServerTimestamp` to
/// its own clock at apply time and applies `Increment` atomically to the
/// stored numeric value (a missing field counts as zero). Dotted field
/// names address nested objects, e.g. `bookings_by_type.tour`.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Json(Value),
    ServerTimestamp,
    Increment(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fails with `AlreadyExists` if the document exists.
    Create,
    /// Create or merge the given fields.
    Merge,
    /// Merge the given fields, fails with `NotFound` if the document is missing.
    Update,
}

/// One write belonging to an atomic commit.
#[derive(Debug, Clone)]
pub struct WriteOp {
    pub path: DocPath,
    pub mode: WriteMode,
    pub fields: BTreeMap<String, FieldValue>,
}

impl WriteOp {
    pub fn create<T: Serialize>(path: DocPath, value: &T) -> Result<Self, StoreError> {
        Ok(Self {
            path,
            mode: WriteMode::Create,
            fields: to_fields(value)?,
        })
    }

    pub fn merge(path: DocPath) -> Self {
        Self {
            path,
            mode: WriteMode::Merge,
            fields: BTreeMap::new(),
        }
    }

    pub fn update(path: DocPath) -> Self {
        Self {
            path,
            mode: WriteMode::Update,
            fields: BTreeMap::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Serialize) -> Result<Self, StoreError> {
        self.fields
            .insert(name.into(), FieldValue::Json(serde_json::to_value(value)?));
        Ok(self)
    }

    pub fn increment(mut self, name: impl Into<String>, by: i64) -> Self {
        self.fields.insert(name.into(), FieldValue::Increment(by));
        self
    }

    pub fn server_timestamp(mut self, name: impl Into<String>) -> Self {
        self.fields.insert(name.into(), FieldValue::ServerTimestamp);
        self
    }
}

fn to_fields<T: Serialize>(value: &T) -> Result<BTreeMap<String, FieldValue>, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, FieldValue::Json(v)))
            .collect()),
        other => Err(StoreError::Backend(format!(
            "document payload must be a JSON object, got {}",
            other
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Filtered, ordered, bounded collection read.
#[derive(Debug, Clone)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<(String, SortDirection)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Broadcast to live-query subscribers after every committed write.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub collection: String,
    pub doc_id: String,
}
