use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::StoreError;

/// Hard ceiling on ops per atomic batch, matching the document stores this
/// contract is modeled on.
pub const MAX_BATCH_OPS: usize = 500;

/// An equality filter on one document field.
#[derive(Debug, Clone)]
pub struct Condition {
    pub field: String,
    pub value: Value,
}

impl Condition {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Record {
    pub id: String,
    pub fields: Value,
}

impl Record {
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.fields.clone())?)
    }
}

#[derive(Debug, Clone)]
pub enum WriteOp {
    Create {
        collection: String,
        id: String,
        fields: Value,
    },
    Update {
        collection: String,
        id: String,
        fields: Value,
    },
    Delete {
        collection: String,
        id: String,
    },
}

/// Generic document-store contract: collections of id-keyed JSON documents,
/// equality queries, and an atomic batched write primitive. The engine only
/// ever talks to this trait so the concrete backend stays swappable.
#[async_trait]
pub trait RecordStore: Send + Sync + std::fmt::Debug {
    async fn create(&self, collection: &str, id: &str, fields: Value) -> Result<(), StoreError>;

    async fn read(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// Merge `fields` into an existing document. A `null` value deletes that
    /// field. Fails with `NotFound` when the document does not exist.
    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<(), StoreError>;

    /// Deleting a missing document is a no-op, not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    async fn query(
        &self,
        collection: &str,
        conditions: &[Condition],
    ) -> Result<Vec<Record>, StoreError>;

    /// Apply up to [`MAX_BATCH_OPS`] writes atomically: either the whole
    /// batch commits or none of it does.
    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;
}

fn merge_fields(doc: &mut Map<String, Value>, patch: &Value) {
    if let Value::Object(patch) = patch {
        for (key, value) in patch {
            if value.is_null() {
                doc.remove(key);
            } else {
                doc.insert(key.clone(), value.clone());
            }
        }
    }
}

fn matches(doc: &Value, conditions: &[Condition]) -> bool {
    conditions
        .iter()
        .all(|c| doc.get(&c.field) == Some(&c.value))
}

/// In-memory document store. Backs the local/demo deployment and the test
/// suite; behavior mirrors the contract above exactly.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, collection: &str, id: &str, fields: Value) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().await;
        let coll = collections.entry(collection.to_string()).or_default();
        if coll.contains_key(id) {
            return Err(StoreError::AlreadyExists(format!("{collection}/{id}")));
        }
        coll.insert(id.to_string(), fields);
        Ok(())
    }

    async fn read(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let collections = self.collections.lock().await;
        Ok(collections
            .get(collection)
            .and_then(|coll| coll.get(id))
            .cloned())
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().await;
        let doc = collections
            .get_mut(collection)
            .and_then(|coll| coll.get_mut(id))
            .ok_or_else(|| StoreError::NotFound(format!("{collection}/{id}")))?;
        if let Value::Object(map) = doc {
            merge_fields(map, &fields);
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().await;
        if let Some(coll) = collections.get_mut(collection) {
            coll.remove(id);
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        conditions: &[Condition],
    ) -> Result<Vec<Record>, StoreError> {
        let collections = self.collections.lock().await;
        let Some(coll) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(coll
            .iter()
            .filter(|(_, doc)| matches(doc, conditions))
            .map(|(id, doc)| Record {
                id: id.clone(),
                fields: doc.clone(),
            })
            .collect())
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        if ops.len() > MAX_BATCH_OPS {
            return Err(StoreError::BatchTooLarge(ops.len(), MAX_BATCH_OPS));
        }

        let mut collections = self.collections.lock().await;

        // Validate the whole batch before touching anything so a failure
        // leaves the store unchanged.
        for op in &ops {
            match op {
                WriteOp::Create { collection, id, .. } => {
                    if collections
                        .get(collection)
                        .is_some_and(|coll| coll.contains_key(id))
                    {
                        return Err(StoreError::AlreadyExists(format!("{collection}/{id}")));
                    }
                }
                WriteOp::Update { collection, id, .. } => {
                    if !collections
                        .get(collection)
                        .is_some_and(|coll| coll.contains_key(id))
                    {
                        return Err(StoreError::NotFound(format!("{collection}/{id}")));
                    }
                }
                WriteOp::Delete { .. } => {}
            }
        }

        for op in ops {
            match op {
                WriteOp::Create {
                    collection,
                    id,
                    fields,
                } => {
                    collections.entry(collection).or_default().insert(id, fields);
                }
                WriteOp::Update {
                    collection,
                    id,
                    fields,
                } => {
                    if let Some(Value::Object(map)) = collections
                        .get_mut(&collection)
                        .and_then(|coll| coll.get_mut(&id))
                    {
                        merge_fields(map, &fields);
                    }
                }
                WriteOp::Delete { collection, id } => {
                    if let Some(coll) = collections.get_mut(&collection) {
                        coll.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }
}
