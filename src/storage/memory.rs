//! In-memory storage backend.
//!
//! Thread-safe implementation of [`DocumentStore`] that evaluates compiled
//! filters directly. Intended for embedded usage, tests, and as a reference
//! implementation of the storage contract.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use serde_json::Value;
use uuid::Uuid;

use crate::document::DeviceDescription;
use crate::query::Filter;
use crate::storage::traits::{DocumentStore, StorageError};

/// Default maximum number of documents returned by a search.
pub const DEFAULT_RESULT_LIMIT: usize = 20;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

fn require_id(id: &str) -> Result<(), StorageError> {
    if id.is_empty() {
        return Err(StorageError::EmptyId);
    }
    Ok(())
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "double",
        Value::Number(_) => "long",
        Value::String(_) => "keyword",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Default)]
struct DocumentState {
    by_id: HashMap<String, DeviceDescription>,
    order: Vec<String>,
}

impl DocumentState {
    fn ordered(&self) -> impl Iterator<Item = (&String, &DeviceDescription)> + '_ {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id).map(|doc| (id, doc)))
    }
}

/// In-memory device description store.
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    state: RwLock<DocumentState>,
    result_limit: usize,
    available: AtomicBool,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    /// Create an empty store with the default result limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_result_limit(DEFAULT_RESULT_LIMIT)
    }

    /// Create an empty store returning at most `result_limit` search hits.
    #[must_use]
    pub fn with_result_limit(result_limit: usize) -> Self {
        Self {
            state: RwLock::new(DocumentState::default()),
            result_limit,
            available: AtomicBool::new(true),
        }
    }

    /// Marks the backend as reachable or not. While unavailable every
    /// operation fails with [`StorageError::ConnectionError`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::ConnectionError(
                "document store unavailable".to_string(),
            ))
        }
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn insert(&self, doc: DeviceDescription) -> Result<String, StorageError> {
        self.ensure_available()?;
        let mut state = self.state.write().map_err(|_| lock_err("document.insert"))?;

        let id = Uuid::new_v4().to_string();
        state.order.push(id.clone());
        state.by_id.insert(id.clone(), doc);
        Ok(id)
    }

    fn get(&self, id: &str) -> Result<Option<DeviceDescription>, StorageError> {
        self.ensure_available()?;
        require_id(id)?;
        let state = self.state.read().map_err(|_| lock_err("document.get"))?;
        Ok(state.by_id.get(id).cloned())
    }

    fn update(&self, id: &str, doc: DeviceDescription) -> Result<(), StorageError> {
        self.ensure_available()?;
        require_id(id)?;
        let mut state = self.state.write().map_err(|_| lock_err("document.update"))?;

        let slot = state
            .by_id
            .get_mut(id)
            .ok_or_else(|| StorageError::DocumentNotFound(id.to_string()))?;
        *slot = doc;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.ensure_available()?;
        require_id(id)?;
        let mut state = self.state.write().map_err(|_| lock_err("document.delete"))?;

        if state.by_id.remove(id).is_none() {
            return Err(StorageError::DocumentNotFound(id.to_string()));
        }
        state.order.retain(|existing| existing != id);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.ensure_available()?;
        let mut state = self.state.write().map_err(|_| lock_err("document.clear"))?;
        state.by_id.clear();
        state.order.clear();
        Ok(())
    }

    fn count(&self) -> Result<usize, StorageError> {
        self.ensure_available()?;
        let state = self.state.read().map_err(|_| lock_err("document.count"))?;
        Ok(state.by_id.len())
    }

    fn search(&self, filter: &Filter) -> Result<Vec<DeviceDescription>, StorageError> {
        self.ensure_available()?;
        let state = self.state.read().map_err(|_| lock_err("document.search"))?;

        Ok(state
            .ordered()
            .map(|(_, doc)| doc)
            .filter(|doc| filter.matches(doc))
            .take(self.result_limit)
            .cloned()
            .collect())
    }

    fn key_summary(&self) -> Result<BTreeMap<String, String>, StorageError> {
        self.ensure_available()?;
        let state = self.state.read().map_err(|_| lock_err("document.key_summary"))?;

        let mut summary = BTreeMap::new();
        for (_, doc) in state.ordered() {
            let Some(capabilities) = doc.field("capabilities").and_then(Value::as_object) else {
                continue;
            };
            for (name, capability) in capabilities {
                let Some(value) = capability.get("value") else {
                    continue;
                };
                summary
                    .entry(name.clone())
                    .or_insert_with(|| value_type(value).to_string());
            }
        }
        Ok(summary)
    }

    fn all_documents(&self) -> Result<Vec<(String, DeviceDescription)>, StorageError> {
        self.ensure_available()?;
        let state = self.state.read().map_err(|_| lock_err("document.all_documents"))?;
        Ok(state
            .ordered()
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect())
    }

    fn is_connected(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
