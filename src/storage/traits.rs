//! Abstract storage contract for device description documents.
//!
//! The repository talks to its document store only through this trait, so
//! an in-memory backend can serve tests and embedded use while an external
//! search engine backs production deployments.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::document::DeviceDescription;
use crate::query::Filter;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Document not found.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// Identifier was empty.
    #[error("Document identifier must not be empty")]
    EmptyId,

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Storage trait for device description documents.
///
/// Identifiers are opaque strings assigned by the store on insert. Documents
/// returned by the store are the stored sources, without the identifier.
pub trait DocumentStore: Send + Sync {
    /// Insert a document and return its new identifier.
    fn insert(&self, doc: DeviceDescription) -> Result<String, StorageError>;

    /// Get a document by identifier.
    fn get(&self, id: &str) -> Result<Option<DeviceDescription>, StorageError>;

    /// Replace an existing document. Returns error if not found.
    fn update(&self, id: &str, doc: DeviceDescription) -> Result<(), StorageError>;

    /// Delete a document. Returns error if not found.
    fn delete(&self, id: &str) -> Result<(), StorageError>;

    /// Remove every document.
    fn clear(&self) -> Result<(), StorageError>;

    /// Number of stored documents.
    fn count(&self) -> Result<usize, StorageError>;

    /// Documents matching a compiled filter, up to the store's result limit.
    fn search(&self, filter: &Filter) -> Result<Vec<DeviceDescription>, StorageError>;

    /// Map of capability name to the type of its value.
    fn key_summary(&self) -> Result<BTreeMap<String, String>, StorageError>;

    /// All documents with their identifiers, in insertion order.
    fn all_documents(&self) -> Result<Vec<(String, DeviceDescription)>, StorageError>;

    /// Whether the backend is reachable.
    fn is_connected(&self) -> bool;
}
