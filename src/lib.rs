//! # Discovery Repository
//!
//! A discovery repository for IoT device descriptions. It stores device
//! description documents, answers ad-hoc queries over a publish/subscribe
//! broker and keeps requesting clients informed when the result of a
//! standing query changes.
//!
//! ## Core Concepts
//!
//! - **Device description**: an opaque JSON document, identified across
//!   changes by its MAC address
//! - **Requirement**: a typed criterion (`name`, `description`, `location`,
//!   or any registered type) compiled into a composite [`Filter`]
//! - **Subscription**: a standing query keyed by reference id whose result
//!   is re-evaluated on every store mutation
//! - **Revision**: an incremental change notification (`upsert`, `delete`,
//!   `replace`) published to a subscription's notification topic
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use discovery_repository::{InMemoryDocumentStore, LoopbackClient, Repository, RepositoryConfig};
//!
//! let repository = Repository::new(
//!     Arc::new(LoopbackClient::new()),
//!     Arc::new(InMemoryDocumentStore::new()),
//!     RepositoryConfig::default(),
//! )?;
//! repository.start();
//!
//! let hits = repository
//!     .descriptions()
//!     .query(&[serde_json::json!({"type": "name", "match": "Lamp", "operator": "contains"})]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod document;
pub mod envelope;
pub mod error;
pub mod topic;

// Query compilation, storage and standing queries
pub mod query;
pub mod storage;
pub mod subscription;

// Messaging and services
pub mod config;
pub mod descriptions;
pub mod messaging;
pub mod transport;

mod repository;

// Re-export primary types at crate root for convenience
pub use descriptions::{DeviceDescriptionService, NotificationSink, StoreConfig};
pub use document::DeviceDescription;
pub use envelope::Envelope;
pub use error::{
    ExecutionError, RepositoryError, RepositoryResult, TransportError, ValidationError,
};
pub use messaging::{Dispatcher, MessageService};
pub use query::{Filter, ParseOutcome, RequirementCompiler, RequirementParser};
pub use repository::{Repository, RepositoryConfig};
pub use storage::{DocumentStore, InMemoryDocumentStore, StorageError};
pub use subscription::{Notification, Subscription, SubscriptionEngine};
pub use topic::TopicFilter;
pub use transport::{LoopbackClient, PubSubClient, PubSubConfig, PubSubService};
