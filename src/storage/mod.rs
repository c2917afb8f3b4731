//! Document storage.
//!
//! [`DocumentStore`] is the narrow interface the repository needs from its
//! backing store; [`InMemoryDocumentStore`] implements it in process.

mod memory;
mod traits;

pub use memory::{InMemoryDocumentStore, DEFAULT_RESULT_LIMIT};
pub use traits::{DocumentStore, StorageError};
