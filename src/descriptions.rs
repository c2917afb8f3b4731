//! Device description service.
//!
//! Gateway between request handlers and the document store. Every successful
//! mutation is reported to the [`SubscriptionEngine`] and the resulting
//! revision notifications are handed to a [`NotificationSink`]. Searches run
//! on a helper thread with a timeout; a timeout or a store failure yields an
//! empty result.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::document::DeviceDescription;
use crate::error::RepositoryResult;
use crate::query::{Filter, RequirementCompiler};
use crate::storage::DocumentStore;
use crate::subscription::{Notification, QueryExecutor, SubscriptionEngine};

/// Receives revision notifications produced by store mutations.
pub trait NotificationSink: Send + Sync {
    /// Delivers one notification to its topic.
    fn notify(&self, notification: &Notification) -> RepositoryResult<()>;
}

/// Store access settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Upper bound on a single search.
    pub search_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            search_timeout: Duration::from_secs(30),
        }
    }
}

/// Device description service. Cheap to clone.
#[derive(Clone)]
pub struct DeviceDescriptionService {
    store: Arc<dyn DocumentStore>,
    compiler: Arc<RequirementCompiler>,
    subscriptions: Arc<SubscriptionEngine>,
    sink: Arc<dyn NotificationSink>,
    config: StoreConfig,
}

impl std::fmt::Debug for DeviceDescriptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceDescriptionService")
            .field("compiler", &self.compiler)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DeviceDescriptionService {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        compiler: Arc<RequirementCompiler>,
        subscriptions: Arc<SubscriptionEngine>,
        sink: Arc<dyn NotificationSink>,
        config: StoreConfig,
    ) -> Self {
        Self {
            store,
            compiler,
            subscriptions,
            sink,
            config,
        }
    }

    /// The requirement compiler used for queries.
    #[must_use]
    pub fn compiler(&self) -> &RequirementCompiler {
        &self.compiler
    }

    /// The subscription engine notified on mutations.
    #[must_use]
    pub fn subscriptions(&self) -> &Arc<SubscriptionEngine> {
        &self.subscriptions
    }

    /// Compiles `requirements` and searches the store.
    #[must_use]
    pub fn query(&self, requirements: &[Value]) -> Vec<DeviceDescription> {
        let filter = self.compiler.compile(requirements);
        self.search(&filter)
    }

    /// Searches the store with a timeout.
    #[must_use]
    pub fn search(&self, filter: &Filter) -> Vec<DeviceDescription> {
        let store = Arc::clone(&self.store);
        let filter = filter.clone();
        let (tx, rx) = bounded(1);
        let started = Instant::now();

        let spawned = thread::Builder::new()
            .name("discovery-search".to_string())
            .spawn(move || {
                let _ = tx.send(store.search(&filter));
            });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn search thread");
            return Vec::new();
        }

        match rx.recv_timeout(self.config.search_timeout) {
            Ok(Ok(docs)) => {
                debug!(
                    hits = docs.len(),
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "search completed"
                );
                docs
            }
            Ok(Err(e)) => {
                warn!(error = %e, "search failed, returning empty result");
                Vec::new()
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = self.config.search_timeout.as_millis() as u64,
                    "search timed out, returning empty result"
                );
                Vec::new()
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("search thread exited without a result");
                Vec::new()
            }
        }
    }

    /// Stores a device description and notifies affected subscriptions.
    pub fn insert(&self, doc: DeviceDescription) -> RepositoryResult<String> {
        let id = self.store.insert(doc.clone())?;
        debug!(id = %id, mac = doc.mac_address().unwrap_or_default(), "device description inserted");

        let notifications = self.subscriptions.on_insert(&doc, self)?;
        self.deliver(&notifications);
        Ok(id)
    }

    /// Fetches a device description by identifier.
    pub fn get(&self, id: &str) -> RepositoryResult<Option<DeviceDescription>> {
        Ok(self.store.get(id)?)
    }

    /// Replaces a stored description. Subscriptions are not re-evaluated.
    pub fn update(&self, id: &str, doc: DeviceDescription) -> RepositoryResult<()> {
        Ok(self.store.update(id, doc)?)
    }

    /// Deletes a device description. Returns `false` if the identifier is
    /// unknown.
    pub fn delete(&self, id: &str) -> RepositoryResult<bool> {
        let Some(doc) = self.store.get(id)? else {
            debug!(id, "delete of unknown device description");
            return Ok(false);
        };
        self.store.delete(id)?;

        let notifications = self.subscriptions.on_delete(&doc, self)?;
        self.deliver(&notifications);
        Ok(true)
    }

    /// Removes every device description.
    pub fn clear(&self) -> RepositoryResult<()> {
        self.store.clear()?;
        info!("repository cleared");

        let notifications = self.subscriptions.on_clear()?;
        self.deliver(&notifications);
        Ok(())
    }

    /// Number of stored descriptions.
    pub fn count(&self) -> RepositoryResult<usize> {
        Ok(self.store.count()?)
    }

    /// All stored descriptions with their identifiers.
    pub fn all(&self) -> RepositoryResult<Vec<(String, DeviceDescription)>> {
        Ok(self.store.all_documents()?)
    }

    /// Capability name to value type.
    pub fn key_summary(&self) -> RepositoryResult<BTreeMap<String, String>> {
        Ok(self.store.key_summary()?)
    }

    /// Whether the document store is reachable.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.store.is_connected()
    }

    fn deliver(&self, notifications: &[Notification]) {
        for notification in notifications {
            if let Err(e) = self.sink.notify(notification) {
                warn!(topic = %notification.topic, error = %e, "notification dropped");
            }
        }
    }
}

impl QueryExecutor for DeviceDescriptionService {
    fn execute(&self, filter: &Filter) -> Vec<DeviceDescription> {
        self.search(filter)
    }
}
