//! Fully wired discovery repository.

use std::sync::Arc;

use tracing::info;

use crate::descriptions::{DeviceDescriptionService, StoreConfig};
use crate::error::RepositoryResult;
use crate::messaging::{discovery_endpoints, Dispatcher, MessageService};
use crate::query::RequirementCompiler;
use crate::storage::DocumentStore;
use crate::subscription::SubscriptionEngine;
use crate::transport::{PubSubClient, PubSubConfig, PubSubService};

/// Settings for [`Repository`].
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Sender name stamped on replies.
    pub service_name: String,
    #[allow(missing_docs)]
    pub pubsub: PubSubConfig,
    #[allow(missing_docs)]
    pub store: StoreConfig,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            service_name: "discovery-repository".to_string(),
            pubsub: PubSubConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Discovery repository: transport, endpoints, store and subscriptions.
#[derive(Debug, Clone)]
pub struct Repository {
    pubsub: PubSubService,
    messages: MessageService,
    descriptions: DeviceDescriptionService,
    dispatcher: Dispatcher,
}

impl Repository {
    /// Wires the repository with the built-in requirement parsers.
    pub fn new(
        client: Arc<dyn PubSubClient>,
        store: Arc<dyn DocumentStore>,
        config: RepositoryConfig,
    ) -> RepositoryResult<Self> {
        Self::with_compiler(client, store, RequirementCompiler::with_builtin_parsers(), config)
    }

    /// Wires the repository with a caller-provided compiler.
    pub fn with_compiler(
        client: Arc<dyn PubSubClient>,
        store: Arc<dyn DocumentStore>,
        compiler: RequirementCompiler,
        config: RepositoryConfig,
    ) -> RepositoryResult<Self> {
        let pubsub = PubSubService::new(client, config.pubsub)?;
        let messages = MessageService::new(pubsub.clone(), config.service_name);
        let descriptions = DeviceDescriptionService::new(
            store,
            Arc::new(compiler),
            Arc::new(SubscriptionEngine::new()),
            Arc::new(messages.clone()),
            config.store,
        );
        let dispatcher = Dispatcher::new(discovery_endpoints(&descriptions)?, messages.clone());
        dispatcher.bind(&pubsub)?;

        Ok(Self {
            pubsub,
            messages,
            descriptions,
            dispatcher,
        })
    }

    /// Connects to the broker; falls back to background reconnection.
    pub fn start(&self) {
        info!(
            sender = self.messages.sender_name(),
            endpoints = self.dispatcher.endpoints().len(),
            "starting discovery repository"
        );
        self.pubsub.start();
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn descriptions(&self) -> &DeviceDescriptionService {
        &self.descriptions
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn pubsub(&self) -> &PubSubService {
        &self.pubsub
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn messages(&self) -> &MessageService {
        &self.messages
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Disconnects and stops background threads.
    pub fn shutdown(&self) -> RepositoryResult<()> {
        self.pubsub.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryDocumentStore;
    use crate::transport::LoopbackClient;

    #[test]
    fn start_subscribes_discovery_topics() {
        let client = Arc::new(LoopbackClient::new());
        let repo = Repository::new(
            client.clone(),
            Arc::new(InMemoryDocumentStore::new()),
            RepositoryConfig::default(),
        )
        .unwrap();
        assert!(client.subscribed_filters().is_empty());

        repo.start();
        let mut filters = client.subscribed_filters();
        filters.sort();
        assert_eq!(
            filters,
            vec![
                "+/discovery/+/cancel".to_string(),
                "+/discovery/+/query".to_string(),
                "+/discovery/+/test".to_string(),
            ]
        );
        repo.shutdown().unwrap();
    }
}
