//! Service configuration.
//!
//! Parsed from command-line flags with environment fallbacks and split into
//! the plain config structs the library components take.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde_json::Value;

use crate::descriptions::StoreConfig;
use crate::document::DeviceDescription;
use crate::error::{RepositoryError, RepositoryResult, ValidationError};
use crate::transport::{PubSubConfig, WorkerPoolConfig};
use crate::RepositoryConfig;

/// Discovery repository daemon configuration.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "discovery-repository",
    about = "IoT device discovery repository answering queries over MQTT"
)]
pub struct ServiceConfig {
    /// Broker host name or address
    #[arg(long, env = "DISCOVERY_BROKER_HOST", default_value = "localhost")]
    pub broker_host: String,

    /// Broker port
    #[arg(long, env = "DISCOVERY_BROKER_PORT", default_value_t = 1883)]
    pub broker_port: u16,

    /// MQTT client id (random when unset)
    #[arg(long, env = "DISCOVERY_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Sender name stamped on replies
    #[arg(long, env = "DISCOVERY_SERVICE_NAME", default_value = "discovery-repository")]
    pub service_name: String,

    /// Seconds between reconnection attempts
    #[arg(long, env = "DISCOVERY_RECONNECT_DELAY", default_value_t = 10)]
    pub reconnect_delay_secs: u64,

    /// Seconds to wait for the broker to accept a connection
    #[arg(long, env = "DISCOVERY_CONNECT_TIMEOUT", default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// MQTT keep-alive interval in seconds
    #[arg(long, env = "DISCOVERY_KEEP_ALIVE", default_value_t = 30)]
    pub keep_alive_secs: u64,

    /// Seconds before a store search is abandoned
    #[arg(long, env = "DISCOVERY_SEARCH_TIMEOUT", default_value_t = 30)]
    pub search_timeout_secs: u64,

    /// Maximum documents returned by one search
    #[arg(long, env = "DISCOVERY_SEARCH_LIMIT", default_value_t = 20)]
    pub search_limit: usize,

    /// Inbound message worker threads
    #[arg(long, env = "DISCOVERY_WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Inbound message queue capacity
    #[arg(long, env = "DISCOVERY_QUEUE_CAPACITY", default_value_t = 1024)]
    pub queue_capacity: usize,

    /// JSON file with an array of device descriptions to load at startup
    #[arg(long, env = "DISCOVERY_SEED")]
    pub seed: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short)]
    pub verbose: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::parse_from(["discovery-repository"])
    }
}

impl ServiceConfig {
    #[allow(missing_docs)]
    #[must_use]
    pub fn pubsub(&self) -> PubSubConfig {
        PubSubConfig {
            broker_host: self.broker_host.clone(),
            broker_port: self.broker_port,
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs.max(1)),
            workers: WorkerPoolConfig {
                workers: self.workers,
                queue_capacity: self.queue_capacity,
            },
        }
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn store(&self) -> StoreConfig {
        StoreConfig {
            search_timeout: Duration::from_secs(self.search_timeout_secs.max(1)),
        }
    }

    /// Settings for a fully wired [`Repository`](crate::Repository).
    #[must_use]
    pub fn repository(&self) -> RepositoryConfig {
        RepositoryConfig {
            service_name: self.service_name.clone(),
            pubsub: self.pubsub(),
            store: self.store(),
        }
    }

    /// MQTT client settings.
    #[cfg(feature = "mqtt")]
    #[must_use]
    pub fn mqtt(&self) -> crate::transport::MqttConfig {
        let defaults = crate::transport::MqttConfig::default();
        crate::transport::MqttConfig {
            client_id: self.client_id.clone().unwrap_or(defaults.client_id),
            keep_alive: Duration::from_secs(self.keep_alive_secs.max(5)),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
            ..defaults
        }
    }
}

/// Reads a seed file holding a JSON array of device descriptions.
pub fn load_seed(path: &Path) -> RepositoryResult<Vec<DeviceDescription>> {
    let raw = fs::read(path).map_err(|e| {
        RepositoryError::internal(format!("failed to read seed file {}: {e}", path.display()))
    })?;
    let value: Value = serde_json::from_slice(&raw).map_err(ValidationError::from)?;

    let Value::Array(items) = value else {
        return Err(ValidationError::MalformedPayload {
            reason: "seed file must contain a JSON array".to_string(),
        }
        .into());
    };
    items
        .into_iter()
        .map(|item| DeviceDescription::from_value(item).map_err(RepositoryError::from))
        .collect()
}
