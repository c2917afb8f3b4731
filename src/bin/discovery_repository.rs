//! Discovery Repository Server
//!
//! Connects to an MQTT broker and serves discovery test, query and cancel
//! requests until the process is terminated.

use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use discovery_repository::config::{load_seed, ServiceConfig};
use discovery_repository::storage::InMemoryDocumentStore;
use discovery_repository::transport::MqttClient;
use discovery_repository::Repository;

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let config = ServiceConfig::parse();
    init_tracing(config.verbose);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        broker = %format!("{}:{}", config.broker_host, config.broker_port),
        "discovery repository starting"
    );

    let store = Arc::new(InMemoryDocumentStore::with_result_limit(config.search_limit));
    let client = Arc::new(MqttClient::new(config.mqtt()));
    let repository = Repository::new(client, store, config.repository())
        .context("failed to wire discovery repository")?;

    if let Some(path) = &config.seed {
        let docs = load_seed(path)
            .with_context(|| format!("failed to load seed file {}", path.display()))?;
        let total = docs.len();
        for doc in docs {
            if let Err(e) = repository.descriptions().insert(doc) {
                warn!(error = %e, "seed document rejected");
            }
        }
        info!(total, stored = repository.descriptions().count()?, "seed file loaded");
    }

    repository.start();
    info!("serving discovery requests, press Ctrl+C to stop");

    loop {
        thread::park();
    }
}
