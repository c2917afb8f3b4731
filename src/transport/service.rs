//! Resilient publish/subscribe service.
//!
//! Wraps a [`PubSubClient`] with the state a broker session loses on
//! disconnect: the set of subscribed topic filters. Inbound messages are
//! moved off the transport thread into a bounded [`WorkerPool`].
//!
//! Connection loss starts a reconnection supervisor: a single background
//! loop that ticks immediately and then every `reconnect_delay`. Each tick
//! ends the loop if the client is connected again, otherwise it attempts to
//! connect and, on success, re-subscribes every remembered filter. The loop
//! never gives up; an atomic flag guarantees at most one loop at a time.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use crate::error::{RepositoryError, RepositoryResult, TransportError};
use crate::topic::TopicFilter;

use super::worker::{WorkerPool, WorkerPoolConfig};
use super::{MessageHandler, PubSubClient};

#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    pub broker_host: String,
    pub broker_port: u16,
    /// Delay between reconnection attempts.
    pub reconnect_delay: Duration,
    /// Inbound message processing.
    pub workers: WorkerPoolConfig,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            reconnect_delay: Duration::from_secs(10),
            workers: WorkerPoolConfig::default(),
        }
    }
}

struct Supervisor {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

struct Inner {
    client: Arc<dyn PubSubClient>,
    config: PubSubConfig,
    pool: Arc<WorkerPool>,
    subscriptions: RwLock<Vec<(TopicFilter, MessageHandler)>>,
    reconnecting: AtomicBool,
    shutting_down: AtomicBool,
    supervisor: Mutex<Option<Supervisor>>,
    reconnect_loops: AtomicU64,
}

/// Publish/subscribe service with remembered subscriptions and automatic
/// reconnection. Cheap to clone.
#[derive(Clone)]
pub struct PubSubService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PubSubService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubService")
            .field("broker_host", &self.inner.config.broker_host)
            .field("broker_port", &self.inner.config.broker_port)
            .field("connected", &self.is_connected())
            .field("reconnecting", &self.is_reconnecting())
            .finish_non_exhaustive()
    }
}

impl PubSubService {
    /// Creates the service and installs the connection-loss handler on
    /// `client`. Does not connect.
    pub fn new(client: Arc<dyn PubSubClient>, config: PubSubConfig) -> RepositoryResult<Self> {
        let pool = Arc::new(WorkerPool::start("inbound", &config.workers)?);
        let inner = Arc::new(Inner {
            client,
            config,
            pool,
            subscriptions: RwLock::new(Vec::new()),
            reconnecting: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            supervisor: Mutex::new(None),
            reconnect_loops: AtomicU64::new(0),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        inner.client.set_connection_loss_handler(Arc::new(move |reason: &str| {
            if let Some(inner) = weak.upgrade() {
                warn!(reason, "connection to broker lost");
                Inner::start_reconnect(&inner);
            }
        }));

        Ok(Self { inner })
    }

    /// Connects to the configured broker. If the broker is unreachable the
    /// reconnection supervisor takes over and the call still succeeds.
    pub fn start(&self) {
        match self.inner.connect_and_resubscribe() {
            Ok(()) => info!(
                host = %self.inner.config.broker_host,
                port = self.inner.config.broker_port,
                "pub/sub service connected"
            ),
            Err(e) => {
                warn!(error = %e, "initial broker connection failed, retrying in background");
                Inner::start_reconnect(&self.inner);
            }
        }
    }

    /// Connects once without starting the supervisor.
    pub fn connect(&self) -> Result<(), TransportError> {
        self.inner.connect_and_resubscribe()
    }

    /// Whether the underlying client is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.client.is_connected()
    }

    /// Whether a reconnection loop is running.
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.inner.reconnecting.load(Ordering::SeqCst)
    }

    /// Number of reconnection loops started so far.
    #[must_use]
    pub fn reconnect_loops_started(&self) -> u64 {
        self.inner.reconnect_loops.load(Ordering::SeqCst)
    }

    /// Number of inbound messages dropped because the worker queue was full.
    #[must_use]
    pub fn rejected_messages(&self) -> u64 {
        self.inner.pool.rejected()
    }

    /// Remembers `handler` for `filter` and subscribes at the broker when
    /// connected. While disconnected the subscription is deferred until the
    /// next successful connect. The handler runs on the worker pool.
    pub fn subscribe(&self, filter: TopicFilter, handler: MessageHandler) -> Result<(), TransportError> {
        let wrapped = self.inner.pooled(handler);
        {
            let mut subscriptions = self
                .inner
                .subscriptions
                .write()
                .map_err(|_| TransportError::SubscribeFailed {
                    filter: filter.to_string(),
                    message: "poisoned subscription registry".to_string(),
                })?;
            subscriptions.retain(|(existing, _)| existing != &filter);
            subscriptions.push((filter.clone(), Arc::clone(&wrapped)));
        }

        if !self.is_connected() {
            debug!(filter = %filter, "not connected, subscription deferred");
            return Ok(());
        }
        self.inner.client.subscribe(&filter, wrapped)
    }

    /// Forgets the subscription for `filter`.
    pub fn unsubscribe(&self, filter: &TopicFilter) -> Result<(), TransportError> {
        if let Ok(mut subscriptions) = self.inner.subscriptions.write() {
            subscriptions.retain(|(existing, _)| existing != filter);
        }
        if !self.is_connected() {
            return Ok(());
        }
        self.inner.client.unsubscribe(filter)
    }

    /// Topic filters remembered for re-subscription.
    #[must_use]
    pub fn subscribed_filters(&self) -> Vec<TopicFilter> {
        self.inner
            .subscriptions
            .read()
            .map(|subs| subs.iter().map(|(filter, _)| filter.clone()).collect())
            .unwrap_or_default()
    }

    /// Publishes a payload. Best-effort: fails immediately while disconnected.
    pub fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        if topic.is_empty() {
            return Err(TransportError::PublishFailed {
                topic: String::new(),
                message: "topic must not be empty".to_string(),
            });
        }
        self.inner.client.publish(topic, payload)
    }

    /// Stops the supervisor, disconnects and drains the worker pool.
    pub fn shutdown(&self) -> RepositoryResult<()> {
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        let supervisor = self
            .inner
            .supervisor
            .lock()
            .map_err(|_| RepositoryError::internal("poisoned supervisor slot"))?
            .take();
        if let Some(supervisor) = supervisor {
            let _ = supervisor.stop.try_send(());
            if supervisor.handle.thread().id() != thread::current().id() {
                let _ = supervisor.handle.join();
            }
        }

        self.inner.client.disconnect()?;
        self.inner.pool.shutdown();
        info!(rejected = self.rejected_messages(), "pub/sub service stopped");
        Ok(())
    }
}

impl Inner {
    fn pooled(&self, handler: MessageHandler) -> MessageHandler {
        let pool = Arc::clone(&self.pool);
        Arc::new(move |topic: &str, payload: &[u8]| {
            let handler = Arc::clone(&handler);
            let owned_topic = topic.to_string();
            let owned_payload = payload.to_vec();
            if let Err(e) = pool.try_submit(move || handler(&owned_topic, &owned_payload)) {
                error!(topic, error = %e, "inbound message dropped");
            }
        })
    }

    fn connect_and_resubscribe(&self) -> Result<(), TransportError> {
        self.client
            .connect(&self.config.broker_host, self.config.broker_port)?;

        let subscriptions: Vec<(TopicFilter, MessageHandler)> = self
            .subscriptions
            .read()
            .map(|subs| subs.clone())
            .unwrap_or_default();
        for (filter, handler) in subscriptions {
            if let Err(e) = self.client.subscribe(&filter, handler) {
                error!(filter = %filter, error = %e, "re-subscription failed");
            }
        }
        Ok(())
    }

    fn start_reconnect(inner: &Arc<Self>) {
        if inner.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        if inner
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("reconnection already in progress");
            return;
        }
        inner.reconnect_loops.fetch_add(1, Ordering::SeqCst);

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let weak = Arc::downgrade(inner);
        let delay = inner.config.reconnect_delay;

        let spawned = thread::Builder::new()
            .name("discovery-reconnect".to_string())
            .spawn(move || {
                let mut attempt: u64 = 0;
                loop {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    if inner.shutting_down.load(Ordering::SeqCst) {
                        inner.reconnecting.store(false, Ordering::SeqCst);
                        return;
                    }
                    if inner.client.is_connected() {
                        info!(attempts = attempt, "broker connection already restored");
                        break;
                    }

                    attempt += 1;
                    match inner.connect_and_resubscribe() {
                        Ok(()) => {
                            info!(attempts = attempt, "reconnected to broker");
                            break;
                        }
                        Err(e) => {
                            warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "reconnect failed");
                        }
                    }
                    drop(inner);

                    match stop_rx.recv_timeout(delay) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                            if let Some(inner) = weak.upgrade() {
                                inner.reconnecting.store(false, Ordering::SeqCst);
                            }
                            return;
                        }
                    }
                }

                if let Some(inner) = weak.upgrade() {
                    inner.reconnecting.store(false, Ordering::SeqCst);
                    // A loss reported while the flag was still set went unhandled.
                    if !inner.client.is_connected() {
                        Self::start_reconnect(&inner);
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                if let Ok(mut slot) = inner.supervisor.lock() {
                    *slot = Some(Supervisor {
                        stop: stop_tx,
                        handle,
                    });
                }
            }
            Err(e) => {
                error!(error = %e, "failed to spawn reconnection supervisor");
                inner.reconnecting.store(false, Ordering::SeqCst);
            }
        }
    }
}
