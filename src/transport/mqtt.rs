//! MQTT client backed by `rumqttc`.
//!
//! Every successful `connect` owns one rumqttc connection and one event-loop
//! thread. The event loop forwards inbound publishes to the registered
//! handlers and reports unexpected errors through the connection-loss
//! handler; it never reconnects on its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use rumqttc::{Client, ConnectReturnCode, Connection, Event, Incoming, MqttOptions, QoS};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::topic::TopicFilter;

use super::{ConnectionLossHandler, MessageHandler, PubSubClient};

#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub client_id: String,
    /// Keep-alive interval sent to the broker.
    pub keep_alive: Duration,
    /// How long `connect` waits for the broker's CONNACK.
    pub connect_timeout: Duration,
    /// Capacity of the request channel between client and event loop.
    pub channel_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            client_id: format!("discovery-repository-{}", uuid::Uuid::new_v4().simple()),
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            channel_capacity: 256,
        }
    }
}

type Handlers = Arc<RwLock<Vec<(TopicFilter, MessageHandler)>>>;

struct Session {
    client: Client,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
}

impl Session {
    fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "disconnect request not delivered");
        }
    }
}

/// [`PubSubClient`] speaking MQTT 3.1.1.
pub struct MqttClient {
    config: MqttConfig,
    session: Mutex<Option<Session>>,
    handlers: Handlers,
    loss_handler: Arc<RwLock<Option<ConnectionLossHandler>>>,
}

impl std::fmt::Debug for MqttClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttClient")
            .field("client_id", &self.config.client_id)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

fn lock_err() -> TransportError {
    TransportError::ConnectionFailed {
        message: "poisoned mqtt session state".to_string(),
    }
}

impl MqttClient {
    /// Creates a disconnected client.
    #[must_use]
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
            handlers: Arc::new(RwLock::new(Vec::new())),
            loss_handler: Arc::new(RwLock::new(None)),
        }
    }

    fn with_client<T>(
        &self,
        op: impl FnOnce(&Client) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let session = self.session.lock().map_err(|_| lock_err())?;
        match session.as_ref() {
            Some(session) if session.connected.load(Ordering::SeqCst) => op(&session.client),
            _ => Err(TransportError::NotConnected),
        }
    }

    fn spawn_event_loop(
        &self,
        mut connection: Connection,
        connected: Arc<AtomicBool>,
        closing: Arc<AtomicBool>,
        ack_tx: Sender<Result<(), String>>,
    ) -> Result<(), TransportError> {
        let handlers = Arc::clone(&self.handlers);
        let loss_handler = Arc::clone(&self.loss_handler);

        thread::Builder::new()
            .name("discovery-mqtt-eventloop".to_string())
            .spawn(move || {
                for notification in connection.iter() {
                    match notification {
                        Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                            let outcome = if ack.code == ConnectReturnCode::Success {
                                connected.store(true, Ordering::SeqCst);
                                Ok(())
                            } else {
                                Err(format!("broker refused connection: {:?}", ack.code))
                            };
                            let _ = ack_tx.try_send(outcome);
                        }
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            dispatch(&handlers, &publish.topic, &publish.payload);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            let was_connected = connected.swap(false, Ordering::SeqCst);
                            if closing.load(Ordering::SeqCst) {
                                debug!("mqtt event loop closed");
                            } else if was_connected {
                                warn!(error = %e, "mqtt connection lost");
                                let handler = loss_handler.read().ok().and_then(|h| h.clone());
                                if let Some(handler) = handler {
                                    handler(&e.to_string());
                                }
                            } else {
                                let _ = ack_tx.try_send(Err(e.to_string()));
                            }
                            break;
                        }
                    }
                }
            })
            .map(|_| ())
            .map_err(|e| TransportError::ConnectionFailed {
                message: format!("failed to spawn mqtt event loop: {e}"),
            })
    }
}

fn dispatch(handlers: &Handlers, topic: &str, payload: &[u8]) {
    let matching: Vec<MessageHandler> = match handlers.read() {
        Ok(handlers) => handlers
            .iter()
            .filter(|(filter, _)| filter.matches(topic))
            .map(|(_, handler)| Arc::clone(handler))
            .collect(),
        Err(_) => return,
    };
    if matching.is_empty() {
        debug!(topic, "no handler for inbound message");
    }
    for handler in matching {
        handler(topic, payload);
    }
}

impl PubSubClient for MqttClient {
    fn connect(&self, host: &str, port: u16) -> Result<(), TransportError> {
        let mut session = self.session.lock().map_err(|_| lock_err())?;
        if let Some(previous) = session.take() {
            previous.close();
        }

        let mut options = MqttOptions::new(self.config.client_id.clone(), host, port);
        options.set_keep_alive(self.config.keep_alive);
        options.set_clean_session(true);

        let (client, connection) = Client::new(options, self.config.channel_capacity.max(1));
        let connected = Arc::new(AtomicBool::new(false));
        let closing = Arc::new(AtomicBool::new(false));
        let (ack_tx, ack_rx) = bounded(1);
        self.spawn_event_loop(connection, Arc::clone(&connected), Arc::clone(&closing), ack_tx)?;

        let candidate = Session {
            client,
            connected,
            closing,
        };
        let failure = match ack_rx.recv_timeout(self.config.connect_timeout) {
            Ok(Ok(())) => None,
            Ok(Err(message)) => Some(message),
            Err(RecvTimeoutError::Timeout) => Some(format!(
                "no CONNACK within {}ms",
                self.config.connect_timeout.as_millis()
            )),
            Err(RecvTimeoutError::Disconnected) => Some("event loop exited".to_string()),
        };

        if let Some(message) = failure {
            candidate.close();
            return Err(TransportError::ConnectionFailed {
                message: format!("{host}:{port}: {message}"),
            });
        }

        info!(host, port, client_id = %self.config.client_id, "connected to broker");
        *session = Some(candidate);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        let mut session = self.session.lock().map_err(|_| lock_err())?;
        if let Some(session) = session.take() {
            session.close();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|s| s.connected.load(Ordering::SeqCst)))
            .unwrap_or(false)
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.with_client(|client| {
            client
                .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
                .map_err(|e| TransportError::PublishFailed {
                    topic: topic.to_string(),
                    message: e.to_string(),
                })
        })
    }

    fn subscribe(&self, filter: &TopicFilter, handler: MessageHandler) -> Result<(), TransportError> {
        {
            let mut handlers = self.handlers.write().map_err(|_| lock_err())?;
            handlers.retain(|(existing, _)| existing != filter);
            handlers.push((filter.clone(), handler));
        }
        self.with_client(|client| {
            client
                .try_subscribe(filter.as_str(), QoS::AtLeastOnce)
                .map_err(|e| TransportError::SubscribeFailed {
                    filter: filter.to_string(),
                    message: e.to_string(),
                })
        })
    }

    fn unsubscribe(&self, filter: &TopicFilter) -> Result<(), TransportError> {
        {
            let mut handlers = self.handlers.write().map_err(|_| lock_err())?;
            handlers.retain(|(existing, _)| existing != filter);
        }
        self.with_client(|client| {
            client
                .try_unsubscribe(filter.as_str())
                .map_err(|e| TransportError::SubscribeFailed {
                    filter: filter.to_string(),
                    message: e.to_string(),
                })
        })
    }

    fn set_connection_loss_handler(&self, handler: ConnectionLossHandler) {
        if let Ok(mut slot) = self.loss_handler.write() {
            *slot = Some(handler);
        }
    }
}
