//! In-process loopback broker.
//!
//! Implements [`PubSubClient`] without a network: published messages are
//! recorded and delivered synchronously to matching local subscriptions.
//! Remote traffic is simulated with [`LoopbackClient::inject`], and broker
//! failures with [`LoopbackClient::simulate_connection_loss`] and
//! [`LoopbackClient::fail_next_connects`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::TransportError;
use crate::topic::TopicFilter;

use super::{ConnectionLossHandler, MessageHandler, PubSubClient};

#[derive(Default)]
struct LoopbackState {
    connected: bool,
    subscriptions: Vec<(TopicFilter, MessageHandler)>,
    published: Vec<(String, Vec<u8>)>,
    loss_handler: Option<ConnectionLossHandler>,
    failing_connects: usize,
}

/// Loopback implementation of [`PubSubClient`].
#[derive(Default)]
pub struct LoopbackClient {
    state: Mutex<LoopbackState>,
    published_cv: Condvar,
    connect_attempts: AtomicUsize,
    subscribe_calls: AtomicUsize,
}

impl std::fmt::Debug for LoopbackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackClient")
            .field("connected", &self.is_connected())
            .field("connect_attempts", &self.connect_attempts())
            .finish_non_exhaustive()
    }
}

fn lock_err() -> TransportError {
    TransportError::ConnectionFailed {
        message: "poisoned loopback state".to_string(),
    }
}

impl LoopbackClient {
    /// Creates a disconnected loopback client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, LoopbackState>, TransportError> {
        self.state.lock().map_err(|_| lock_err())
    }

    fn matching_handlers(&self, topic: &str) -> Vec<MessageHandler> {
        self.state()
            .map(|state| {
                state
                    .subscriptions
                    .iter()
                    .filter(|(filter, _)| filter.matches(topic))
                    .map(|(_, handler)| handler.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Delivers a message as if it was published by a remote client.
    /// Nothing is delivered while disconnected.
    pub fn inject(&self, topic: &str, payload: &[u8]) -> usize {
        if !self.is_connected() {
            return 0;
        }
        let handlers = self.matching_handlers(topic);
        for handler in &handlers {
            handler(topic, payload);
        }
        handlers.len()
    }

    /// Drops the connection and the broker-side session, then invokes the
    /// connection-loss handler.
    pub fn simulate_connection_loss(&self, reason: &str) {
        let handler = match self.state() {
            Ok(mut state) => {
                state.connected = false;
                state.subscriptions.clear();
                state.loss_handler.clone()
            }
            Err(_) => return,
        };
        debug!(reason, "loopback connection lost");
        if let Some(handler) = handler {
            handler(reason);
        }
    }

    /// Makes the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        if let Ok(mut state) = self.state() {
            state.failing_connects = count;
        }
    }

    /// Total number of connect attempts, successful or not.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Total number of subscribe calls accepted by the broker.
    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Topic filters currently subscribed at the broker.
    #[must_use]
    pub fn subscribed_filters(&self) -> Vec<String> {
        self.state()
            .map(|state| {
                state
                    .subscriptions
                    .iter()
                    .map(|(filter, _)| filter.as_str().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All messages published through this client so far.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state()
            .map(|state| state.published.clone())
            .unwrap_or_default()
    }

    /// Waits until a message was published to a topic matching `filter`
    /// and returns the first such message.
    #[must_use]
    pub fn wait_for_published(&self, filter: &str, timeout: Duration) -> Option<(String, Vec<u8>)> {
        self.wait_for_published_count(filter, 1, timeout)
            .and_then(|messages| messages.into_iter().next())
    }

    /// Waits until at least `count` messages matching `filter` were published
    /// and returns all matching messages.
    #[must_use]
    pub fn wait_for_published_count(
        &self,
        filter: &str,
        count: usize,
        timeout: Duration,
    ) -> Option<Vec<(String, Vec<u8>)>> {
        let filter = TopicFilter::parse(filter).ok()?;
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().ok()?;

        loop {
            let matching: Vec<(String, Vec<u8>)> = state
                .published
                .iter()
                .filter(|(topic, _)| filter.matches(topic))
                .cloned()
                .collect();
            if matching.len() >= count {
                return Some(matching);
            }

            let remaining = deadline.checked_duration_since(Instant::now())?;
            state = self.published_cv.wait_timeout(state, remaining).ok()?.0;
        }
    }
}

impl PubSubClient for LoopbackClient {
    fn connect(&self, host: &str, port: u16) -> Result<(), TransportError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state()?;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(TransportError::ConnectionFailed {
                message: format!("loopback refused connection to {host}:{port}"),
            });
        }
        state.connected = true;
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state()?;
        state.connected = false;
        state.subscriptions.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state().map(|state| state.connected).unwrap_or(false)
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        {
            let mut state = self.state()?;
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            state.published.push((topic.to_string(), payload.to_vec()));
        }
        self.published_cv.notify_all();

        for handler in self.matching_handlers(topic) {
            handler(topic, payload);
        }
        Ok(())
    }

    fn subscribe(&self, filter: &TopicFilter, handler: MessageHandler) -> Result<(), TransportError> {
        let mut state = self.state()?;
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.subscriptions.retain(|(existing, _)| existing != filter);
        state.subscriptions.push((filter.clone(), handler));
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unsubscribe(&self, filter: &TopicFilter) -> Result<(), TransportError> {
        let mut state = self.state()?;
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.subscriptions.retain(|(existing, _)| existing != filter);
        Ok(())
    }

    fn set_connection_loss_handler(&self, handler: ConnectionLossHandler) {
        if let Ok(mut state) = self.state() {
            state.loss_handler = Some(handler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn filter(raw: &str) -> TopicFilter {
        TopicFilter::parse(raw).unwrap()
    }

    #[test]
    fn delivers_to_matching_subscriptions_only() {
        let client = LoopbackClient::new();
        client.connect("localhost", 1883).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        client
            .subscribe(
                &filter("+/discovery/+/test"),
                Arc::new(move |_topic: &str, _payload: &[u8]| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert_eq!(client.inject("a/discovery/b/test", b"{}"), 1);
        assert_eq!(client.inject("a/discovery/b/query", b"{}"), 0);
        client.publish("x/discovery/y/test", b"{}").unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(client.published().len(), 1);
    }

    #[test]
    fn rejects_operations_while_disconnected() {
        let client = LoopbackClient::new();
        assert!(matches!(
            client.publish("t", b""),
            Err(TransportError::NotConnected)
        ));
        assert!(client
            .subscribe(&filter("t"), Arc::new(|_: &str, _: &[u8]| {}))
            .is_err());
        assert_eq!(client.inject("t", b""), 0);
    }

    #[test]
    fn connection_loss_clears_session_and_calls_handler() {
        let client = LoopbackClient::new();
        client.connect("localhost", 1883).unwrap();
        client
            .subscribe(&filter("a/#"), Arc::new(|_: &str, _: &[u8]| {}))
            .unwrap();

        let reasons = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reasons);
        client.set_connection_loss_handler(Arc::new(move |reason: &str| {
            sink.lock().unwrap().push(reason.to_string());
        }));

        client.simulate_connection_loss("broker restart");
        assert!(!client.is_connected());
        assert!(client.subscribed_filters().is_empty());
        assert_eq!(*reasons.lock().unwrap(), vec!["broker restart".to_string()]);
    }

    #[test]
    fn failing_connects_are_counted() {
        let client = LoopbackClient::new();
        client.fail_next_connects(2);
        assert!(client.connect("h", 1).is_err());
        assert!(client.connect("h", 1).is_err());
        assert!(client.connect("h", 1).is_ok());
        assert_eq!(client.connect_attempts(), 3);
    }

    #[test]
    fn waits_for_published_messages() {
        let client = Arc::new(LoopbackClient::new());
        client.connect("h", 1).unwrap();

        let publisher = Arc::clone(&client);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            publisher.publish("replies/1", b"done").unwrap();
        });

        let (topic, payload) = client
            .wait_for_published("replies/#", Duration::from_secs(5))
            .unwrap();
        assert_eq!(topic, "replies/1");
        assert_eq!(payload, b"done");
        handle.join().unwrap();

        assert!(client
            .wait_for_published("other/#", Duration::from_millis(10))
            .is_none());
    }
}
