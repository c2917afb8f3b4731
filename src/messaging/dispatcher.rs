//! Topic dispatcher.
//!
//! Binds request handlers to topic filters. The endpoint table is fixed at
//! construction and read-only afterwards. Each inbound message is decoded,
//! routed to its endpoint and, when the handler produces a reply body,
//! answered on the request's return topic. A failing or panicking handler
//! only loses its own message.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::envelope::Envelope;
use crate::error::{RepositoryError, RepositoryResult};
use crate::topic::TopicFilter;
use crate::transport::PubSubService;

use super::publisher::MessageService;

/// Request handler: `(topic, message payload) -> optional reply body`.
pub type EndpointHandler =
    Arc<dyn Fn(&str, &Map<String, Value>) -> RepositoryResult<Option<Value>> + Send + Sync>;

/// One entry of the endpoint table.
#[derive(Clone)]
pub struct Endpoint {
    name: &'static str,
    filter: TopicFilter,
    reply_type: Option<&'static str>,
    handler: EndpointHandler,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("filter", &self.filter.as_str())
            .field("reply_type", &self.reply_type)
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new(
        name: &'static str,
        filter: TopicFilter,
        reply_type: Option<&'static str>,
        handler: EndpointHandler,
    ) -> Self {
        Self {
            name,
            filter,
            reply_type,
            handler,
        }
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request topics this endpoint serves.
    #[must_use]
    pub fn filter(&self) -> &TopicFilter {
        &self.filter
    }

    /// Message type stamped on replies. `None` for endpoints that never reply.
    #[must_use]
    pub fn reply_type(&self) -> Option<&'static str> {
        self.reply_type
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A reply was published to the given topic.
    Replied {
        /// Return topic of the request.
        topic: String,
    },
    /// The handler ran and produced no reply.
    Handled,
    /// The message was discarded.
    Dropped {
        /// Why it was discarded.
        reason: String,
    },
}

struct DispatcherInner {
    endpoints: Vec<Endpoint>,
    messages: MessageService,
}

/// Routes inbound messages to endpoints. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("endpoints", &self.inner.endpoints)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Builds a dispatcher over a fixed endpoint table.
    #[must_use]
    pub fn new(endpoints: Vec<Endpoint>, messages: MessageService) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                endpoints,
                messages,
            }),
        }
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.inner.endpoints
    }

    /// Subscribes every endpoint filter on `pubsub`.
    pub fn bind(&self, pubsub: &PubSubService) -> RepositoryResult<()> {
        for (index, endpoint) in self.inner.endpoints.iter().enumerate() {
            let dispatcher = self.clone();
            pubsub.subscribe(
                endpoint.filter.clone(),
                Arc::new(move |topic: &str, payload: &[u8]| {
                    let _ = dispatcher.dispatch_to(index, topic, payload);
                }),
            )?;
            debug!(endpoint = endpoint.name, filter = %endpoint.filter, "endpoint bound");
        }
        Ok(())
    }

    /// Routes a message to the first endpoint whose filter matches `topic`.
    pub fn handle(&self, topic: &str, payload: &[u8]) -> DispatchOutcome {
        match self
            .inner
            .endpoints
            .iter()
            .position(|endpoint| endpoint.filter.matches(topic))
        {
            Some(index) => self.dispatch_to(index, topic, payload),
            None => {
                debug!(topic, "no endpoint for topic");
                DispatchOutcome::Dropped {
                    reason: "no endpoint".to_string(),
                }
            }
        }
    }

    fn dispatch_to(&self, index: usize, topic: &str, payload: &[u8]) -> DispatchOutcome {
        let Some(endpoint) = self.inner.endpoints.get(index) else {
            return DispatchOutcome::Dropped {
                reason: "no endpoint".to_string(),
            };
        };

        let request = match Envelope::decode(payload) {
            Ok(request) => request,
            Err(e) => return dropped(endpoint, topic, &e.into()),
        };
        let body = match request.payload() {
            Ok(body) => body,
            Err(e) => return dropped(endpoint, topic, &e.into()),
        };

        let handler = Arc::clone(&endpoint.handler);
        let reply = match panic::catch_unwind(AssertUnwindSafe(|| handler(topic, body))) {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return dropped(endpoint, topic, &e),
            Err(_) => {
                return dropped(
                    endpoint,
                    topic,
                    &RepositoryError::internal("endpoint handler panicked"),
                )
            }
        };

        let Some(reply) = reply else {
            return DispatchOutcome::Handled;
        };
        if request.return_topic().is_none() {
            error!(endpoint = endpoint.name, topic, "request has no return topic, reply dropped");
            return DispatchOutcome::Dropped {
                reason: "missing return topic".to_string(),
            };
        }

        match self
            .inner
            .messages
            .publish_reply(reply, &request, endpoint.reply_type)
        {
            Ok(topic) => DispatchOutcome::Replied { topic },
            Err(e) => {
                warn!(endpoint = endpoint.name, error = %e, "failed to publish reply");
                DispatchOutcome::Dropped {
                    reason: e.to_string(),
                }
            }
        }
    }
}

fn dropped(endpoint: &Endpoint, topic: &str, err: &RepositoryError) -> DispatchOutcome {
    if err.is_validation() {
        warn!(endpoint = endpoint.name, topic, error = %err, "malformed request dropped");
    } else {
        error!(endpoint = endpoint.name, topic, error = %err, "request handling failed");
    }
    DispatchOutcome::Dropped {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LoopbackClient, PubSubConfig};
    use serde_json::json;
    use std::time::Duration;

    fn setup(endpoints: Vec<Endpoint>) -> (Arc<LoopbackClient>, PubSubService, Dispatcher) {
        let client = Arc::new(LoopbackClient::new());
        let pubsub = PubSubService::new(client.clone(), PubSubConfig::default()).unwrap();
        pubsub.connect().unwrap();
        let dispatcher = Dispatcher::new(endpoints, MessageService::new(pubsub.clone(), "repo"));
        (client, pubsub, dispatcher)
    }

    fn echo() -> Endpoint {
        Endpoint::new(
            "echo",
            TopicFilter::parse("+/echo").unwrap(),
            Some("echo_reply"),
            Arc::new(
                |topic: &str, body: &Map<String, Value>| -> RepositoryResult<Option<Value>> {
                    Ok(Some(json!({"topic": topic, "body": body})))
                },
            ),
        )
    }

    #[test]
    fn replies_to_return_topic_with_correlation_id() {
        let (client, _pubsub, dispatcher) = setup(vec![echo()]);
        let outcome = dispatcher.handle(
            "a/echo",
            br#"{"message":{"x":1},"returnTopic":"r/1","correlationId":"c"}"#,
        );
        assert_eq!(outcome, DispatchOutcome::Replied { topic: "r/1".to_string() });

        let (topic, payload) = client.published().pop().unwrap();
        assert_eq!(topic, "r/1");
        let reply = Envelope::decode(&payload).unwrap();
        assert_eq!(reply.message_type.as_deref(), Some("echo_reply"));
        assert_eq!(reply.correlation_id.as_deref(), Some("c"));
        assert_eq!(reply.message, json!({"topic": "a/echo", "body": {"x": 1}}));
    }

    #[test]
    fn malformed_and_unroutable_messages_are_dropped() {
        let (client, _pubsub, dispatcher) = setup(vec![echo()]);
        assert!(matches!(
            dispatcher.handle("a/echo", b"garbage"),
            DispatchOutcome::Dropped { .. }
        ));
        assert!(matches!(
            dispatcher.handle("a/echo", br#"{"message":"text","returnTopic":"r"}"#),
            DispatchOutcome::Dropped { .. }
        ));
        assert!(matches!(
            dispatcher.handle("a/other", br#"{"message":{},"returnTopic":"r"}"#),
            DispatchOutcome::Dropped { .. }
        ));
        assert!(matches!(
            dispatcher.handle("a/echo", br#"{"message":{}}"#),
            DispatchOutcome::Dropped { .. }
        ));
        assert!(client.published().is_empty());
    }

    #[test]
    fn handler_panic_is_contained() {
        let boom = Endpoint::new(
            "boom",
            TopicFilter::parse("boom").unwrap(),
            None,
            Arc::new(|_: &str, _: &Map<String, Value>| -> RepositoryResult<Option<Value>> {
                panic!("handler failure")
            }),
        );
        let (_client, _pubsub, dispatcher) = setup(vec![boom, echo()]);

        assert!(matches!(
            dispatcher.handle("boom", br#"{"message":{},"returnTopic":"r"}"#),
            DispatchOutcome::Dropped { .. }
        ));
        assert!(matches!(
            dispatcher.handle("x/echo", br#"{"message":{},"returnTopic":"r"}"#),
            DispatchOutcome::Replied { .. }
        ));
    }

    #[test]
    fn handlers_without_reply_publish_nothing() {
        let silent = Endpoint::new(
            "silent",
            TopicFilter::parse("quiet/#").unwrap(),
            None,
            Arc::new(|_: &str, _: &Map<String, Value>| -> RepositoryResult<Option<Value>> { Ok(None) }),
        );
        let (client, _pubsub, dispatcher) = setup(vec![silent]);
        assert_eq!(
            dispatcher.handle("quiet/a/b", br#"{"message":{},"returnTopic":"r"}"#),
            DispatchOutcome::Handled
        );
        assert!(client.published().is_empty());
    }

    #[test]
    fn bound_endpoints_receive_broker_traffic() {
        let (client, pubsub, dispatcher) = setup(vec![echo()]);
        dispatcher.bind(&pubsub).unwrap();
        assert_eq!(client.subscribed_filters(), vec!["+/echo".to_string()]);

        client.inject("p/echo", br#"{"message":{"n":2},"returnTopic":"back"}"#);
        let (topic, _) = client
            .wait_for_published("back", Duration::from_secs(5))
            .unwrap();
        assert_eq!(topic, "back");
        pubsub.shutdown().unwrap();
    }
}
