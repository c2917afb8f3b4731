//! Outbound message publishing.

use serde_json::Value;
use tracing::debug;

use crate::descriptions::NotificationSink;
use crate::envelope::Envelope;
use crate::error::{RepositoryResult, ValidationError};
use crate::subscription::Notification;
use crate::transport::PubSubService;

/// Message type of revision notifications sent to notification topics.
pub const QUERY_REPLY_TYPE: &str = "query_reply";

/// Wraps domain payloads into envelopes and publishes them.
#[derive(Debug, Clone)]
pub struct MessageService {
    pubsub: PubSubService,
    sender_name: String,
}

impl MessageService {
    /// `sender_name` is stamped on every reply.
    #[must_use]
    pub fn new(pubsub: PubSubService, sender_name: impl Into<String>) -> Self {
        Self {
            pubsub,
            sender_name: sender_name.into(),
        }
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn sender_name(&self) -> &str {
        &self.sender_name
    }

    /// Publishes `body` under `topic`, tagged with `message_type` when given.
    pub fn publish_message(
        &self,
        topic: &str,
        body: Value,
        message_type: Option<&str>,
    ) -> RepositoryResult<()> {
        if topic.is_empty() {
            return Err(ValidationError::EmptyField {
                field: "topic".to_string(),
            }
            .into());
        }
        if body.is_null() {
            return Err(ValidationError::MissingField {
                field: "message".to_string(),
            }
            .into());
        }

        let envelope = Envelope::new(body, message_type);
        self.pubsub.publish(topic, &envelope.encode()?)?;
        debug!(topic, message_type, "message published");
        Ok(())
    }

    /// Publishes `body` as the reply to `request`, addressed to the request's
    /// return topic and carrying its correlation id.
    pub fn publish_reply(
        &self,
        body: Value,
        request: &Envelope,
        message_type: Option<&str>,
    ) -> RepositoryResult<String> {
        if body.is_null() {
            return Err(ValidationError::MissingField {
                field: "message".to_string(),
            }
            .into());
        }

        let (topic, reply) = request.reply(body, message_type, &self.sender_name)?;
        self.pubsub.publish(&topic, &reply.encode()?)?;
        debug!(topic = %topic, message_type, "reply published");
        Ok(topic)
    }
}

impl NotificationSink for MessageService {
    fn notify(&self, notification: &Notification) -> RepositoryResult<()> {
        self.publish_message(
            &notification.topic,
            notification.message.to_value(),
            Some(QUERY_REPLY_TYPE),
        )
    }
}
