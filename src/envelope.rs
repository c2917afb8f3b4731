//! Wire envelope wrapped around every message.
//!
//! Requests carry an optional `returnTopic` and `correlationId`; replies are
//! stamped with the send time and the configured sender name and echo the
//! request's correlation id.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{TransportError, ValidationError};

/// Envelope around a domain payload.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(default)]
    pub time: i64,
    pub message: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
}

impl Envelope {
    /// Creates an outbound envelope stamped with the current time.
    #[must_use]
    pub fn new(message: Value, message_type: Option<&str>) -> Self {
        Self {
            message_type: message_type
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            time: Utc::now().timestamp_millis(),
            message,
            return_topic: None,
            correlation_id: None,
            sender_name: None,
        }
    }

    /// Decodes a raw inbound payload.
    pub fn decode(payload: &[u8]) -> Result<Self, ValidationError> {
        serde_json::from_slice(payload).map_err(|e| ValidationError::MalformedEnvelope {
            reason: e.to_string(),
        })
    }

    /// Serializes the envelope for publishing.
    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(self).map_err(|e| TransportError::SerializationFailed {
            message: e.to_string(),
        })
    }

    /// The domain payload as a JSON object.
    pub fn payload(&self) -> Result<&Map<String, Value>, ValidationError> {
        match &self.message {
            Value::Object(map) => Ok(map),
            Value::Null => Err(ValidationError::MissingField {
                field: "message".to_string(),
            }),
            other => Err(ValidationError::MalformedEnvelope {
                reason: format!("message must be a JSON object, got {other}"),
            }),
        }
    }

    /// The non-empty return topic of a request.
    #[must_use]
    pub fn return_topic(&self) -> Option<&str> {
        self.return_topic.as_deref().filter(|t| !t.is_empty())
    }

    /// The non-empty correlation id of a request.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref().filter(|c| !c.is_empty())
    }

    /// Builds the reply to this request and returns it with its destination topic.
    pub fn reply(
        &self,
        body: Value,
        message_type: Option<&str>,
        sender_name: &str,
    ) -> Result<(String, Self), ValidationError> {
        let topic = self
            .return_topic()
            .ok_or_else(|| ValidationError::MissingField {
                field: "returnTopic".to_string(),
            })?
            .to_string();

        let mut reply = Self::new(body, message_type);
        reply.sender_name = Some(sender_name.to_string());
        reply.correlation_id = self.correlation_id().map(str::to_string);
        Ok((topic, reply))
    }
}
