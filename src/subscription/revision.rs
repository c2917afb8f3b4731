//! Revision notifications sent to subscribers.
//!
//! Wire shape:
//! `{"revisions":[{"referenceIds":[..],"operations":[{"type":"upsert","deviceDescriptions":[..]}]}]}`

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::DeviceDescription;

/// A single change applied to the result sets of the referenced subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RevisionOperation {
    /// Add or replace the given documents.
    Upsert {
        /// Documents to add or replace, matched by MAC address.
        #[serde(rename = "deviceDescriptions")]
        device_descriptions: Vec<DeviceDescription>,
    },
    /// Remove the documents with the given MAC addresses.
    Delete {
        /// MAC addresses of the removed devices.
        #[serde(rename = "macAddresses")]
        mac_addresses: Vec<String>,
    },
    /// Replace the whole result set.
    Replace {
        /// The new result set.
        #[serde(rename = "deviceDescriptions")]
        device_descriptions: Vec<DeviceDescription>,
    },
}

/// Operations that apply to a set of subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    /// Subscriptions whose results the operations change.
    pub reference_ids: BTreeSet<String>,
    /// Applied in order.
    pub operations: Vec<RevisionOperation>,
}

/// Body of a `query_reply` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionMessage {
    #[allow(missing_docs)]
    pub revisions: Vec<Revision>,
}

impl RevisionMessage {
    /// A message carrying one revision.
    #[must_use]
    pub fn single(reference_ids: BTreeSet<String>, operation: RevisionOperation) -> Self {
        Self {
            revisions: vec![Revision {
                reference_ids,
                operations: vec![operation],
            }],
        }
    }

    /// Serializes the message body.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A revision message addressed to a notification topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Notification topic shared by the referenced subscriptions.
    pub topic: String,
    #[allow(missing_docs)]
    pub message: RevisionMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_wire_shape() {
        let ids: BTreeSet<String> = ["b", "a"].iter().map(|s| (*s).to_string()).collect();
        let msg = RevisionMessage::single(
            ids,
            RevisionOperation::Delete {
                mac_addresses: vec!["AA:BB".to_string()],
            },
        );

        assert_eq!(
            msg.to_value(),
            json!({"revisions": [{
                "referenceIds": ["a", "b"],
                "operations": [{"type": "delete", "macAddresses": ["AA:BB"]}]
            }]})
        );
    }

    #[test]
    fn replace_with_empty_list() {
        let msg = RevisionMessage::single(
            BTreeSet::from(["r1".to_string()]),
            RevisionOperation::Replace {
                device_descriptions: Vec::new(),
            },
        );
        let op = &msg.to_value()["revisions"][0]["operations"][0];
        assert_eq!(op, &json!({"type": "replace", "deviceDescriptions": []}));
    }

    #[test]
    fn parses_upsert() {
        let raw = json!({"revisions": [{
            "referenceIds": ["r1"],
            "operations": [{"type": "upsert", "deviceDescriptions": [{"name": "Lamp"}]}]
        }]});
        let msg: RevisionMessage = serde_json::from_value(raw).unwrap();
        match &msg.revisions[0].operations[0] {
            RevisionOperation::Upsert { device_descriptions } => {
                assert_eq!(device_descriptions[0].name(), Some("Lamp"));
            }
            other => panic!("unexpected operation {other:?}"),
        }
    }
}
