//! Discovery request endpoints: test, query and cancel.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::descriptions::DeviceDescriptionService;
use crate::error::{RepositoryResult, ValidationError};
use crate::subscription::Subscription;
use crate::topic::{TopicFilter, CANCEL_TOPIC, QUERY_TOPIC, TEST_TOPIC};

use super::dispatcher::Endpoint;

/// Reply type of test and query requests.
pub const TEST_REPLY_TYPE: &str = "repository_test_reply";

/// Builds the endpoint table of the discovery repository.
pub fn discovery_endpoints(
    descriptions: &DeviceDescriptionService,
) -> Result<Vec<Endpoint>, ValidationError> {
    let test = descriptions.clone();
    let query = descriptions.clone();
    let cancel = descriptions.clone();

    Ok(vec![
        Endpoint::new(
            "test",
            TopicFilter::parse(TEST_TOPIC)?,
            Some(TEST_REPLY_TYPE),
            Arc::new(move |_topic: &str, _body: &Map<String, Value>| handle_test(&test)),
        ),
        Endpoint::new(
            "query",
            TopicFilter::parse(QUERY_TOPIC)?,
            Some(TEST_REPLY_TYPE),
            Arc::new(move |_topic: &str, body: &Map<String, Value>| handle_query(&query, body)),
        ),
        Endpoint::new(
            "cancel",
            TopicFilter::parse(CANCEL_TOPIC)?,
            None,
            Arc::new(move |_topic: &str, body: &Map<String, Value>| handle_cancel(&cancel, body)),
        ),
    ])
}

fn handle_test(descriptions: &DeviceDescriptionService) -> RepositoryResult<Option<Value>> {
    let count = descriptions.count()?;
    Ok(Some(json!({ "devicesCount": count })))
}

/// Where standing notifications for a query go.
#[derive(Debug, Default, PartialEq, Eq)]
struct SubscriptionTarget {
    reference_id: Option<String>,
    notification_topic: Option<String>,
}

impl SubscriptionTarget {
    /// Reads the flat `notificationTopic`/`referenceId` fields or the nested
    /// `subscription {returnTopic, referenceId}` object.
    fn from_request(body: &Map<String, Value>) -> Self {
        let text = |map: &Map<String, Value>, key: &str| {
            map.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        if let Some(nested) = body.get("subscription").and_then(Value::as_object) {
            return Self {
                reference_id: text(nested, "referenceId").or_else(|| text(body, "referenceId")),
                notification_topic: text(nested, "returnTopic"),
            };
        }
        Self {
            reference_id: text(body, "referenceId"),
            notification_topic: text(body, "notificationTopic"),
        }
    }
}

fn array_field(body: &Map<String, Value>, key: &str) -> Vec<Value> {
    body.get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn handle_query(
    descriptions: &DeviceDescriptionService,
    body: &Map<String, Value>,
) -> RepositoryResult<Option<Value>> {
    let requirements = array_field(body, "requirements");
    let scoring_criteria = array_field(body, "scoringCriteria");
    let target = SubscriptionTarget::from_request(body);

    let filter = descriptions.compiler().compile(&requirements);
    let result = descriptions.search(&filter);
    debug!(
        requirements = requirements.len(),
        hits = result.len(),
        reference_id = target.reference_id.as_deref(),
        "query executed"
    );

    let reply = json!({
        "referenceId": target.reference_id,
        "deviceDescriptions": result,
    });

    match (target.reference_id, target.notification_topic) {
        (Some(reference_id), Some(topic)) => {
            let subscription = Subscription::new(
                reference_id,
                topic,
                requirements,
                scoring_criteria,
                filter,
                result,
            )?;
            info!(
                reference_id = subscription.reference_id(),
                topic = subscription.notification_topic(),
                "subscription registered"
            );
            descriptions.subscriptions().register(subscription)?;
        }
        (None, Some(topic)) => {
            warn!(topic = %topic, "notification topic without reference id, no subscription created");
        }
        _ => {}
    }

    Ok(Some(reply))
}

fn handle_cancel(
    descriptions: &DeviceDescriptionService,
    body: &Map<String, Value>,
) -> RepositoryResult<Option<Value>> {
    let mut reference_ids: Vec<&str> = body
        .get("referenceIds")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if let Some(legacy) = body.get("referenceId").and_then(Value::as_str) {
        reference_ids.push(legacy);
    }

    for reference_id in reference_ids.into_iter().filter(|id| !id.is_empty()) {
        if descriptions.subscriptions().unregister(reference_id)? {
            info!(reference_id, "subscription cancelled");
        } else {
            debug!(reference_id, "cancel for unknown subscription");
        }
    }
    Ok(None)
}
