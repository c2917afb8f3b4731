use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use discovery_repository::{
    DeviceDescription, Envelope, InMemoryDocumentStore, LoopbackClient, Repository,
    RepositoryConfig,
};

const WAIT: Duration = Duration::from_secs(5);

fn repository() -> (Arc<LoopbackClient>, Repository) {
    let client = Arc::new(LoopbackClient::new());
    let repo = Repository::new(
        client.clone(),
        Arc::new(InMemoryDocumentStore::new()),
        RepositoryConfig {
            service_name: "repo-e2e".to_string(),
            ..RepositoryConfig::default()
        },
    )
    .unwrap();
    repo.start();
    (client, repo)
}

fn seed(repo: &Repository) {
    let devices = [
        json!({
            "name": "SmartLamp42",
            "description": "Ceiling lamp with dimmer",
            "identifiers": {"mac_address": "AA:00:00:00:00:01"},
            "location": {"description": "Living room", "coordinates": {"lat": 48.7758, "lon": 9.1829}}
        }),
        json!({
            "name": "SmartBulb",
            "description": "Colour bulb",
            "identifiers": {"mac_address": "AA:00:00:00:00:02"},
            "location": {"description": "Kitchen", "coordinates": {"lat": 48.7800, "lon": 9.1900}}
        }),
        json!({
            "name": "Thermostat",
            "description": "Radiator thermostat",
            "identifiers": {"mac_address": "AA:00:00:00:00:03"},
            "location": {"description": "Office", "coordinates": {"lat": 52.5200, "lon": 13.4050}}
        }),
    ];
    for device in devices {
        repo.descriptions()
            .insert(DeviceDescription::from_value(device).unwrap())
            .unwrap();
    }
}

fn request(message: Value, return_topic: &str, correlation_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": "request",
        "time": 0,
        "message": message,
        "returnTopic": return_topic,
        "correlationId": correlation_id,
    }))
    .unwrap()
}

fn reply_on(client: &LoopbackClient, topic: &str) -> Envelope {
    let (_, payload) = client
        .wait_for_published(topic, WAIT)
        .unwrap_or_else(|| panic!("no reply on {topic}"));
    Envelope::decode(&payload).unwrap()
}

fn names(reply: &Envelope) -> Vec<String> {
    let mut names: Vec<String> = reply.message["deviceDescriptions"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|d| d["name"].as_str().map(str::to_string))
        .collect();
    names.sort();
    names
}

#[test]
fn test_request_reports_device_count() {
    let (client, repo) = repository();
    seed(&repo);

    client.inject(
        "platform/discovery/repo/test",
        &request(json!({}), "platform/replies/test", "t-1"),
    );
    let reply = reply_on(&client, "platform/replies/test");

    assert_eq!(reply.message_type.as_deref(), Some("repository_test_reply"));
    assert_eq!(reply.correlation_id.as_deref(), Some("t-1"));
    assert_eq!(reply.sender_name.as_deref(), Some("repo-e2e"));
    assert_eq!(reply.message, json!({"devicesCount": 3}));
    repo.shutdown().unwrap();
}

#[test]
fn name_query_returns_matching_devices() {
    let (client, repo) = repository();
    seed(&repo);

    client.inject(
        "platform/discovery/repo/query",
        &request(
            json!({
                "requirements": [{"type": "name", "match": "smart", "operator": "begins_with"}],
                "scoringCriteria": []
            }),
            "platform/replies/q1",
            "q-1",
        ),
    );
    let reply = reply_on(&client, "platform/replies/q1");

    assert_eq!(reply.message_type.as_deref(), Some("repository_test_reply"));
    assert_eq!(reply.message["referenceId"], Value::Null);
    assert_eq!(names(&reply), vec!["SmartBulb", "SmartLamp42"]);
    repo.shutdown().unwrap();
}

#[test]
fn combined_requirements_are_anded() {
    let (client, repo) = repository();
    seed(&repo);

    client.inject(
        "platform/discovery/repo/query",
        &request(
            json!({
                "requirements": [
                    {"type": "name", "match": "Smart", "operator": "contains"},
                    {"type": "name", "match": "SmartBulb", "operator": "not_equals"},
                    {"type": "unknown_type", "whatever": true}
                ]
            }),
            "platform/replies/q2",
            "q-2",
        ),
    );
    let reply = reply_on(&client, "platform/replies/q2");
    assert_eq!(names(&reply), vec!["SmartLamp42"]);
    repo.shutdown().unwrap();
}

#[test]
fn location_queries_use_geo_clauses() {
    let (client, repo) = repository();
    seed(&repo);

    client.inject(
        "platform/discovery/repo/query",
        &request(
            json!({"requirements": [{
                "type": "location",
                "operator": "in_area",
                "details": {"lat": 48.7758, "lon": 9.1829, "radius": 2000.0}
            }]}),
            "platform/replies/circle",
            "g-1",
        ),
    );
    assert_eq!(
        names(&reply_on(&client, "platform/replies/circle")),
        vec!["SmartBulb", "SmartLamp42"]
    );

    client.inject(
        "platform/discovery/repo/query",
        &request(
            json!({"requirements": [{
                "type": "location",
                "operator": "in_area",
                "details": {"polygon": [[13.0, 52.0], [14.0, 52.0], [14.0, 53.0], [13.0, 53.0]]}
            }]}),
            "platform/replies/polygon",
            "g-2",
        ),
    );
    assert_eq!(
        names(&reply_on(&client, "platform/replies/polygon")),
        vec!["Thermostat"]
    );

    client.inject(
        "platform/discovery/repo/query",
        &request(
            json!({"requirements": [{
                "type": "location",
                "operator": "described_by",
                "details": {"match": "kitchen", "operator": "equals"}
            }]}),
            "platform/replies/described",
            "g-3",
        ),
    );
    assert_eq!(
        names(&reply_on(&client, "platform/replies/described")),
        vec!["SmartBulb"]
    );
    repo.shutdown().unwrap();
}

#[test]
fn malformed_requests_get_no_reply() {
    let (client, repo) = repository();
    seed(&repo);

    client.inject("platform/discovery/repo/query", b"{not json");
    client.inject(
        "platform/discovery/repo/query",
        br#"{"message":"not an object","returnTopic":"platform/replies/bad"}"#,
    );
    // No return topic: handled, reply dropped.
    client.inject("platform/discovery/repo/test", br#"{"message":{}}"#);

    // A valid request afterwards is still served.
    client.inject(
        "platform/discovery/repo/test",
        &request(json!({}), "platform/replies/after", "a-1"),
    );
    reply_on(&client, "platform/replies/after");

    assert!(client
        .wait_for_published("platform/replies/bad", Duration::from_millis(100))
        .is_none());
    assert_eq!(client.published().len(), 1);
    repo.shutdown().unwrap();
}
