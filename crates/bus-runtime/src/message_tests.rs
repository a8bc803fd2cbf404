//! Tests for message types.

use super::*;
use chrono::Utc;
use std::collections::BTreeSet;

// ============================================================================
// Identifier Tests
// ============================================================================

#[test]
fn test_identifier_round_trip() {
    for value in ["orders", "Orders", " padded ", "a/b", "ids", "ünïcödé", "x"] {
        let name: QueueOrTopicName = value.parse().unwrap();
        assert_eq!(name.to_string(), value);
        assert_eq!(name.as_str(), value);

        let id: MessageId = value.parse().unwrap();
        assert_eq!(id.to_string(), value);
    }
}

#[test]
fn test_identifier_rejects_blank_values() {
    for value in ["", " ", "\t", "\r\n  "] {
        let error = value.parse::<MessageId>().unwrap_err();
        assert_eq!(error.to_string(), "String is not a valid MessageId.");

        let error = SubscriptionName::new(value).unwrap_err();
        assert_eq!(error.type_name(), "SubscriptionName");

        assert!(QueueOrTopicName::try_from(value.to_string()).is_err());
    }
}

#[test]
fn test_identifier_comparison_is_case_sensitive() {
    let lower = QueueOrTopicName::new("orders").unwrap();
    let upper = QueueOrTopicName::new("ORDERS").unwrap();
    assert_ne!(lower, upper);

    let ordered: BTreeSet<_> = ["b", "B", "a"]
        .into_iter()
        .map(|s| MessageId::new(s).unwrap())
        .collect();
    let rendered: Vec<_> = ordered.iter().map(|id| id.as_str()).collect();
    assert_eq!(rendered, vec!["B", "a", "b"]);
}

#[test]
fn test_identifier_serde_validates() {
    let id: MessageId = serde_json::from_str("\"abc\"").unwrap();
    assert_eq!(id.as_str(), "abc");
    assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");

    assert!(serde_json::from_str::<MessageId>("\"  \"").is_err());
}

// ============================================================================
// Scope Tests
// ============================================================================

#[test]
fn test_scope_entity_path() {
    let queue = Scope::queue(QueueOrTopicName::new("orders").unwrap());
    assert_eq!(queue.entity_path(), "orders");
    assert_eq!(queue.entity_name().as_str(), "orders");
    assert!(queue.subscription_name().is_none());

    let subscription = Scope::subscription(
        QueueOrTopicName::new("events").unwrap(),
        SubscriptionName::new("audit").unwrap(),
    );
    assert_eq!(subscription.entity_path(), "events/Subscriptions/audit");
    assert_eq!(subscription.to_string(), "events/Subscriptions/audit");
    assert_eq!(subscription.entity_name().as_str(), "events");
    assert_eq!(
        subscription.subscription_name().map(|s| s.as_str()),
        Some("audit")
    );
}

// ============================================================================
// Timestamp Tests
// ============================================================================

#[test]
fn test_timestamp_after() {
    let soon = Timestamp::after(std::time::Duration::from_secs(300));
    assert!(!soon.has_passed());
    assert!(soon.as_datetime() > Utc::now() + chrono::Duration::minutes(4));

    let past = Timestamp::from_datetime(Utc::now() - chrono::Duration::seconds(1));
    assert!(past.has_passed());
}

#[test]
fn test_timestamp_after_saturates() {
    let far = Timestamp::after(std::time::Duration::MAX);
    assert!(!far.has_passed());
}

// ============================================================================
// Message Tests
// ============================================================================

fn broker_message(id: &str) -> BrokerMessage {
    BrokerMessage {
        message_id: id.to_string(),
        content_type: Some("text/plain".to_string()),
        subject: Some("greeting".to_string()),
        body: Bytes::from_static(b"hello"),
        sequence_number: 42,
        enqueued_at: Timestamp::now(),
        delivery_count: 0,
    }
}

#[test]
fn test_outgoing_message_builder() {
    let message = OutgoingMessage::new("application/json", "{}").with_subject("created");

    assert_eq!(message.content_type, "application/json");
    assert_eq!(message.subject.as_deref(), Some("created"));
    assert_eq!(message.body, Bytes::from_static(b"{}"));
}

#[test]
fn test_queue_message_projection() {
    let message = QueueMessage::try_from(broker_message("m-1")).unwrap();

    assert_eq!(message.id().as_str(), "m-1");
    assert_eq!(message.content_type(), Some("text/plain"));
    assert_eq!(message.subject(), Some("greeting"));
    assert_eq!(message.body().as_ref(), b"hello");
    assert_eq!(message.sequence_number(), 42);
}

#[test]
fn test_queue_message_rejects_blank_broker_id() {
    let error = QueueMessage::try_from(broker_message("")).unwrap_err();
    assert_eq!(error.type_name(), "MessageId");
}
