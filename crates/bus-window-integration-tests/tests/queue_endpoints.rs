//! Integration tests for the queue endpoints over the in-memory broker.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::{
    body_bytes, body_text, boundary_of, delete, get, parse_multipart, post, queue_scope, TestBus,
    HOST, PAGE_SIZE,
};
use futures::StreamExt;
use tower::ServiceExt;

// ============================================================================
// Listing
// ============================================================================

#[tokio::test]
async fn test_listing_spans_pages_in_order() {
    let bus = TestBus::new();
    let total = PAGE_SIZE as usize * 2 + 1;
    for i in 0..total {
        bus.seed("orders", "text/plain", &format!("message {}", i));
    }

    let response = bus.router().oneshot(get("/queue/orders")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let boundary = boundary_of(&response);
    let parts = parse_multipart(&body_text(response).await, &boundary);

    let bodies: Vec<String> = parts.iter().map(|p| p.body.clone()).collect();
    let expected: Vec<String> = (0..total).map(|i| format!("message {}", i)).collect();
    assert_eq!(bodies, expected);
}

#[tokio::test]
async fn test_listing_keeps_each_content_type() {
    let bus = TestBus::new();
    bus.seed("orders", "text/plain", "plain");
    bus.seed("orders", "application/json", r#"{"n":1}"#);

    let response = bus.router().oneshot(get("/queue/orders")).await.unwrap();

    let boundary = boundary_of(&response);
    let parts = parse_multipart(&body_text(response).await, &boundary);
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].content_type, "text/plain");
    assert_eq!(parts[1].content_type, "application/json");
    assert_eq!(parts[1].body, r#"{"n":1}"#);
}

#[tokio::test]
async fn test_listing_does_not_remove_messages() {
    let bus = TestBus::new();
    bus.seed("orders", "text/plain", "one");
    bus.seed("orders", "text/plain", "two");

    let response = bus.router().oneshot(get("/queue/orders")).await.unwrap();
    body_bytes(response).await;

    assert_eq!(bus.count(&queue_scope("orders")), 2);
}

#[tokio::test]
async fn test_empty_queue_lists_no_parts() {
    let bus = TestBus::new();

    let response = bus.router().oneshot(get("/queue/idle")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let boundary = boundary_of(&response);
    let body = body_text(response).await;
    assert_eq!(body, format!("--{}--\r\n", boundary));
}

#[tokio::test]
async fn test_unknown_queue_is_404_without_multipart_body() {
    let bus = TestBus::new();

    let response = bus.router().oneshot(get("/queue/nowhere")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
    assert!(!content_type.to_str().unwrap().starts_with("multipart/"));
    let body = body_text(response).await;
    assert!(!body.contains("--boundary_"));
}

#[tokio::test]
async fn test_links_list_every_message() {
    let bus = TestBus::new();
    let ids: Vec<String> = (0..PAGE_SIZE + 1)
        .map(|i| bus.seed("orders", "text/plain", &i.to_string()))
        .collect();

    let response = bus.router().oneshot(get("/queue/orders/ids")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let links: Vec<String> = serde_json::from_slice(&body_bytes(response).await).unwrap();
    let expected: Vec<String> = ids
        .iter()
        .map(|id| format!("http://{}/queue/orders/{}", HOST, id))
        .collect();
    assert_eq!(links, expected);
}

#[tokio::test]
async fn test_dropping_listing_body_releases_the_receiver() {
    let bus = TestBus::new();
    for i in 0..PAGE_SIZE * 2 {
        bus.seed("orders", "text/plain", &format!("message {}", i));
    }

    let response = bus.router().oneshot(get("/queue/orders")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.unwrap().unwrap();
    assert!(!first.is_empty());
    assert_eq!(bus.provider.open_links(), 1);

    drop(body);

    assert_eq!(bus.provider.open_links(), 0);
    assert_eq!(bus.count(&queue_scope("orders")), PAGE_SIZE as usize * 2);
}

#[tokio::test]
async fn test_unknown_queue_leaves_no_open_links() {
    let bus = TestBus::new();

    let listing = bus.router().oneshot(get("/queue/nowhere")).await.unwrap();
    let links = bus.router().oneshot(get("/queue/nowhere/ids")).await.unwrap();
    let single = bus.router().oneshot(get("/queue/nowhere/m-1")).await.unwrap();
    let removal = bus.router().oneshot(delete("/queue/nowhere/m-1")).await.unwrap();

    for response in [listing, links, single, removal] {
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
    assert_eq!(bus.provider.open_links(), 0);
}

#[tokio::test]
async fn test_links_with_malformed_host_is_400() {
    let bus = TestBus::new();
    bus.seed("orders", "text/plain", "one");
    let request = Request::builder()
        .uri("/queue/orders/ids")
        .header(header::HOST, "evil.example/steal?x=")
        .body(Body::empty())
        .unwrap();

    let response = bus.router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_links_for_empty_queue_is_empty_array() {
    let bus = TestBus::new();

    let response = bus.router().oneshot(get("/queue/idle/ids")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "[]");
}

#[tokio::test]
async fn test_links_without_host_is_400() {
    let bus = TestBus::new();
    let request = Request::builder()
        .uri("/queue/orders/ids")
        .body(Body::empty())
        .unwrap();

    let response = bus.router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "No host was provided.");
}

// ============================================================================
// Single message
// ============================================================================

#[tokio::test]
async fn test_get_message_by_id() {
    let bus = TestBus::new();
    bus.seed("orders", "text/plain", "first");
    let id = bus.seed_with_subject("orders", "application/json", "order.created", "{}");

    let response = bus
        .router()
        .oneshot(get(&format!("/queue/orders/{}", id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(response.headers().get("subject").unwrap(), "order.created");
    assert_eq!(body_text(response).await, "{}");
}

#[tokio::test]
async fn test_get_unknown_message_is_404() {
    let bus = TestBus::new();
    bus.seed("orders", "text/plain", "first");

    let response = bus
        .router()
        .oneshot(get("/queue/orders/not-a-message"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_removes_only_that_message() {
    let bus = TestBus::new();
    let ids: Vec<String> = (0..PAGE_SIZE * 2)
        .map(|i| bus.seed("orders", "text/plain", &i.to_string()))
        .collect();
    let target = &ids[PAGE_SIZE as usize + 1];

    let response = bus
        .router()
        .oneshot(delete(&format!("/queue/orders/{}", target)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(bus.count(&queue_scope("orders")), ids.len() - 1);

    let response = bus
        .router()
        .oneshot(get(&format!("/queue/orders/{}", target)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = bus
        .router()
        .oneshot(get(&format!("/queue/orders/{}", ids[0])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_delete_twice_is_404() {
    let bus = TestBus::new();
    let id = bus.seed("orders", "text/plain", "once");
    let uri = format!("/queue/orders/{}", id);

    let first = bus.router().oneshot(delete(&uri)).await.unwrap();
    let second = bus.router().oneshot(delete(&uri)).await.unwrap();

    assert_eq!(first.status(), StatusCode::NO_CONTENT);
    assert_eq!(second.status(), StatusCode::NOT_FOUND);
    assert_eq!(bus.count(&queue_scope("orders")), 0);
}

#[tokio::test]
async fn test_delete_leaves_no_open_links() {
    let bus = TestBus::new();
    let id = bus.seed("orders", "text/plain", "once");

    let response = bus
        .router()
        .oneshot(delete(&format!("/queue/orders/{}", id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(bus.provider.open_links(), 0);
}

// ============================================================================
// Sending
// ============================================================================

#[tokio::test]
async fn test_send_then_list() {
    let bus = TestBus::new();
    let mut request = post("/queue/orders", "application/xml", "<order/>");
    request
        .headers_mut()
        .insert("subject", "order.created".parse().unwrap());

    let response = bus.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = bus.router().oneshot(get("/queue/orders")).await.unwrap();
    let boundary = boundary_of(&response);
    let parts = parse_multipart(&body_text(response).await, &boundary);
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].content_type, "application/xml");
    assert_eq!(parts[0].body, "<order/>");
}

#[tokio::test]
async fn test_send_without_content_type_is_400() {
    let bus = TestBus::new();
    let request = Request::builder()
        .method("POST")
        .uri("/queue/orders")
        .header(header::HOST, HOST)
        .body(Body::from("payload"))
        .unwrap();

    let response = bus.router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "No content type was provided.");
    assert_eq!(bus.count(&queue_scope("orders")), 0);
}

#[tokio::test]
async fn test_send_shorter_than_declared_sends_what_arrived() {
    let bus = TestBus::new();
    let request = Request::builder()
        .method("POST")
        .uri("/queue/orders")
        .header(header::HOST, HOST)
        .header(header::CONTENT_TYPE, "text/plain")
        .header(header::CONTENT_LENGTH, "40")
        .body(Body::from("short"))
        .unwrap();

    let response = bus.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = bus.router().oneshot(get("/queue/orders")).await.unwrap();
    let boundary = boundary_of(&response);
    let parts = parse_multipart(&body_text(response).await, &boundary);
    assert_eq!(parts[0].body, "short");
}

#[tokio::test]
async fn test_send_longer_than_declared_is_rejected() {
    let bus = TestBus::new();
    let request = Request::builder()
        .method("POST")
        .uri("/queue/orders")
        .header(header::HOST, HOST)
        .header(header::CONTENT_TYPE, "text/plain")
        .header(header::CONTENT_LENGTH, "4")
        .body(Body::from("much longer than four"))
        .unwrap();

    let response = bus.router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(bus.count(&queue_scope("orders")), 0);
}

#[tokio::test]
async fn test_send_over_max_body_size_is_rejected() {
    let bus = TestBus::new();
    let body = "x".repeat(bus.config.server.max_body_size + 1);

    let response = bus
        .router()
        .oneshot(post("/queue/orders", "text/plain", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(bus.count(&queue_scope("orders")), 0);
}

#[tokio::test]
async fn test_send_to_unknown_queue_is_404() {
    let bus = TestBus::new();

    let response = bus
        .router()
        .oneshot(post("/queue/nowhere", "text/plain", "lost"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
