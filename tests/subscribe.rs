//! End-to-end tests for the subscribe endpoint
//!
//! Each test drives the hub router directly and reads the SSE stream frame
//! by frame, the dispatcher running concurrently once the subscriber count
//! reaches the expected value.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use hubbub::auth::mint_token;
use hubbub::subscription::SUBSCRIPTION_TOPIC_TEMPLATE;
use hubbub::transport::RedbTransport;
use hubbub::{create_router, Event, Hub, HubConfig, Transport, TransportError, Update};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tower::ServiceExt;

const HUB_URL: &str = "/.well-known/mercure";
const SUBSCRIBER_KEY: &[u8] = b"subscriber-secret";

fn base_config() -> HubConfig {
    HubConfig {
        subscriber_jwt_key: "subscriber-secret".to_string(),
        publisher_jwt_key: "publisher-secret".to_string(),
        ..HubConfig::default()
    }
}

fn anonymous_config() -> HubConfig {
    HubConfig {
        allow_anonymous: true,
        ..base_config()
    }
}

fn subscriber_jwt(selectors: &[&str]) -> String {
    mint_token(
        SUBSCRIBER_KEY,
        Some(selectors.iter().map(|s| s.to_string()).collect()),
        None,
        Duration::from_secs(3600),
    )
    .unwrap()
}

fn update(topic: &str, id: &str, data: &str) -> Update {
    Update::new(
        vec![topic.to_string()],
        Event {
            id: id.to_string(),
            data: data.to_string(),
            ..Default::default()
        },
    )
}

fn private(mut update: Update) -> Update {
    update.private = true;
    update
}

async fn send(hub: &Arc<Hub>, request: Request<Body>) -> Response {
    create_router(hub.clone()).oneshot(request).await.unwrap()
}

async fn get(hub: &Arc<Hub>, uri: &str, token: Option<&str>) -> Response {
    let mut request = Request::builder().uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    send(hub, request.body(Body::empty()).unwrap()).await
}

async fn body_string(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Read stream frames until the accumulated body equals `expected`,
/// asserting along the way that it never diverges from the expected prefix.
async fn read_until(body: &mut Body, expected: &str) -> String {
    let mut received = String::new();
    while received != expected {
        let frame = timeout(Duration::from_secs(10), body.frame())
            .await
            .expect("timed out waiting for SSE data")
            .expect("stream ended early")
            .expect("stream errored");
        if let Some(data) = frame.data_ref() {
            received.push_str(std::str::from_utf8(data).unwrap());
        }
        assert!(
            expected.starts_with(received.as_str()),
            "received body {received:?} does not match expected {expected:?}"
        );
    }
    received
}

/// Read stream frames until every needle appears in the accumulated body.
async fn read_until_contains(body: &mut Body, needles: &[&str]) -> String {
    let mut received = String::new();
    while !needles.iter().all(|needle| received.contains(needle)) {
        let frame = timeout(Duration::from_secs(10), body.frame())
            .await
            .expect("timed out waiting for SSE data")
            .expect("stream ended early")
            .expect("stream errored");
        if let Some(data) = frame.data_ref() {
            received.push_str(std::str::from_utf8(data).unwrap());
        }
    }
    received
}

/// Dispatch the updates once the transport reports `count` subscribers.
fn dispatch_when_ready(
    hub: &Arc<Hub>,
    count: usize,
    updates: Vec<Update>,
) -> tokio::task::JoinHandle<()> {
    let hub = hub.clone();
    tokio::spawn(async move {
        while hub.transport().subscriber_count() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for update in updates {
            hub.transport().dispatch(update).await.unwrap();
        }
    })
}

async fn wait_for_subscribers(hub: &Arc<Hub>, count: usize) {
    timeout(Duration::from_secs(5), async {
        while hub.transport().subscriber_count() != count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("timed out waiting for subscriber count");
}

#[tokio::test]
async fn test_subscribe_no_topic() {
    let hub = Hub::new(anonymous_config()).unwrap();

    let response = get(&hub, HUB_URL, None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_string(response).await, "Missing \"topic\" parameter.\n");
}

#[tokio::test]
async fn test_subscribe_no_token() {
    let hub = Hub::new(base_config()).unwrap();

    let response = get(&hub, &format!("{HUB_URL}?topic=foo"), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_string(response).await, "Unauthorized\n");
}

#[tokio::test]
async fn test_subscribe_invalid_jwt_cookie() {
    let hub = Hub::new(base_config()).unwrap();

    let request = Request::builder()
        .uri(format!("{HUB_URL}?topic=foo"))
        .header(header::COOKIE, "mercureAuthorization=invalid")
        .body(Body::empty())
        .unwrap();

    let response = send(&hub, request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_string(response).await, "Unauthorized\n");
}

#[tokio::test]
async fn test_subscribe_none_alg_jwt() {
    let hub = Hub::new(base_config()).unwrap();

    // {"alg":"none"} token granting everything; must never verify.
    let token = "eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0.eyJtZXJjdXJlIjp7InN1YnNjcmliZSI6WyIqIl19fQ.";
    let response = get(&hub, &format!("{HUB_URL}?topic=foo"), Some(token)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_string(response).await, "Unauthorized\n");
}

#[tokio::test]
async fn test_subscribe_fanout() {
    let hub = Hub::new(anonymous_config()).unwrap();

    let dispatcher = dispatch_when_ready(
        &hub,
        1,
        vec![
            update("http://example.com/not-subscribed", "a", "Hello World"),
            update("http://example.com/books/1", "b", "Hello World"),
            update("http://example.com/reviews/22", "c", "Great"),
            update("http://example.com/hub?topic=faulty{iri", "d", "Faulty IRI"),
            update("string", "e", "string"),
        ],
    );

    let uri = format!(
        "{HUB_URL}?topic=http://example.com/books/1&topic=string\
         &topic=http://example.com/reviews/%7Bid%7D\
         &topic=http://example.com/hub?topic=faulty%7Biri"
    );
    let response = get(&hub, &uri, None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream; charset=utf-8"
    );
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-cache");
    assert_eq!(response.headers().get("X-Accel-Buffering").unwrap(), "no");

    let mut body = response.into_body();
    read_until(
        &mut body,
        ":\nid: b\ndata: Hello World\n\nid: c\ndata: Great\n\nid: d\ndata: Faulty IRI\n\nid: e\ndata: string\n\n",
    )
    .await;

    dispatcher.await.unwrap();
    hub.stop().await;
}

#[tokio::test]
async fn test_subscribe_private_authorization() {
    let hub = Hub::new(base_config()).unwrap();

    let dispatcher = dispatch_when_ready(
        &hub,
        1,
        vec![
            private(update("http://example.com/reviews/21", "a", "Foo")),
            private({
                let mut u = update("http://example.com/reviews/22", "b", "Hello World");
                u.event.event_type = "test".to_string();
                u
            }),
            private({
                let mut u = update("http://example.com/reviews/23", "c", "Great");
                u.event.retry = 1;
                u
            }),
        ],
    );

    let token = subscriber_jwt(&[
        "http://example.com/reviews/22",
        "http://example.com/reviews/23",
    ]);
    let request = Request::builder()
        .uri(format!(
            "{HUB_URL}?topic=http://example.com/reviews/%7Bid%7D"
        ))
        .header(header::COOKIE, format!("mercureAuthorization={token}"))
        .body(Body::empty())
        .unwrap();

    let response = send(&hub, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body();
    read_until(
        &mut body,
        ":\nevent: test\nid: b\ndata: Hello World\n\nretry: 1\nid: c\ndata: Great\n\n",
    )
    .await;

    dispatcher.await.unwrap();
    hub.stop().await;
}

#[tokio::test]
async fn test_subscribe_wildcard_authorization() {
    let hub = Hub::new(base_config()).unwrap();

    let dispatcher = dispatch_when_ready(
        &hub,
        1,
        vec![
            private(update("http://example.com/reviews/21", "a", "Foo")),
            private({
                let mut u = update("http://example.com/reviews/22", "b", "Hello World");
                u.event.event_type = "test".to_string();
                u
            }),
        ],
    );

    let token = subscriber_jwt(&["random", "*"]);
    let response = get(
        &hub,
        &format!("{HUB_URL}?topic=http://example.com/reviews/%7Bid%7D"),
        Some(&token),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body();
    read_until(
        &mut body,
        ":\nid: a\ndata: Foo\n\nevent: test\nid: b\ndata: Hello World\n\n",
    )
    .await;

    dispatcher.await.unwrap();
    hub.stop().await;
}

/// Transport rejecting every registration, for the 503 path.
struct RefusingTransport;

#[async_trait::async_trait]
impl Transport for RefusingTransport {
    async fn dispatch(&self, _update: Update) -> Result<(), TransportError> {
        Ok(())
    }

    async fn add_subscriber(
        &self,
        _subscriber: Arc<hubbub::Subscriber>,
    ) -> Result<(), TransportError> {
        Err(TransportError::Closed)
    }

    async fn remove_subscriber(&self, _subscriber: &hubbub::Subscriber) {}

    fn subscriber_count(&self) -> usize {
        0
    }

    async fn close(&self) {}
}

#[tokio::test]
async fn test_subscribe_transport_refusal() {
    let hub = Hub::with_transport(anonymous_config(), Arc::new(RefusingTransport));

    let response = get(&hub, &format!("{HUB_URL}?topic=foo"), None).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_string(response).await, "Service Unavailable\n");
}

#[tokio::test]
async fn test_subscribe_heartbeat() {
    let hub = Hub::new(HubConfig {
        heartbeat_interval: Duration::from_millis(30),
        ..anonymous_config()
    })
    .unwrap();

    let dispatcher = dispatch_when_ready(
        &hub,
        1,
        vec![update("http://example.com/books/1", "b", "Hello World")],
    );

    let uri = format!(
        "{HUB_URL}?topic=http://example.com/books/1&topic=http://example.com/reviews/%7Bid%7D"
    );
    let response = get(&hub, &uri, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body();
    read_until(&mut body, ":\nid: b\ndata: Hello World\n\n:\n").await;

    dispatcher.await.unwrap();
    hub.stop().await;
}

#[tokio::test]
async fn test_subscribe_missed_events() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(RedbTransport::new(dir.path().join("updates.db"), None).unwrap());

    transport
        .dispatch(update("http://example.com/foos/a", "a", "d1"))
        .await
        .unwrap();
    transport
        .dispatch(update("http://example.com/foos/b", "b", "d2"))
        .await
        .unwrap();

    let hub = Hub::with_transport(anonymous_config(), transport);

    // Cursor in the query string.
    let response = get(
        &hub,
        &format!("{HUB_URL}?topic=http://example.com/foos/%7Bid%7D&Last-Event-ID=a"),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body();
    read_until(&mut body, ":\nid: b\ndata: d2\n\n").await;
    drop(body);

    // Cursor in the header of the same name.
    let request = Request::builder()
        .uri(format!("{HUB_URL}?topic=http://example.com/foos/%7Bid%7D"))
        .header("Last-Event-ID", "a")
        .body(Body::empty())
        .unwrap();
    let response = send(&hub, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body();
    read_until(&mut body, ":\nid: b\ndata: d2\n\n").await;

    hub.stop().await;
}

#[tokio::test]
async fn test_last_event_id_query_wins_over_header() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(RedbTransport::new(dir.path().join("updates.db"), None).unwrap());

    transport.dispatch(update("t", "a", "d1")).await.unwrap();
    transport.dispatch(update("t", "b", "d2")).await.unwrap();
    transport.dispatch(update("t", "c", "d3")).await.unwrap();

    let hub = Hub::with_transport(anonymous_config(), transport);

    let request = Request::builder()
        .uri(format!("{HUB_URL}?topic=t&Last-Event-ID=b"))
        .header("Last-Event-ID", "a")
        .body(Body::empty())
        .unwrap();
    let response = send(&hub, request).await;

    let mut body = response.into_body();
    read_until(&mut body, ":\nid: c\ndata: d3\n\n").await;

    hub.stop().await;
}

#[tokio::test]
async fn test_subscribe_replay_then_live() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(RedbTransport::new(dir.path().join("updates.db"), None).unwrap());

    transport.dispatch(update("t", "e1", "d1")).await.unwrap();
    transport.dispatch(update("t", "e2", "d2")).await.unwrap();
    transport.dispatch(update("t", "e3", "d3")).await.unwrap();

    let hub = Hub::with_transport(anonymous_config(), transport);
    let dispatcher = dispatch_when_ready(&hub, 1, vec![update("t", "e4", "d4")]);

    let response = get(&hub, &format!("{HUB_URL}?topic=t&Last-Event-ID=e1"), None).await;
    let mut body = response.into_body();
    read_until(
        &mut body,
        ":\nid: e2\ndata: d2\n\nid: e3\ndata: d3\n\nid: e4\ndata: d4\n\n",
    )
    .await;

    dispatcher.await.unwrap();
    hub.stop().await;
}

#[tokio::test]
async fn test_subscription_events() {
    let hub = Hub::new(HubConfig {
        dispatch_subscriptions: true,
        ..base_config()
    })
    .unwrap();

    let meta_topic = format!(
        "{HUB_URL}?topic=/.well-known/mercure/subscriptions/%7BsubscriptionID%7D/%7Btopic%7D"
    );

    // Authorized to observe lifecycle events.
    let token = subscriber_jwt(&[SUBSCRIPTION_TOPIC_TEMPLATE]);
    let response = get(&hub, &meta_topic, Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let mut observer = response.into_body();
    read_until(&mut observer, ":\n").await;

    // Not authorized: subscribes to the same meta-topic with no selectors.
    let token = subscriber_jwt(&[]);
    let response = get(&hub, &meta_topic, Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let mut unauthorized = response.into_body();
    read_until(&mut unauthorized, ":\n").await;

    wait_for_subscribers(&hub, 2).await;

    // The watched subscriber: connects, then disconnects.
    let token = subscriber_jwt(&[]);
    let response = get(&hub, &format!("{HUB_URL}?topic=https://example.com"), Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let mut watched = response.into_body();
    read_until(&mut watched, ":\n").await;
    drop(watched);

    let mut received = read_until_contains(
        &mut observer,
        &[
            "data:   \"@id\": \"/.well-known/mercure/subscriptions/",
            "/https%3A%2F%2Fexample.com",
            "data:   \"@type\": \"https://mercure.rocks/Subscription\",",
            "data:   \"topic\": \"https://example.com\",",
            "data:   \"active\": true,",
            "data:   \"active\": false,",
            "data:   \"publish\": [],",
            "data:   \"subscribe\": []",
        ],
    )
    .await;

    // Drain stragglers briefly, then check the watched pair is unique:
    // exactly one connect and one disconnect event, in that order.
    while let Ok(Some(Ok(frame))) = timeout(Duration::from_millis(100), observer.frame()).await {
        if let Some(data) = frame.data_ref() {
            received.push_str(std::str::from_utf8(data).unwrap());
        }
    }
    let watched_events: Vec<&str> = received
        .split("\n\n")
        .filter(|event| event.contains("\"topic\": \"https://example.com\","))
        .collect();
    assert_eq!(watched_events.len(), 2, "events: {received}");
    assert!(watched_events[0].contains("\"active\": true,"));
    assert!(watched_events[1].contains("\"active\": false,"));

    // The unauthorized subscriber saw nothing but the preamble.
    assert!(
        timeout(Duration::from_millis(100), unauthorized.frame())
            .await
            .is_err(),
        "unauthorized subscriber must not observe lifecycle events"
    );

    hub.stop().await;
}

#[tokio::test]
async fn test_disconnect_deregisters() {
    let hub = Hub::new(anonymous_config()).unwrap();

    let response = get(&hub, &format!("{HUB_URL}?topic=foo"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(hub.transport().subscriber_count(), 1);

    let mut body = response.into_body();
    read_until(&mut body, ":\n").await;
    drop(body);

    wait_for_subscribers(&hub, 0).await;
}

#[tokio::test]
async fn test_transport_close_ends_stream() {
    let hub = Hub::new(anonymous_config()).unwrap();

    let response = get(&hub, &format!("{HUB_URL}?topic=foo"), None).await;
    let mut body = response.into_body();
    read_until(&mut body, ":\n").await;

    hub.stop().await;

    let end = timeout(Duration::from_secs(5), body.frame())
        .await
        .expect("stream did not end after transport close");
    assert!(end.is_none());
}
