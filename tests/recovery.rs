use std::io;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use sentry::test::TestTransport;
use tsu_sentry::middleware::recovery::Recovery;
use tsu_sentry::packet::{Client, Packet, Tags};
use tsu_sentry::{Request, Router, StatusCode};

#[derive(Default)]
struct RecordingClient {
    captured: Mutex<Vec<(Packet, Tags)>>,
}

impl Client for RecordingClient {
    fn capture(&self, packet: Packet, tags: Tags) {
        self.captured.lock().unwrap().push((packet, tags));
    }
}

fn get(uri: &str) -> http::Request<Bytes> {
    http::Request::get(uri).body(Bytes::new()).unwrap()
}

async fn boom(_req: Request) -> StatusCode {
    panic!("boom")
}

async fn fine(_req: Request) -> &'static str {
    "fine"
}

async fn io_failure(_req: Request) -> StatusCode {
    std::panic::panic_any(io::Error::from(io::ErrorKind::BrokenPipe))
}

fn app(client: Arc<RecordingClient>) -> Router {
    Router::new()
        .layer(Recovery::new(client))
        .get("/explode", boom)
        .get("/fine", fine)
        .get("/pipe", io_failure)
}

#[tokio::test]
async fn panic_yields_500_and_one_packet() {
    let client = Arc::new(RecordingClient::default());
    let app = app(Arc::clone(&client));

    let res = app.handle(get("/explode?id=7")).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let captured = client.captured.lock().unwrap();
    assert_eq!(captured.len(), 1);
    let (packet, tags) = &captured[0];
    assert_eq!(packet.message, "boom");
    assert_eq!(packet.exception.value, "boom");
    assert!(packet.exception.stacktrace.as_ref().is_some_and(|s| !s.frames.is_empty()));
    assert_eq!(tags.get("endpoint").map(String::as_str), Some("/explode?id=7"));
}

#[tokio::test]
async fn healthy_requests_are_untouched() {
    let client = Arc::new(RecordingClient::default());
    let app = app(Arc::clone(&client));

    let res = app.handle(get("/fine")).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(client.captured.lock().unwrap().is_empty());
}

#[tokio::test]
async fn disconnects_are_still_reported() {
    // Only the hub-aware layer filters broken pipes.
    let client = Arc::new(RecordingClient::default());
    let app = app(Arc::clone(&client));

    let res = app.handle(get("/pipe")).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(client.captured.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn sentry_client_receives_tagged_event() {
    let transport = TestTransport::new();
    let client = Arc::new(sentry::Client::from(sentry::ClientOptions {
        dsn: "https://public@sentry.invalid/1".parse().ok(),
        transport: Some(Arc::new(transport.clone())),
        ..Default::default()
    }));
    let app = Router::new().layer(Recovery::new(client)).get("/explode", boom);

    let res = app.handle(get("/explode")).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let events = transport.fetch_and_clear_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message.as_deref(), Some("boom"));
    assert_eq!(events[0].tags.get("endpoint").map(String::as_str), Some("/explode"));
    assert_eq!(events[0].exception.values[0].value.as_deref(), Some("boom"));
}
