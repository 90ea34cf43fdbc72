//! Hub-aware recovery in a small app.
//!
//! Run with:
//!   SENTRY_DSN=https://key@o0.ingest.sentry.io/0 RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/
//!   curl http://localhost:3000/query?unwanted=1
//!   curl http://localhost:3000/explode

use std::sync::Arc;

use sentry::Hub;
use tsu_sentry::middleware::sentry::{Options, Sentry, hub_from_request};
use tsu_sentry::{Request, Router, Server, StatusCode};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    // Reads SENTRY_DSN; without it the SDK stays disabled and the app still runs.
    let _guard = sentry::init(sentry::ClientOptions {
        release: sentry::release_name!(),
        ..Default::default()
    });

    let app = Router::new()
        .layer(Sentry::new(Options::default().repanic(true)))
        .get("/", index)
        .get("/query", query)
        .get("/scoped", scoped)
        .get("/explode", explode);

    Server::bind("0.0.0.0:3000")
        .serve(app)
        .await
        .expect("server error");
}

async fn index(_req: Request) -> &'static str {
    "Hello world!"
}

// Report something odd without failing the request.
async fn query(req: Request) -> StatusCode {
    if let Some(hub) = hub_from_request(&req) {
        hub.with_scope(
            |scope| scope.set_extra("unwantedQuery", req.uri().query().unwrap_or_default().into()),
            || hub.capture_message("User provided unwanted query string, but we recovered just fine", sentry::Level::Info),
        );
    }
    StatusCode::OK
}

// Same as `query`, fetching the hub by type.
async fn scoped(req: Request) -> StatusCode {
    if let Some(hub) = req.get::<Arc<Hub>>() {
        hub.with_scope(
            |scope| scope.set_extra("unwantedQuery", "someQueryDataMaybe".into()),
            || hub.capture_message("User provided unwanted query string, but we recovered just fine", sentry::Level::Info),
        );
    }
    StatusCode::OK
}

// Reported through the request hub, then re-raised; the router answers 500.
async fn explode(_req: Request) -> StatusCode {
    panic!("boom")
}
