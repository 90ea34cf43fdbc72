//! # tsu-sentry
//!
//! Panic recovery for the tsu HTTP framework, reported to Sentry.
//!
//! Two independent layers, pick one per application:
//!
//! - [`middleware::recovery::Recovery`] turns a panic into a flat
//!   [`packet::Packet`], hands it to a [`packet::Client`] tagged with the
//!   request endpoint, and answers `500`.
//! - [`middleware::sentry::Sentry`] forks a Sentry hub per request, attaches
//!   the request to its scope, makes it available to handlers, and reports
//!   panics through it. Client disconnects (broken pipe, connection reset)
//!   are not reported. It can wait for delivery and re-raise the panic so
//!   the router's terminal recovery writes the `500`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tsu_sentry::middleware::sentry::{Options, Sentry, hub_from_request};
//! use tsu_sentry::{Request, Router, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() {
//!     let _guard = sentry::init("https://key@sentry.example.com/1");
//!
//!     let app = Router::new()
//!         .layer(Sentry::new(Options::default().repanic(true)))
//!         .get("/", index);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//!
//! async fn index(req: Request) -> StatusCode {
//!     if let Some(hub) = hub_from_request(&req) {
//!         hub.capture_message("hello from a request hub", sentry::Level::Info);
//!     }
//!     StatusCode::OK
//! }
//! ```

mod error;
mod handler;
mod request;
mod response;
mod router;
mod server;

pub mod middleware;
pub mod packet;
pub mod panic;

pub use error::Error;
pub use handler::{BoxFuture, Handler};
pub use http::{Method, StatusCode};
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
