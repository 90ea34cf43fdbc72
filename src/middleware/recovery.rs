//! Packet-reporting panic recovery.
//!
//! [`Recovery`] catches any panic raised further down the chain, logs the
//! stack, submits a [`Packet`] to its [`Client`] tagged with the request's
//! endpoint, and answers `500 Internal Server Error`. The panic never leaves
//! this layer.

use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use http::StatusCode;
use tracing::error;

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::packet::{Client, Packet, PacketException, Tags, capture_stacktrace};
use crate::panic::panic_message;
use crate::request::Request;
use crate::response::Response;

/// Innermost frames dropped from a packet's stack trace. Tied to the depth
/// of `capture_stacktrace` below the recovery site; revisit if it changes.
const STACK_SKIP: usize = 2;
/// Source lines recorded on each side of every stack frame.
const STACK_CONTEXT_LINES: usize = 3;

/// Recovers panics and reports them as packets.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tsu_sentry::Router;
/// use tsu_sentry::middleware::recovery::Recovery;
///
/// let client = Arc::new(sentry::Client::from(sentry::ClientOptions::default()));
/// let app = Router::new().layer(Recovery::new(client));
/// ```
pub struct Recovery<C> {
    client: Arc<C>,
}

impl<C: Client> Recovery<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }
}

impl<C: Client> Middleware for Recovery<C> {
    fn call(&self, req: Request, next: Next) -> BoxFuture {
        let client = Arc::clone(&self.client);
        let endpoint = req.path_and_query().to_owned();

        Box::pin(async move {
            let payload = match AssertUnwindSafe(next.run(req)).catch_unwind().await {
                Ok(response) => return response,
                Err(payload) => payload,
            };

            let backtrace = Backtrace::force_capture();
            error!(endpoint = %endpoint, "recovered from panic\n{backtrace}");

            let message = panic_message(payload.as_ref());
            let stacktrace = capture_stacktrace(STACK_SKIP, STACK_CONTEXT_LINES);
            let packet = Packet::new(message.clone(), PacketException::new(message, stacktrace));

            let mut tags = Tags::new();
            tags.insert("endpoint".to_owned(), endpoint);
            client.capture(packet, tags);

            Response::status(StatusCode::INTERNAL_SERVER_ERROR)
        })
    }
}
