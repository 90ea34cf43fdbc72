//! Middleware layer.
//!
//! Middleware wraps every matched route. Each layer receives the request and
//! a [`Next`]; awaiting `next.run(req)` runs the remaining layers and then
//! the route handler. Layers run in registration order, so the first
//! [`Router::layer`](crate::Router::layer) call is the outermost.
//!
//! ```rust,no_run
//! use tsu_sentry::middleware::{self, Next};
//! use tsu_sentry::{Request, Response, Router};
//!
//! async fn stamp(req: Request, next: Next) -> Response {
//!     let mut res = next.run(req).await;
//!     res.headers_mut().insert("x-served-by", "tsu".parse().unwrap());
//!     res
//! }
//!
//! # async fn index(_: Request) -> &'static str { "" }
//! let app = Router::new()
//!     .layer(middleware::from_fn(stamp))
//!     .get("/", index);
//! ```
//!
//! Built-in layers:
//! - [`recovery::Recovery`] reports panics to a packet [`Client`](crate::packet::Client)
//!   and answers 500.
//! - [`sentry::Sentry`] gives each request its own Sentry hub and reports
//!   panics through it.

pub mod recovery;
pub mod sentry;

use std::future::Future;
use std::sync::Arc;

use crate::handler::{BoxFuture, BoxedHandler};
use crate::request::Request;
use crate::response::IntoResponse;

/// A request interceptor.
pub trait Middleware: Send + Sync + 'static {
    fn call(&self, req: Request, next: Next) -> BoxFuture;
}

pub(crate) type BoxedMiddleware = Arc<dyn Middleware>;

/// The rest of the chain: the layers after the current one, then the handler.
pub struct Next {
    stack: Arc<[BoxedMiddleware]>,
    pos: usize,
    handler: BoxedHandler,
}

impl Next {
    pub(crate) fn new(stack: Arc<[BoxedMiddleware]>, handler: BoxedHandler) -> Self {
        Self { stack, pos: 0, handler }
    }

    /// Runs the remaining layers and the route handler.
    pub fn run(self, req: Request) -> BoxFuture {
        match self.stack.get(self.pos) {
            Some(layer) => {
                let layer = Arc::clone(layer);
                let next = Next { pos: self.pos + 1, ..self };
                layer.call(req, next)
            }
            None => self.handler.call(req),
        }
    }
}

/// Adapts an `async fn(Request, Next) -> impl IntoResponse` into a [`Middleware`].
pub fn from_fn<F, Fut, R>(f: F) -> FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    FromFn(f)
}

/// Returned by [`from_fn`].
pub struct FromFn<F>(F);

impl<F, Fut, R> Middleware for FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request, next: Next) -> BoxFuture {
        let fut = (self.0)(req, next);
        Box::pin(async move { fut.await.into_response() })
    }
}
