//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup. Middleware registered
//! with [`Router::layer`] wraps every matched route. Whatever panic escapes
//! the middleware stack is caught here, logged, and answered with a bare 500
//! so a single failing request never takes its connection task down.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use http::{Method, StatusCode};
use http_body_util::Full;
use matchit::Router as MatchitRouter;
use tracing::error;

use crate::handler::{BoxedHandler, Handler};
use crate::middleware::{BoxedMiddleware, Middleware, Next};
use crate::panic::panic_message;
use crate::request::Request;
use crate::response::Response;

/// The application router.
///
/// Build it once at startup and pass it to [`Server::serve`](crate::Server::serve).
/// Every builder method returns `self` so registrations chain naturally.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
    layers: Arc<[BoxedMiddleware]>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new(), layers: Arc::new([]) }
    }

    /// Register a handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them.
    ///
    /// # Panics
    ///
    /// Panics if `path` is malformed or conflicts with an existing route.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PUT, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, path, handler)
    }

    /// Appends a middleware. The first layer registered is the outermost.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        let mut layers = self.layers.to_vec();
        layers.push(Arc::new(middleware));
        self.layers = layers.into();
        self
    }

    /// Routes one buffered request through the middleware stack and its
    /// handler. Unmatched requests get a 404 without running middleware.
    pub async fn handle(&self, req: http::Request<Bytes>) -> http::Response<Full<Bytes>> {
        let Some((handler, params)) = self.lookup(req.method(), req.uri().path()) else {
            return Response::status(StatusCode::NOT_FOUND).into_inner();
        };

        let path = req.uri().path().to_owned();
        let next = Next::new(Arc::clone(&self.layers), handler);
        let response = match AssertUnwindSafe(next.run(Request::new(req, params)))
            .catch_unwind()
            .await
        {
            Ok(response) => response,
            Err(payload) => {
                error!(path = %path, panic = %panic_message(payload.as_ref()), "unrecovered panic in handler");
                Response::status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        };

        response.into_inner()
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::from_fn;
    use http_body_util::BodyExt;

    fn get(uri: &str) -> http::Request<Bytes> {
        http::Request::get(uri).body(Bytes::new()).unwrap()
    }

    async fn body(res: http::Response<Full<Bytes>>) -> Bytes {
        res.into_body().collect().await.unwrap().to_bytes()
    }

    async fn echo_id(req: Request) -> String {
        req.param("id").unwrap_or_default().to_owned()
    }

    async fn explode(_req: Request) -> Response {
        panic!("handler exploded")
    }

    #[tokio::test]
    async fn routes_by_method_and_path() {
        let app = Router::new().get("/users/{id}", echo_id);

        let res = app.handle(get("/users/42")).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body(res).await, "42");

        let res = app.handle(get("/nope")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let post = http::Request::post("/users/42").body(Bytes::new()).unwrap();
        assert_eq!(app.handle(post).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn layers_run_outermost_first() {
        async fn outer(mut req: Request, next: Next) -> Response {
            req.insert(vec!["outer"]);
            next.run(req).await
        }
        async fn inner(mut req: Request, next: Next) -> Response {
            let mut seen = req.get::<Vec<&'static str>>().cloned().unwrap_or_default();
            seen.push("inner");
            req.insert(seen);
            next.run(req).await
        }
        async fn report(req: Request) -> String {
            req.get::<Vec<&'static str>>().map(|v| v.join(",")).unwrap_or_default()
        }

        let app = Router::new()
            .layer(from_fn(outer))
            .layer(from_fn(inner))
            .get("/", report);

        assert_eq!(body(app.handle(get("/")).await).await, "outer,inner");
    }

    #[tokio::test]
    async fn escaped_panics_become_500() {
        let app = Router::new().get("/", explode);
        let res = app.handle(get("/")).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body(res).await.is_empty());
    }
}
