//! Per-request Sentry hubs and panic reporting.
//!
//! [`Sentry`] gives every request its own [`Hub`], forked from a parent hub
//! (or reused if an earlier layer already attached one), so scope data set
//! while handling one request never leaks into another. The hub is:
//!
//! - annotated with the request, so every event it captures carries the
//!   URL, method, headers and query string;
//! - stored on the request, where handlers fetch it with
//!   [`hub_from_request`] or `req.get::<Arc<Hub>>()`;
//! - bound as the current hub while the rest of the chain runs, so plain
//!   `sentry::capture_message` calls inside handlers land on it too.
//!
//! If the chain panics, the panic is reported through the hub unless it is a
//! client disconnect (see [`is_broken_pipe`]). Depending on [`Options`] the
//! layer then waits for delivery and re-raises the panic for an outer
//! recovery layer.
//!
//! Each panic is reported once. The crate builds `sentry` without its panic
//! integration, and if an application turns that integration back on, the
//! request hub drops the events its hook captures (they carry the `panic`
//! mechanism without this layer's mark). Disconnects are still not reported,
//! and panics outside a request are still captured by the hook.

use std::any::Any;
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use http::StatusCode;
use sentry::protocol::{Event, Exception, Level, Mechanism, Request as SentryRequest, Value};
use sentry::{Hub, SentryFutureExt};
use serde::{Deserialize, Deserializer};
use tracing::{debug, error, warn};

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::panic::{is_broken_pipe, panic_message};
use crate::request::Request;
use crate::response::Response;

/// Key set in the mechanism data of panic events built by [`Sentry`].
pub const RECOVERED_BY: &str = "recovered_by";
const LAYER_NAME: &str = "tsu-sentry";

/// Delivery timeout used when [`Options::timeout`] is zero.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Behaviour of [`Sentry`] after it has caught a panic.
///
/// Deserializes from an application config section; `timeout` is given in
/// seconds and every field is optional:
///
/// ```toml
/// [sentry]
/// repanic = true
/// wait_for_delivery = true
/// timeout = 1.5
/// ```
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Options {
    /// Re-raise the panic after reporting it, so an outer layer can answer
    /// the request.
    pub repanic: bool,
    /// Block the request until the event is delivered or `timeout` elapses.
    pub wait_for_delivery: bool,
    /// Upper bound for `wait_for_delivery`. Zero means [`DEFAULT_TIMEOUT`].
    #[serde(deserialize_with = "seconds")]
    pub timeout: Duration,
}

impl Options {
    pub fn repanic(mut self, repanic: bool) -> Self {
        self.repanic = repanic;
        self
    }

    pub fn wait_for_delivery(mut self, wait: bool) -> Self {
        self.wait_for_delivery = wait;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn seconds<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(d)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

/// Hub-aware recovery middleware.
///
/// ```rust,no_run
/// use tsu_sentry::Router;
/// use tsu_sentry::middleware::sentry::{Options, Sentry};
///
/// let _guard = sentry::init("https://key@sentry.example.com/1");
/// let app = Router::new().layer(Sentry::new(Options::default().repanic(true)));
/// ```
pub struct Sentry {
    parent: Arc<Hub>,
    options: Options,
}

impl Sentry {
    /// Forks per-request hubs from the process-wide main hub.
    pub fn new(options: Options) -> Self {
        Self::with_hub(Hub::main(), options)
    }

    /// Forks per-request hubs from `parent`. The parent is only read.
    pub fn with_hub(parent: Arc<Hub>, mut options: Options) -> Self {
        if options.timeout.is_zero() {
            options.timeout = DEFAULT_TIMEOUT;
        }
        Self { parent, options }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }
}

impl Middleware for Sentry {
    fn call(&self, mut req: Request, next: Next) -> BoxFuture {
        let hub = hub_from_request(&req)
            .unwrap_or_else(|| Arc::new(Hub::new_from_top(&self.parent)));

        let request = sentry_request(&req);
        let scoped = request.clone();
        hub.configure_scope(move |scope| {
            scope.add_event_processor(move |mut event| {
                if is_foreign_panic_event(&event) {
                    debug!("dropping panic event not built by the recovery layer");
                    return None;
                }
                if event.request.is_none() {
                    event.request = Some(scoped.clone());
                }
                Some(event)
            });
        });
        req.insert(Arc::clone(&hub));

        let options = self.options.clone();
        let path = req.path().to_owned();

        Box::pin(async move {
            let chain = next.run(req).bind_hub(Arc::clone(&hub));
            let payload = match AssertUnwindSafe(chain).catch_unwind().await {
                Ok(response) => return response,
                Err(payload) => payload,
            };

            if is_broken_pipe(payload.as_ref()) {
                debug!(path = %path, "client went away mid-response, not reporting");
            } else {
                let event_id = hub.capture_event(event_from_panic(payload.as_ref(), request));
                error!(path = %path, %event_id, panic = %panic_message(payload.as_ref()), "recovered from panic");
                if !event_id.is_nil() && options.wait_for_delivery {
                    flush(&hub, options.timeout).await;
                }
            }

            if options.repanic {
                resume_unwind(payload);
            }
            Response::status(StatusCode::INTERNAL_SERVER_ERROR)
        })
    }
}

/// Returns the hub an earlier [`Sentry`] layer attached to `req`, if any.
pub fn hub_from_request(req: &Request) -> Option<Arc<Hub>> {
    req.get::<Arc<Hub>>().cloned()
}

async fn flush(hub: &Hub, timeout: Duration) {
    let Some(client) = hub.client() else {
        return;
    };
    match tokio::task::spawn_blocking(move || client.flush(Some(timeout))).await {
        Ok(true) => {}
        Ok(false) => warn!(?timeout, "sentry delivery not confirmed before timeout"),
        Err(e) => warn!("sentry flush task failed: {e}"),
    }
}

fn event_from_panic(payload: &(dyn Any + Send), request: SentryRequest) -> Event<'static> {
    let exception = Exception {
        ty: "panic".into(),
        value: Some(panic_message(payload)),
        mechanism: Some(Mechanism {
            ty: "panic".into(),
            handled: Some(false),
            data: [(RECOVERED_BY.to_owned(), Value::from(LAYER_NAME))].into_iter().collect(),
            ..Default::default()
        }),
        stacktrace: sentry::integrations::backtrace::current_stacktrace(),
        ..Default::default()
    };
    Event {
        exception: vec![exception].into(),
        level: Level::Fatal,
        request: Some(request),
        ..Default::default()
    }
}

/// A panic captured by someone else on this hub, typically the SDK's panic
/// hook firing before `catch_unwind` hands the payload to this layer.
fn is_foreign_panic_event(event: &Event<'_>) -> bool {
    event.exception.values.iter().any(|exc| {
        exc.mechanism
            .as_ref()
            .is_some_and(|m| m.ty == "panic" && !m.data.contains_key(RECOVERED_BY))
    })
}

fn sentry_request(req: &Request) -> SentryRequest {
    let uri = req.uri();
    let scheme = uri.scheme_str().unwrap_or("http");
    let host = uri
        .authority()
        .map(|a| a.as_str())
        .or_else(|| req.header("host"))
        .unwrap_or("localhost");

    SentryRequest {
        url: format!("{scheme}://{host}{}", uri.path()).parse().ok(),
        method: Some(req.method().to_string()),
        query_string: uri.query().map(str::to_owned),
        headers: req
            .headers()
            .iter()
            .map(|(name, value)| {
                (name.to_string(), value.to_str().unwrap_or_default().to_owned())
            })
            .collect(),
        ..Default::default()
    }
}
