//! Request instrumentation middleware.
//!
//! # Responsibilities
//! - Skip requests under the excluded prefixes (the service's own viewers)
//! - Mint an InstrumenterId per request and attach it to the request
//! - Run the inner service inside `bus.instrument_async`
//!
//! # Design Decisions
//! - Transparent: the inner response and error are returned untouched
//! - The id is scoped to this request's future only, so concurrent
//!   requests never observe each other's identity

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::http::Request;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tower::{Layer, Service};

use crate::config::InstrumentationConfig;
use crate::notifications::{InstrumenterId, NotificationBus, Payload};

/// Layer wrapping services with [`InstrumentService`].
#[derive(Debug, Clone)]
pub struct InstrumentLayer {
    bus: Arc<NotificationBus>,
    config: Arc<InstrumentationConfig>,
}

impl InstrumentLayer {
    pub fn new(bus: Arc<NotificationBus>, config: InstrumentationConfig) -> Self {
        Self {
            bus,
            config: Arc::new(config),
        }
    }
}

impl<S> Layer<S> for InstrumentLayer {
    type Service = InstrumentService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InstrumentService {
            inner,
            bus: self.bus.clone(),
            config: self.config.clone(),
        }
    }
}

/// Publishes one request event around each call to the inner service.
#[derive(Debug, Clone)]
pub struct InstrumentService<S> {
    inner: S,
    bus: Arc<NotificationBus>,
    config: Arc<InstrumentationConfig>,
}

impl<S, B> Service<Request<B>> for InstrumentService<S>
where
    S: Service<Request<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: fmt::Display,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        // Keep the service that was polled ready; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if self.config.is_excluded(req.uri().path()) {
            return Box::pin(inner.call(req));
        }

        let id = InstrumenterId::new();
        req.extensions_mut().insert(id);
        let payload = request_payload(&req, id);

        tracing::trace!(
            instrumenter_id = %id,
            path = %req.uri().path(),
            "Instrumenting request"
        );

        let bus = self.bus.clone();
        let config = self.config.clone();
        Box::pin(id.scope(async move {
            bus.instrument_async(&config.event_name, payload, inner.call(req))
                .await
        }))
    }
}

fn request_payload<B>(req: &Request<B>, id: InstrumenterId) -> Payload {
    let mut payload = Payload::new();
    payload.insert("path".into(), Value::from(req.uri().path()));
    payload.insert("method".into(), Value::from(req.method().as_str()));
    payload.insert("instrumenter_id".into(), Value::from(id.to_string()));
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::Event;
    use std::convert::Infallible;
    use std::sync::Mutex;
    use tower::{service_fn, ServiceBuilder, ServiceExt};

    fn layer() -> (InstrumentLayer, Arc<Mutex<Vec<Event>>>) {
        let bus = Arc::new(NotificationBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe_fn("request", move |e| sink.lock().unwrap().push(e.clone()));
        (InstrumentLayer::new(bus, InstrumentationConfig::default()), seen)
    }

    #[tokio::test]
    async fn test_payload_and_extension() {
        let (layer, seen) = layer();
        let svc = ServiceBuilder::new().layer(layer).service(service_fn(
            |req: Request<()>| async move {
                let ext = req.extensions().get::<InstrumenterId>().copied();
                Ok::<_, Infallible>((ext, InstrumenterId::current()))
            },
        ));

        let req = Request::builder().method("POST").uri("/orders?x=1").body(()).unwrap();
        let (ext, current) = svc.oneshot(req).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let event = &seen[0];
        assert_eq!(event.payload()["path"], "/orders");
        assert_eq!(event.payload()["method"], "POST");
        assert_eq!(ext, Some(event.instrumenter_id()));
        assert_eq!(current, Some(event.instrumenter_id()));
        assert_eq!(
            event.payload()["instrumenter_id"],
            event.instrumenter_id().to_string()
        );
    }

    #[tokio::test]
    async fn test_excluded_prefix_bypasses() {
        let (layer, seen) = layer();
        let svc = ServiceBuilder::new().layer(layer).service(service_fn(
            |req: Request<()>| async move {
                Ok::<_, Infallible>(req.extensions().get::<InstrumenterId>().is_some())
            },
        ));

        let req = Request::builder().uri("/metrics/events").body(()).unwrap();
        let instrumented = svc.oneshot(req).await.unwrap();

        assert!(!instrumented);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_published_then_returned() {
        let (layer, seen) = layer();
        let observed = seen.clone();
        let svc = ServiceBuilder::new().layer(layer).service(service_fn(
            move |_req: Request<()>| {
                let observed = observed.clone();
                async move {
                    assert!(observed.lock().unwrap().is_empty());
                    Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "handler broke"))
                }
            },
        ));

        let req = Request::builder().uri("/orders").body(()).unwrap();
        let err = svc.oneshot(req).await.unwrap_err();

        assert_eq!(err.to_string(), "handler broke");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].failure().unwrap().message, "handler broke");
    }
}
