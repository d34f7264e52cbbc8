//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the shared bus, filter registry and record sink
//! - Create the Axum Router with the demo handlers
//! - Wire up middleware (tracing, timeout, instrumentation)
//! - Expose recorded events under the excluded `/metrics` prefix
//! - Serve until the shutdown signal fires

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::config::{AppConfig, SinkKind};
use crate::filters::{FilterSpec, PayloadFilterRegistry};
use crate::http::middleware::InstrumentLayer;
use crate::notifications::{InstrumenterId, NotificationBus, Payload};
use crate::sink::{FilteringListener, LogSink, MemorySink, Record};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<NotificationBus>,
    pub registry: Arc<PayloadFilterRegistry>,
    /// Present when the memory sink is configured.
    pub records: Option<Arc<MemorySink>>,
}

/// HTTP server hosting the instrumented application.
pub struct HttpServer {
    router: Router,
    config: AppConfig,
    state: AppState,
}

impl HttpServer {
    /// Create a server with the default filter policies.
    pub fn new(config: AppConfig) -> Self {
        let app_root = config
            .instrumentation
            .app_root
            .clone()
            .or_else(|| std::env::current_dir().ok());
        let registry = Arc::new(PayloadFilterRegistry::with_defaults(app_root.as_deref()));
        Self::with_registry(config, registry)
    }

    /// Create a server around an already configured registry.
    ///
    /// The configured request event keeps its full payload unless the
    /// registry already holds a policy for it.
    pub fn with_registry(config: AppConfig, registry: Arc<PayloadFilterRegistry>) -> Self {
        registry.register_if_absent(config.instrumentation.event_name.clone(), FilterSpec::All);
        let bus = Arc::new(NotificationBus::new());

        let records = match config.sink.kind {
            SinkKind::Memory => {
                let sink = Arc::new(MemorySink::new(config.sink.memory_capacity));
                bus.subscribe_all(FilteringListener::new(registry.clone(), sink.clone()));
                Some(sink)
            }
            SinkKind::Log => {
                bus.subscribe_all(FilteringListener::new(registry.clone(), LogSink));
                None
            }
        };

        tracing::info!(
            sink = ?config.sink.kind,
            policies = registry.len(),
            event = %config.instrumentation.event_name,
            "Instrumentation configured"
        );

        let state = AppState {
            bus,
            registry,
            records,
        };
        let router = Self::build_router(&config, state.clone());
        Self {
            router,
            config,
            state,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &AppConfig, state: AppState) -> Router {
        let instrument = InstrumentLayer::new(state.bus.clone(), config.instrumentation.clone());

        Router::new()
            .route("/", get(index))
            .route("/orders/{id}", get(show_order))
            .route("/metrics/events", get(list_events))
            .route("/metrics/events/{instrumenter_id}", get(request_events))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            // Outside the timeout so timed-out requests are still recorded.
            .layer(instrument)
            .layer(TraceLayer::new_for_http())
    }

    /// The fully layered router, for embedding or in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn index() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct OrderView {
    id: u64,
    status: &'static str,
    instrumenter_id: InstrumenterId,
}

/// Looks an order up inside a nested `sql.query` event.
async fn show_order(
    State(state): State<AppState>,
    id: InstrumenterId,
    Path(order_id): Path<u64>,
) -> Response {
    let mut payload = Payload::new();
    payload.insert("name".into(), json!("Order Load"));
    payload.insert("sql".into(), json!("SELECT * FROM orders WHERE id = ?"));
    payload.insert("binds".into(), json!([order_id]));

    let found = state
        .bus
        .instrument("sql.query", payload, || Ok::<_, Infallible>(order_id % 2 == 1));

    match found {
        Ok(true) => Json(OrderView {
            id: order_id,
            status: "shipped",
            instrumenter_id: id,
        })
        .into_response(),
        Ok(false) | Err(_) => (StatusCode::NOT_FOUND, "Order not found").into_response(),
    }
}

async fn list_events(State(state): State<AppState>) -> Response {
    match &state.records {
        Some(records) => Json(records.records()).into_response(),
        None => (StatusCode::NOT_FOUND, "Memory sink disabled").into_response(),
    }
}

async fn request_events(
    State(state): State<AppState>,
    Path(instrumenter_id): Path<Uuid>,
) -> Response {
    let Some(records) = &state.records else {
        return (StatusCode::NOT_FOUND, "Memory sink disabled").into_response();
    };
    let events: Vec<Record> = records.for_instrumenter(instrumenter_id.into());
    Json(events).into_response()
}
