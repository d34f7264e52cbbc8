//! Request instrumentation service.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ─────────────▶ TraceLayer ─▶ InstrumentLayer ─▶ TimeoutLayer ─▶ handlers
//!                                     │                                  │
//!                                     │  instrument("request")           │ instrument("sql.query")
//!                                     ▼                                  ▼
//!                              ┌──────────────────────────────────────────────┐
//!                              │               NotificationBus                │
//!                              │   publish(event) → listeners, in order       │
//!                              └──────────────────────┬───────────────────────┘
//!                                                     │
//!                                                     ▼
//!                              ┌──────────────────────────────────────────────┐
//!                              │  FilteringListener                           │
//!                              │    PayloadFilterRegistry.filter(name, data)  │
//!                              │    → Record → LogSink | MemorySink           │
//!                              └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use request_instrumentation::config::loader::load_config;
use request_instrumentation::config::AppConfig;
use request_instrumentation::lifecycle::{signals, Shutdown};
use request_instrumentation::observability::{logging, metrics};
use request_instrumentation::HttpServer;

#[derive(Parser)]
#[command(name = "request-instrumentation")]
#[command(about = "Instrumented HTTP service with filtered event capture", long_about = None)]
struct Cli {
    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!("request-instrumentation v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        config_file = ?cli.config,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let server = HttpServer::new(config);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
