//! servisor: a supervised HTTP server.
//!
//! ```text
//!  SIGINT/SIGTERM ──┐
//!  parent token  ───┼─► signal bridge ─► run token ─┬─► main listener      (:8080)
//!  stop()        ───┘                               └─► profiling listener (/debug/*)
//!
//!  first fatal listener error ──► cancels run token ──► siblings drain
//! ```
//!
//! Serves `GET /` ("ok") and `POST /echo` (JSON echo) as a demonstration of
//! the request collaborators.

use std::path::PathBuf;

use axum::{middleware, routing::get, routing::post, Json};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use servisor::config::{apply_overrides, load_config, ServerConfig};
use servisor::http::{request_log, JsonBody, RequestLog};
use servisor::observability::{logging, metrics};
use servisor::{Logger, Supervisor};

#[derive(Parser)]
#[command(name = "servisor")]
#[command(about = "Supervised HTTP server with graceful shutdown", long_about = None)]
struct Cli {
    /// TOML config file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Main listener address, overriding the config file.
    #[arg(short, long)]
    listen: Option<String>,

    /// Serve the /debug/ endpoints on this address.
    #[arg(short, long)]
    profile: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct Message {
    text: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    let config = apply_overrides(config, cli.listen, cli.profile)?;

    logging::init_subscriber(
        &config.observability.log_filter,
        config.observability.json_logs,
    );

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        profiling = config.profiling.enabled,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    let logger = Logger::current();
    let supervisor = Supervisor::from_config(&config, logger.clone());

    if config.observability.metrics_enabled {
        match metrics::install_recorder() {
            Ok(handle) => supervisor.set_prometheus(handle)?,
            Err(err) => tracing::warn!(error = %err, "Metrics recorder not installed"),
        }
    }

    supervisor.handle("/", get(|| async { "ok" }))?;
    supervisor.handle(
        "/echo",
        post(|JsonBody(message): JsonBody<Message>| async move { Json(message) }),
    )?;

    let level = config.observability.request_log_level.parse()?;
    supervisor.layer(middleware::from_fn_with_state(
        RequestLog::new(logger, level),
        request_log,
    ))?;

    supervisor.start(&CancellationToken::new()).await?;
    Ok(())
}
