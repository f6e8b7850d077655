//! MathAlarm · alarm scheduling backend
//!
//! - Alarm service: clock worker, trigger evaluation, math challenges
//! - Axum HTTP + WebSocket API for the UI
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT              : u16 (default 3000)
//!   ALARM_STORE_URL   : base URL of the alarm CRUD API; in-memory store if absent
//!   ALARM_CONFIG_PATH : path to TOML config (tick interval, solves, sounds, seed alarms)
//!   LOG_LEVEL         : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT        : "pretty" (default) or "json"

mod telemetry;
mod util;
mod error;
mod domain;
mod sounds;
mod config;
mod problem;
mod challenge;
mod evaluator;
mod clock;
mod events;
mod effects;
mod store;
mod scheduler;
mod service;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info, instrument};

use crate::config::load_app_config_from_env;
use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let cfg = load_app_config_from_env();

  // Spawn the alarm service (store + scheduler actor), then load alarms and start the clock.
  let state = Arc::new(AppState::new(&cfg));
  if let Err(e) = state.service.reload_alarms().await {
    // keep running: the UI can push a snapshot or ask for a reload later
    error!(target: "mathalarm_backend", error = %e, "Initial alarm load failed");
  }
  let mode = state.service.start().await?;
  info!(target: "mathalarm_backend", ?mode, "Alarm clock running");

  let app = build_router(state.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "mathalarm_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  state.service.stop().await?;
  info!(target: "mathalarm_backend", "Shut down cleanly");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!(target: "mathalarm_backend", error = %e, "Failed to listen for ctrl-c");
    std::future::pending::<()>().await;
  }
  info!(target: "mathalarm_backend", "Shutdown requested");
}
