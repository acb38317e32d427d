//! Case Desk · answer submission backend
//!
//! - Axum HTTP + WebSocket API
//! - Optional remote progress backend (Supabase-style REST), in-memory otherwise
//! - Static frontend fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT              : u16 (default 3000)
//!   APP_CONFIG_PATH   : path to TOML config (backend, session limits, case bank)
//!   SUPABASE_URL      : remote backend base URL (overrides config)
//!   SUPABASE_ANON_KEY : remote backend API key (overrides config)
//!   LOG_LEVEL         : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT        : "pretty" (default) or "json"

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use case_desk::state::spawn_session_sweeper;
use case_desk::{build_router, telemetry, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let state = Arc::new(AppState::new());
  let _sweeper = spawn_session_sweeper(Arc::clone(&state));
  let app = build_router(state);

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "case_desk", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "case_desk", error = %e, "Failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  info!(target: "case_desk", "Shutdown signal received");
}
