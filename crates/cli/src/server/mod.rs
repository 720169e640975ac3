//! HTTP surface: OpenAI-compatible API, management endpoints and the session WebSocket.

mod auth;
mod chat;
mod internal;
mod models;
mod session_socket;
pub mod sse;

use std::net::SocketAddr;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tabrelay::{Hub, HubEvent, Relay};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
	pub relay: Relay,
	pub started_at: Instant,
	/// Unix epoch seconds at startup.
	pub started_unix: u64,
}

impl AppState {
	pub fn new(relay: Relay) -> Self {
		Self {
			relay,
			started_at: Instant::now(),
			started_unix: tabrelay::unix_now(),
		}
	}
}

pub fn router(state: AppState) -> Router {
	let api = Router::new()
		.route("/v1/chat/completions", post(chat::chat_completions))
		.route("/v1/models", get(models::list_models))
		.route("/v1/models/{model}", get(models::get_model))
		.route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key));

	Router::new()
		.route("/", get(internal::root))
		.route("/internal/healthz", get(internal::healthz))
		.route("/internal/status", get(internal::status))
		.route("/internal/hub", get(internal::hub))
		.route("/internal/config", get(internal::config))
		.route("/internal/info", get(internal::info))
		.route("/internal/uptime", get(internal::uptime))
		.route("/ws", get(session_socket::upgrade))
		.merge(api)
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive())
		.with_state(state)
}

/// Binds and serves until Ctrl-C.
pub async fn serve(relay: Relay) -> Result<()> {
	let settings = relay.settings();
	let addr: SocketAddr = settings
		.bind_address()
		.parse()
		.with_context(|| format!("Invalid host/port combination: {}", settings.bind_address()))?;

	let listener = TcpListener::bind(addr)
		.await
		.with_context(|| format!("Failed to bind relay server to {addr}"))?;

	info!(
		target = "tabrelay",
		%addr,
		models = relay.catalog().len(),
		auth = settings.api_key().is_some(),
		"relay listening; sessions connect to /ws"
	);

	tokio::spawn(log_hub_events(relay.hub().clone()));

	let app = router(AppState::new(relay));
	axum::serve(listener, app.into_make_service())
		.with_graceful_shutdown(shutdown_signal())
		.await
		.context("Relay server error")
}

async fn shutdown_signal() {
	if let Err(err) = tokio::signal::ctrl_c().await {
		warn!(target = "tabrelay", error = %err, "failed to listen for shutdown signal");
		std::future::pending::<()>().await;
	}
	info!(target = "tabrelay", "shutting down");
}

async fn log_hub_events(hub: Hub) {
	let mut events = hub.subscribe();
	loop {
		match events.recv().await {
			Ok(HubEvent::SessionConnected { session_id }) => {
				info!(target = "tabrelay", session_id = %session_id, sessions = hub.session_count(), "session connected");
			}
			Ok(HubEvent::SessionDisconnected {
				session_id,
				dropped_requests,
			}) => {
				info!(
					target = "tabrelay",
					session_id = %session_id,
					dropped_requests,
					sessions = hub.session_count(),
					"session disconnected"
				);
			}
			Ok(event) => debug!(target = "tabrelay", ?event, "hub event"),
			Err(RecvError::Lagged(skipped)) => {
				warn!(target = "tabrelay", skipped, "hub event log lagging");
			}
			Err(RecvError::Closed) => break,
		}
	}
}
