use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use super::AppState;

pub async fn root() -> Json<Value> {
	Json(json!({
		"name": "tabrelay",
		"version": env!("CARGO_PKG_VERSION"),
		"status": "running",
		"endpoints": {
			"openai_models": "/v1/models",
			"openai_chat": "/v1/chat/completions",
			"health": "/internal/healthz",
			"session_socket": "/ws",
		},
	}))
}

pub async fn healthz() -> Json<Value> {
	Json(json!({ "status": "ok" }))
}

pub async fn status(State(state): State<AppState>) -> Json<Value> {
	let hub = state.relay.hub();
	let sessions = hub.sessions();
	Json(json!({
		"server_time": tabrelay::unix_now(),
		"connected_sessions_count": sessions.len(),
		"connected_sessions": sessions,
		"has_active_sessions": !sessions.is_empty(),
		"pending_requests_count": hub.pending_count(),
	}))
}

pub async fn hub(State(state): State<AppState>) -> Json<Value> {
	let hub = state.relay.hub();
	let routing = hub.routing_snapshot();
	Json(json!({
		"total_sessions": hub.session_count(),
		"request_routing_count": routing.len(),
		"pending_requests_count": hub.pending_count(),
		"routing_table": routing,
	}))
}

pub async fn config(State(state): State<AppState>) -> Json<Value> {
	Json(state.relay.settings().redacted())
}

pub async fn info(State(state): State<AppState>) -> Json<Value> {
	let settings = state.relay.settings();
	Json(json!({
		"version": env!("CARGO_PKG_VERSION"),
		"server_type": "tabrelay",
		"api_compatibility": "OpenAI v1",
		"features": {
			"streaming": true,
			"non_streaming": true,
			"bypass_mode": settings.bypass_enabled,
			"tavern_mode": settings.tavern_mode_enabled,
			"battle_mode": true,
		},
	}))
}

pub async fn uptime(State(state): State<AppState>) -> Json<Value> {
	Json(json!({
		"server_start_time": state.started_unix,
		"current_time": tabrelay::unix_now(),
		"uptime_seconds": state.started_at.elapsed().as_secs(),
	}))
}
