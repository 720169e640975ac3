use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tabrelay::Hub;
use tabrelay::hub::SESSION_CHANNEL_CAPACITY;
use tabrelay_protocol::{ServerMessage, SessionControl, SessionMessage};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::AppState;

/// GET /ws: upgrade and attach an execution session.
pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
	ws.on_upgrade(move |socket| handle_session_socket(socket, state.relay.hub().clone()))
}

async fn handle_session_socket(socket: WebSocket, hub: Hub) {
	let session_id = Hub::new_session_id();
	let (tx, rx) = mpsc::channel::<String>(SESSION_CHANNEL_CAPACITY);

	// Queue the greeting ahead of any job frame.
	let greeting = ServerMessage::ConnectionEstablished {
		session_id: session_id.clone(),
		server_time: tabrelay::unix_now(),
	};
	match serde_json::to_string(&greeting) {
		Ok(text) => {
			let _ = tx.try_send(text);
		}
		Err(err) => warn!(target = "tabrelay", error = %err, "failed to encode greeting"),
	}
	hub.register(session_id.clone(), tx);

	let mut rx_stream = ReceiverStream::new(rx);
	let (mut ws_tx, mut ws_rx) = socket.split();

	let send_task = tokio::spawn(async move {
		while let Some(text) = rx_stream.next().await {
			if ws_tx.send(Message::Text(text.into())).await.is_err() {
				break;
			}
		}
	});

	while let Some(msg) = ws_rx.next().await {
		match msg {
			Ok(Message::Text(text)) => {
				if let Err(err) = handle_session_message(&hub, &session_id, text.as_str()) {
					warn!(target = "tabrelay", session_id = %session_id, error = %err, "Failed handling session message");
				}
			}
			Ok(Message::Close(_)) => break,
			Ok(_) => {}
			Err(err) => {
				warn!(target = "tabrelay", session_id = %session_id, error = %err, "Session websocket error");
				break;
			}
		}
	}

	hub.unregister(&session_id);
	send_task.abort();
	info!(target = "tabrelay", session_id = %session_id, "Session socket closed");
}

fn handle_session_message(hub: &Hub, session_id: &str, raw: &str) -> Result<()> {
	let message: SessionMessage = serde_json::from_str(raw).context("Parsing session message")?;

	match message {
		SessionMessage::Reply(reply) => {
			let request_id = reply.request_id.clone();
			if !hub.deliver(session_id, reply) {
				debug!(target = "tabrelay", session_id, request_id = %request_id, "Dropped reply for unknown request");
			}
		}
		SessionMessage::Control(SessionControl::Ping) => {
			hub.notify(session_id, &ServerMessage::Pong);
		}
		SessionMessage::Control(SessionControl::Log { level, message }) => {
			let text = match message {
				Value::String(text) => text,
				other => other.to_string(),
			};
			let level = level.as_deref().unwrap_or("info");
			debug!(target = "tabrelay", session_id, level, message = %text, "Session log");
		}
	}
	Ok(())
}
