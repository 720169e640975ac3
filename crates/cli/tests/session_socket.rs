//! Drives the `/ws` endpoint with a real WebSocket client acting as an execution session.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tabrelay::{Relay, Settings};
use tabrelay_cli::server::{AppState, router};
use tabrelay_protocol::ChatCompletionRequest;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> (Relay, SocketAddr) {
	let mut settings = Settings::default();
	settings.models.insert("m".into(), "up-1".into());
	settings.stream_response_timeout_seconds = 5;
	let relay = Relay::new(settings);

	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let app = router(AppState::new(relay.clone()));
	tokio::spawn(async move {
		axum::serve(listener, app).await.unwrap();
	});
	(relay, addr)
}

async fn next_json(client: &mut Client) -> Value {
	loop {
		let message = tokio::time::timeout(Duration::from_secs(5), client.next())
			.await
			.expect("socket frame in time")
			.unwrap()
			.unwrap();
		if let Message::Text(text) = message {
			return serde_json::from_str(&text).unwrap();
		}
	}
}

async fn wait_for_sessions(relay: &Relay, count: usize) {
	for _ in 0..100 {
		if relay.hub().session_count() == count {
			return;
		}
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
	panic!("expected {count} sessions, have {}", relay.hub().session_count());
}

fn request() -> ChatCompletionRequest {
	serde_json::from_value(json!({
		"model": "m",
		"messages": [{"role": "user", "content": "ping me"}],
	}))
	.unwrap()
}

#[tokio::test]
async fn session_receives_greeting_then_serves_a_job() {
	let (relay, addr) = start_server().await;
	let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

	let greeting = next_json(&mut client).await;
	assert_eq!(greeting["type"], "connection_established");
	let session_id = greeting["session_id"].as_str().unwrap().to_string();
	assert!(session_id.starts_with("client_"));
	wait_for_sessions(&relay, 1).await;

	let caller = {
		let relay = relay.clone();
		tokio::spawn(async move { relay.complete(&request()).await })
	};

	let job = next_json(&mut client).await;
	assert_eq!(job["model"], "up-1");
	assert_eq!(job["model_name"], "m");
	let request_id = job["request_id"].as_str().unwrap().to_string();
	assert_eq!(
		relay.hub().routing_snapshot().get(&request_id),
		Some(&session_id)
	);

	let reply = json!({
		"request_id": request_id,
		"data": "a0:\"pong\"\nad:{\"finishReason\":\"stop\"}",
	});
	client.send(Message::Text(reply.to_string())).await.unwrap();

	let response = caller.await.unwrap().unwrap();
	assert_eq!(response.choices[0].message.content, "pong");
	assert!(relay.hub().routing_snapshot().is_empty());
}

#[tokio::test]
async fn ping_gets_pong() {
	let (_relay, addr) = start_server().await;
	let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
	next_json(&mut client).await;

	client
		.send(Message::Text(json!({"type": "ping"}).to_string()))
		.await
		.unwrap();
	assert_eq!(next_json(&mut client).await["type"], "pong");
}

#[tokio::test]
async fn closing_the_socket_fails_inflight_requests() {
	let (relay, addr) = start_server().await;
	let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
	next_json(&mut client).await;
	wait_for_sessions(&relay, 1).await;

	let caller = {
		let relay = relay.clone();
		tokio::spawn(async move { relay.complete(&request()).await })
	};
	let job = next_json(&mut client).await;
	assert!(job["request_id"].is_string());

	client.close(None).await.unwrap();
	drop(client);

	let err = caller.await.unwrap().unwrap_err();
	assert_eq!(err.code(), "session_closed");
	wait_for_sessions(&relay, 0).await;
	assert!(relay.hub().routing_snapshot().is_empty());
}
