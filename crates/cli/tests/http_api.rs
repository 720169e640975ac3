use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tabrelay::{Hub, Relay, Settings};
use tabrelay_cli::server::{AppState, router};
use tabrelay_protocol::SessionReply;
use tokio::sync::mpsc;
use tower::ServiceExt;

const SESSION: &str = "client_http";

fn settings(api_key: Option<&str>) -> Settings {
	let mut settings = Settings::default();
	settings.api_key = api_key.map(str::to_string);
	settings.models.insert("m".into(), "up-1".into());
	settings.models.insert("painter".into(), "img-1:image".into());
	settings.stream_response_timeout_seconds = 2;
	settings
}

fn app(relay: &Relay) -> Router {
	router(AppState::new(relay.clone()))
}

/// Session that answers every job with the given raw lines.
fn attach_session(hub: &Hub, lines: &'static str) {
	let (tx, mut rx) = mpsc::channel::<String>(16);
	hub.register(SESSION, tx);
	let hub = hub.clone();
	tokio::spawn(async move {
		while let Some(text) = rx.recv().await {
			let frame: Value = serde_json::from_str(&text).unwrap();
			if frame.get("model").is_none() {
				continue;
			}
			hub.deliver(
				SESSION,
				SessionReply {
					request_id: frame["request_id"].as_str().unwrap().into(),
					data: Some(lines.into()),
					done: false,
					error: None,
				},
			);
		}
	});
}

fn chat_request(body: Value) -> Request<Body> {
	Request::builder()
		.method("POST")
		.uri("/v1/chat/completions")
		.header(header::CONTENT_TYPE, "application/json")
		.body(Body::from(body.to_string()))
		.unwrap()
}

fn get(uri: &str) -> Request<Body> {
	Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
	let bytes = to_bytes(response.into_body(), 1024 * 64).await.unwrap();
	serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
	let bytes = to_bytes(response.into_body(), 1024 * 64).await.unwrap();
	String::from_utf8(bytes.to_vec()).unwrap()
}

fn hello() -> Value {
	json!({"model": "m", "messages": [{"role": "user", "content": "hello"}]})
}

#[tokio::test]
async fn healthz_and_root() {
	let relay = Relay::new(settings(None));
	let response = app(&relay).oneshot(get("/internal/healthz")).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(body_json(response).await["status"], "ok");

	let response = app(&relay).oneshot(get("/")).await.unwrap();
	assert_eq!(body_json(response).await["endpoints"]["openai_chat"], "/v1/chat/completions");
}

#[tokio::test]
async fn buffered_completion_round_trip() {
	let relay = Relay::new(settings(None));
	attach_session(relay.hub(), "a0:\"Hi there\"\nad:{\"finishReason\":\"stop\"}");

	let response = app(&relay).oneshot(chat_request(hello())).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let body = body_json(response).await;
	assert_eq!(body["object"], "chat.completion");
	assert_eq!(body["choices"][0]["message"]["content"], "Hi there");
	assert_eq!(body["choices"][0]["finish_reason"], "stop");
	assert_eq!(body["usage"]["completion_tokens"], 2);
	assert_eq!(body["usage"]["prompt_tokens"], 1);
	assert_eq!(body["usage"]["total_tokens"], 3);
}

#[tokio::test]
async fn streaming_uses_sse_framing_and_done_marker() {
	let relay = Relay::new(settings(None));
	attach_session(relay.hub(), "a0:\"Hel\"\na1:\"lo\"\nad:{\"finishReason\":\"stop\"}");

	let mut body = hello();
	body["stream"] = json!(true);
	let response = app(&relay).oneshot(chat_request(body)).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	assert!(
		response.headers()[header::CONTENT_TYPE]
			.to_str()
			.unwrap()
			.starts_with("text/event-stream")
	);

	let text = body_text(response).await;
	let events: Vec<&str> = text
		.split("\n\n")
		.filter_map(|event| event.strip_prefix("data: "))
		.collect();
	assert_eq!(events.len(), 4);
	assert_eq!(events[3], "[DONE]");
	let first: Value = serde_json::from_str(events[0]).unwrap();
	assert_eq!(first["object"], "chat.completion.chunk");
	assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
	assert_eq!(first["choices"][0]["delta"]["content"], "Hel");
	let last: Value = serde_json::from_str(events[2]).unwrap();
	assert_eq!(last["choices"][0]["finish_reason"], "stop");
	assert_eq!(last["chunk_index"], 2);
}

#[tokio::test]
async fn streaming_challenge_ends_with_error_chunk() {
	let relay = Relay::new(settings(None));
	attach_session(relay.hub(), "<title>Cloudflare</title>");

	let mut body = hello();
	body["stream"] = json!(true);
	let response = app(&relay).oneshot(chat_request(body)).await.unwrap();
	let text = body_text(response).await;
	let events: Vec<&str> = text
		.split("\n\n")
		.filter_map(|event| event.strip_prefix("data: "))
		.collect();
	assert_eq!(events.len(), 2);
	let chunk: Value = serde_json::from_str(events[0]).unwrap();
	assert_eq!(chunk["error"]["type"], "challenge_required");
	assert_eq!(events[1], "[DONE]");
}

#[tokio::test]
async fn no_session_is_503() {
	let relay = Relay::new(settings(None));
	let response = app(&relay).oneshot(chat_request(hello())).await.unwrap();
	assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
	let body = body_json(response).await;
	assert_eq!(body["error"]["code"], "no_session_available");
	assert!(relay.hub().routing_snapshot().is_empty());
}

#[tokio::test]
async fn unknown_model_is_404() {
	let relay = Relay::new(settings(None));
	attach_session(relay.hub(), "");
	let response = app(&relay)
		.oneshot(chat_request(json!({"model": "nope", "messages": [{"role": "user", "content": "x"}]})))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::NOT_FOUND);
	assert_eq!(body_json(response).await["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn out_of_range_temperature_is_400() {
	let relay = Relay::new(settings(None));
	let mut body = hello();
	body["temperature"] = json!(2.5);
	let response = app(&relay).oneshot(chat_request(body)).await.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_body_is_400_with_envelope() {
	let relay = Relay::new(settings(None));
	let request = Request::builder()
		.method("POST")
		.uri("/v1/chat/completions")
		.body(Body::from("{not json"))
		.unwrap();
	let response = app(&relay).oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	assert_eq!(body_json(response).await["error"]["code"], "invalid_request");
}

#[tokio::test]
async fn api_key_is_enforced() {
	let relay = Relay::new(settings(Some("sekret")));

	let response = app(&relay).oneshot(get("/v1/models")).await.unwrap();
	assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

	let request = Request::builder()
		.uri("/v1/models")
		.header(header::AUTHORIZATION, "Bearer wrong")
		.body(Body::empty())
		.unwrap();
	assert_eq!(app(&relay).oneshot(request).await.unwrap().status(), StatusCode::UNAUTHORIZED);

	for padded in ["Bearer  sekret", "Bearer sekret "] {
		let request = Request::builder()
			.uri("/v1/models")
			.header(header::AUTHORIZATION, padded)
			.body(Body::empty())
			.unwrap();
		assert_eq!(
			app(&relay).oneshot(request).await.unwrap().status(),
			StatusCode::UNAUTHORIZED,
			"{padded:?} must not match"
		);
	}

	let request = Request::builder()
		.uri("/v1/models")
		.header(header::AUTHORIZATION, "Bearer sekret")
		.body(Body::empty())
		.unwrap();
	assert_eq!(app(&relay).oneshot(request).await.unwrap().status(), StatusCode::OK);

	// Management endpoints stay open.
	let response = app(&relay).oneshot(get("/internal/healthz")).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn models_list_and_detail() {
	let relay = Relay::new(settings(None));
	let body = body_json(app(&relay).oneshot(get("/v1/models")).await.unwrap()).await;
	assert_eq!(body["object"], "list");
	assert_eq!(body["data"].as_array().unwrap().len(), 2);

	let response = app(&relay).oneshot(get("/v1/models/painter")).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let body = body_json(response).await;
	assert_eq!(body["id"], "painter");
	assert_eq!(body["metadata"]["model_type"], "image");

	let response = app(&relay).oneshot(get("/v1/models/missing")).await.unwrap();
	assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn management_views() {
	let relay = Relay::new(settings(Some("sekret")));
	attach_session(relay.hub(), "");

	let status = body_json(app(&relay).oneshot(get("/internal/status")).await.unwrap()).await;
	assert_eq!(status["connected_sessions_count"], 1);
	assert_eq!(status["connected_sessions"][0]["session_id"], SESSION);

	let hub = body_json(app(&relay).oneshot(get("/internal/hub")).await.unwrap()).await;
	assert_eq!(hub["request_routing_count"], 0);
	assert!(hub["routing_table"].as_object().unwrap().is_empty());

	let config = body_json(app(&relay).oneshot(get("/internal/config")).await.unwrap()).await;
	assert_eq!(config["has_api_key"], true);
	assert!(!config.to_string().contains("sekret"));

	let uptime = body_json(app(&relay).oneshot(get("/internal/uptime")).await.unwrap()).await;
	assert!(uptime["uptime_seconds"].is_u64());
}
