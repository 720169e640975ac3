use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use tabrelay::RelayError;
use tabrelay_protocol::ChatCompletionRequest;

use super::AppState;
use super::sse::sse_response;
use crate::error::ApiError;

/// POST /v1/chat/completions
///
/// The body is parsed by hand so malformed JSON gets the OpenAI error envelope.
pub async fn chat_completions(
	State(state): State<AppState>,
	body: Bytes,
) -> Result<Response, ApiError> {
	let request: ChatCompletionRequest = serde_json::from_slice(&body)
		.map_err(|err| RelayError::Validation(format!("invalid request body: {err}")))?;

	if request.stream {
		let chunks = state.relay.stream(&request).await?;
		Ok(sse_response(chunks).into_response())
	} else {
		let response = state.relay.complete(&request).await?;
		Ok(Json(response).into_response())
	}
}
