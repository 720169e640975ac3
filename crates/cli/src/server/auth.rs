use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use tabrelay::RelayError;

use super::AppState;
use crate::error::ApiError;

/// Requires `Authorization: Bearer <api_key>` when an API key is configured.
pub async fn require_api_key(
	State(state): State<AppState>,
	request: Request,
	next: Next,
) -> Result<Response, ApiError> {
	if let Some(expected) = state.relay.settings().api_key() {
		let provided = request
			.headers()
			.get(AUTHORIZATION)
			.and_then(|value| value.to_str().ok())
			.and_then(|value| value.strip_prefix("Bearer "));
		if provided != Some(expected) {
			return Err(RelayError::Unauthorized.into());
		}
	}
	Ok(next.run(request).await)
}
