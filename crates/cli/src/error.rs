use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tabrelay::RelayError;
use tabrelay_protocol::ErrorBody;
use tracing::{error, warn};

/// HTTP face of a [`RelayError`]: status code plus the OpenAI error envelope.
#[derive(Debug)]
pub struct ApiError(pub RelayError);

impl From<RelayError> for ApiError {
	fn from(err: RelayError) -> Self {
		Self(err)
	}
}

impl ApiError {
	pub fn status(&self) -> StatusCode {
		match &self.0 {
			RelayError::Validation(_) => StatusCode::BAD_REQUEST,
			RelayError::Unauthorized => StatusCode::UNAUTHORIZED,
			RelayError::ModelNotFound(_) => StatusCode::NOT_FOUND,
			RelayError::NoSessionAvailable => StatusCode::SERVICE_UNAVAILABLE,
			RelayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
			RelayError::ForwardFailed { .. }
			| RelayError::Challenge { .. }
			| RelayError::Session(_)
			| RelayError::SessionClosed
			| RelayError::EmptyResponse
			| RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.status();
		if status.is_server_error() {
			error!(target = "tabrelay", status = status.as_u16(), error = %self.0, "request failed");
		} else {
			warn!(target = "tabrelay", status = status.as_u16(), error = %self.0, "request rejected");
		}
		let body = ErrorBody {
			error: self.0.to_error_detail(),
		};
		(status, Json(body)).into_response()
	}
}
