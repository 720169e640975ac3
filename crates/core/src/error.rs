//! Error types for the relay.

use tabrelay_protocol::ErrorDetail;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Terminal outcomes and rejections a relayed call can produce.
#[derive(Debug, Error)]
pub enum RelayError {
	/// Malformed or out-of-range input. Never retried.
	#[error("invalid request: {0}")]
	Validation(String),

	/// Bearer credential missing or not matching the configured key.
	#[error("invalid API key")]
	Unauthorized,

	/// Requested model name is not in the catalog.
	#[error("model '{0}' not found")]
	ModelNotFound(String),

	/// No execution session is connected. Retryable.
	#[error("no execution session is connected to the relay")]
	NoSessionAvailable,

	/// The job could not be written to the assigned session's channel. Retryable; the hub already
	/// dropped the session if its channel was closed.
	#[error("failed to forward request {request_id} to session {session_id}")]
	ForwardFailed {
		request_id: String,
		session_id: String,
	},

	/// The session reported an interactive verification requirement.
	#[error("interactive verification required: {message}")]
	Challenge { message: String },

	/// No completion within the configured per-request timeout.
	#[error("request timed out after {ms}ms")]
	Timeout { ms: u64 },

	/// The session reported a failure for this request.
	#[error("execution session error: {0}")]
	Session(String),

	/// The session disconnected while the request was in flight.
	#[error("execution session disconnected before the request completed")]
	SessionClosed,

	/// The session completed without emitting any content.
	#[error("execution session finished without producing content")]
	EmptyResponse,

	#[error("internal error: {0}")]
	Internal(String),
}

impl RelayError {
	/// Whether the caller can reasonably retry the same call.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			RelayError::NoSessionAvailable
				| RelayError::ForwardFailed { .. }
				| RelayError::SessionClosed
		)
	}

	/// OpenAI-style error `type` string.
	pub fn kind(&self) -> &'static str {
		match self {
			RelayError::Validation(_) | RelayError::ModelNotFound(_) => "invalid_request_error",
			RelayError::Unauthorized => "authentication_error",
			RelayError::NoSessionAvailable => "service_unavailable",
			RelayError::Challenge { .. } => "challenge_required",
			RelayError::Timeout { .. } => "timeout",
			RelayError::ForwardFailed { .. }
			| RelayError::Session(_)
			| RelayError::SessionClosed
			| RelayError::EmptyResponse
			| RelayError::Internal(_) => "server_error",
		}
	}

	/// Machine-readable error code.
	pub fn code(&self) -> &'static str {
		match self {
			RelayError::Validation(_) => "invalid_request",
			RelayError::Unauthorized => "invalid_api_key",
			RelayError::ModelNotFound(_) => "model_not_found",
			RelayError::NoSessionAvailable => "no_session_available",
			RelayError::ForwardFailed { .. } => "forward_failed",
			RelayError::Challenge { .. } => "verification_challenge",
			RelayError::Timeout { .. } => "request_timeout",
			RelayError::Session(_) => "session_error",
			RelayError::SessionClosed => "session_closed",
			RelayError::EmptyResponse => "empty_response",
			RelayError::Internal(_) => "internal_error",
		}
	}

	pub fn to_error_detail(&self) -> ErrorDetail {
		ErrorDetail {
			message: self.to_string(),
			kind: self.kind().to_string(),
			code: Some(self.code().to_string()),
		}
	}
}
