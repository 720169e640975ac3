//! Frames exchanged with an execution session.
//!
//! An execution session is a browser-resident agent that connects to the relay over WebSocket and
//! performs the actual generation. The exchange is:
//!
//! 1. Session connects, relay sends [`ServerMessage::ConnectionEstablished`] with its session id
//! 2. Relay sends a [`JobEnvelope`] (the [`JobPayload`] plus an injected `request_id`)
//! 3. Session answers with [`SessionReply`] frames carrying raw reply lines for that `request_id`,
//!    ending with `done`, `[DONE]`, or an `error`
//! 4. Relay may send [`ServerMessage::Cancel`] when the caller went away (best effort)

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::{ChatMessage, StopSequences};

/// Message sent from the relay to an execution session (besides jobs).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
	/// Greeting sent right after the socket is registered.
	ConnectionEstablished {
		session_id: String,
		/// Unix epoch seconds.
		server_time: u64,
	},
	/// The caller of `request_id` disconnected; the session may stop generating.
	Cancel { request_id: String },
	/// Answer to [`SessionControl::Ping`].
	Pong,
}

/// Kind of upstream model, from the `<id>:<kind>` catalog notation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
	#[default]
	Text,
	Image,
}

impl std::fmt::Display for ModelKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ModelKind::Text => write!(f, "text"),
			ModelKind::Image => write!(f, "image"),
		}
	}
}

/// Job descriptor the execution session turns into an upstream generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobPayload {
	/// Upstream model id.
	pub model: String,
	/// Model name as requested by the caller.
	pub model_name: String,
	pub model_kind: ModelKind,
	pub messages: Vec<ChatMessage>,
	pub temperature: f64,
	pub top_p: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_tokens: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stop: Option<StopSequences>,
	pub stream: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message_id: Option<String>,
	pub mode: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub battle_target: Option<String>,
}

/// Outbound job frame: the payload with the correlation id injected at top level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEnvelope<P = JobPayload> {
	pub request_id: String,
	#[serde(flatten)]
	pub job: P,
}

/// Any frame a session may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SessionMessage {
	Reply(SessionReply),
	Control(SessionControl),
}

/// Session-level frames not tied to a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionControl {
	Ping,
	/// Console output forwarded from the session for diagnostics.
	Log {
		#[serde(default)]
		level: Option<String>,
		#[serde(default)]
		message: Value,
	},
}

/// Reply frame for one request.
///
/// `data` holds one or more raw lines of the upstream event syntax, separated by newlines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionReply {
	pub request_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<String>,
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub done: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

/// One unit of a session reply after framing is removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyFrame {
	Line(String),
	Done,
	Error(String),
}

impl SessionReply {
	/// Splits the reply into frames, in order: lines, then done. An error supersedes both.
	///
	/// SSE framing (`data: ` prefixes) is stripped and a `[DONE]` line maps to [`ReplyFrame::Done`].
	pub fn into_frames(self) -> Vec<ReplyFrame> {
		if let Some(error) = self.error {
			return vec![ReplyFrame::Error(error)];
		}

		let mut frames = Vec::new();
		let mut done = self.done;
		if let Some(data) = self.data {
			for raw in data.lines() {
				let line = raw.trim();
				let line = line.strip_prefix("data:").map(str::trim_start).unwrap_or(line);
				if line.is_empty() {
					continue;
				}
				if line == crate::SSE_DONE {
					done = true;
					break;
				}
				frames.push(ReplyFrame::Line(line.to_string()));
			}
		}
		if done {
			frames.push(ReplyFrame::Done);
		}
		frames
	}
}
