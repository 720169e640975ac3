//! Decoder for the line-oriented reply syntax produced by execution sessions.
//!
//! Grammar, one event per line:
//!
//! ```text
//! a<seq>:"<json-escaped text>"      text delta
//! a<seq>:[{...}, ...]               asset delta (generated images and similar)
//! ad:{..."finishReason":"..."...}   completion
//! ...Cloudflare...                  interactive verification challenge
//! ```
//!
//! Anything else is ignored. Once a challenge is seen the decoder halts and ignores every later
//! line of the request.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Substring identifying an interactive verification page in the session's output.
pub const CHALLENGE_MARKER: &str = "Cloudflare";

const CHALLENGE_MESSAGE: &str =
	"interactive verification required; complete the challenge in the session's browser and retry";

static EVENT_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)^a(\d+|d):(.*)$").unwrap());

/// Semantic event decoded from one reply line.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
	TextDelta(String),
	AssetDelta(Vec<Value>),
	Completion { finish_reason: FinishReason },
	Challenge { message: String },
	/// A line that looked like an event but did not decode. Not terminal.
	ParseError { line: String, reason: String },
}

impl StreamEvent {
	pub fn is_terminal(&self) -> bool {
		matches!(self, StreamEvent::Completion { .. } | StreamEvent::Challenge { .. })
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
	Stop,
	Length,
	ContentFilter,
	/// Any other upstream reason, lowercased.
	Other(String),
}

impl FinishReason {
	pub fn from_raw(raw: &str) -> Self {
		let lower = raw.to_lowercase();
		if lower.contains("length") {
			FinishReason::Length
		} else if lower.contains("content") {
			FinishReason::ContentFilter
		} else if lower == "stop" || lower == "eos_token" {
			FinishReason::Stop
		} else {
			FinishReason::Other(lower)
		}
	}

	pub fn as_str(&self) -> &str {
		match self {
			FinishReason::Stop => "stop",
			FinishReason::Length => "length",
			FinishReason::ContentFilter => "content_filter",
			FinishReason::Other(other) => other,
		}
	}
}

/// Per-request accumulation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamState {
	pub text: String,
	pub has_content: bool,
	pub challenge_detected: bool,
}

#[derive(Debug, Default)]
pub struct StreamDecoder {
	state: StreamState,
}

impl StreamDecoder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn state(&self) -> &StreamState {
		&self.state
	}

	pub fn into_state(self) -> StreamState {
		self.state
	}

	/// True once a challenge was decoded; later lines are ignored.
	pub fn is_halted(&self) -> bool {
		self.state.challenge_detected
	}

	/// Decodes one raw line, updating the accumulated state.
	pub fn decode_line(&mut self, raw: &str) -> Option<StreamEvent> {
		if self.is_halted() {
			return None;
		}

		let line = raw.trim();
		let line = line.strip_prefix("data:").map(str::trim_start).unwrap_or(line);
		if line.is_empty() {
			return None;
		}

		if line.contains(CHALLENGE_MARKER) {
			self.state.challenge_detected = true;
			return Some(StreamEvent::Challenge {
				message: CHALLENGE_MESSAGE.to_string(),
			});
		}

		if line == tabrelay_protocol::SSE_DONE {
			return Some(StreamEvent::Completion {
				finish_reason: FinishReason::Stop,
			});
		}

		let caps = EVENT_LINE.captures(line)?;
		let payload = caps.get(2).map_or("", |m| m.as_str()).trim();
		if caps.get(1).is_some_and(|m| m.as_str() == "d") {
			return Some(StreamEvent::Completion {
				finish_reason: completion_reason(payload),
			});
		}

		match first_json_value(payload) {
			Ok(Value::String(text)) => {
				if text.is_empty() {
					return None;
				}
				self.state.text.push_str(&text);
				self.state.has_content = true;
				Some(StreamEvent::TextDelta(text))
			}
			Ok(Value::Array(assets)) => {
				let rendered = render_assets(&assets);
				if !rendered.is_empty() {
					self.state.text.push_str(&rendered);
					self.state.has_content = true;
				}
				Some(StreamEvent::AssetDelta(assets))
			}
			Ok(_) => None,
			Err(reason) if payload.starts_with('[') => Some(StreamEvent::ParseError {
				line: line.to_string(),
				reason,
			}),
			Err(_) => None,
		}
	}
}

/// Markdown rendering of asset entries, one image link per asset carrying a URL.
pub fn render_assets(assets: &[Value]) -> String {
	assets
		.iter()
		.filter_map(|asset| {
			["image", "url"]
				.iter()
				.find_map(|key| asset.get(key).and_then(Value::as_str))
		})
		.map(|url| format!("![image]({url})"))
		.collect::<Vec<_>>()
		.join("\n")
}

fn completion_reason(payload: &str) -> FinishReason {
	match first_json_value(payload) {
		Ok(value) => value
			.get("finishReason")
			.and_then(Value::as_str)
			.map(FinishReason::from_raw)
			.unwrap_or(FinishReason::Stop),
		Err(_) => FinishReason::Stop,
	}
}

/// Parses the first JSON value of `payload`, tolerating trailing bytes.
fn first_json_value(payload: &str) -> Result<Value, String> {
	serde_json::Deserializer::from_str(payload)
		.into_iter::<Value>()
		.next()
		.unwrap_or_else(|| Err(serde::de::Error::custom("empty payload")))
		.map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn text_delta_accumulates() {
		let mut decoder = StreamDecoder::new();
		assert_eq!(
			decoder.decode_line(r#"a0:"Hello""#),
			Some(StreamEvent::TextDelta("Hello".into()))
		);
		assert_eq!(
			decoder.decode_line(r#"a1:" wor\"ld\"\n""#),
			Some(StreamEvent::TextDelta(" wor\"ld\"\n".into()))
		);
		assert_eq!(decoder.state().text, "Hello wor\"ld\"\n");
		assert!(decoder.state().has_content);
	}

	#[test]
	fn completion_maps_finish_reason() {
		let mut decoder = StreamDecoder::new();
		assert_eq!(
			decoder.decode_line(r#"ad:{"finishReason":"stop"}"#),
			Some(StreamEvent::Completion {
				finish_reason: FinishReason::Stop
			})
		);
		assert_eq!(
			decoder.decode_line(r#"ad:{"finishReason":"DMCA"}"#),
			Some(StreamEvent::Completion {
				finish_reason: FinishReason::Other("dmca".into())
			})
		);
	}

	#[test]
	fn completion_without_reason_or_valid_json_is_stop() {
		let mut decoder = StreamDecoder::new();
		for line in [r#"ad:{"usage":{}}"#, "ad:{broken"] {
			assert_eq!(
				decoder.decode_line(line),
				Some(StreamEvent::Completion {
					finish_reason: FinishReason::Stop
				})
			);
		}
	}

	#[test]
	fn finish_reason_mapping() {
		assert_eq!(FinishReason::from_raw("max_length"), FinishReason::Length);
		assert_eq!(FinishReason::from_raw("Content_Blocked"), FinishReason::ContentFilter);
		assert_eq!(FinishReason::from_raw("eos_token"), FinishReason::Stop);
		assert_eq!(FinishReason::from_raw("STOP"), FinishReason::Stop);
		assert_eq!(FinishReason::from_raw("Other").as_str(), "other");
	}

	#[test]
	fn challenge_halts_decoding() {
		let mut decoder = StreamDecoder::new();
		decoder.decode_line(r#"a0:"partial""#);
		let event = decoder.decode_line("<title>Just a moment... Cloudflare</title>");
		assert!(matches!(event, Some(StreamEvent::Challenge { .. })));
		assert!(decoder.is_halted());
		assert_eq!(decoder.decode_line(r#"a1:"more""#), None);
		assert_eq!(decoder.decode_line(r#"ad:{"finishReason":"stop"}"#), None);
		assert_eq!(decoder.state().text, "partial");
	}

	#[test]
	fn asset_delta_renders_markdown() {
		let mut decoder = StreamDecoder::new();
		let event = decoder.decode_line(r#"a2:[{"type":"image","image":"http://example.com/img.png"}]"#);
		assert_eq!(
			event,
			Some(StreamEvent::AssetDelta(vec![
				json!({"type": "image", "image": "http://example.com/img.png"})
			]))
		);
		assert_eq!(decoder.state().text, "![image](http://example.com/img.png)");
		assert!(decoder.state().has_content);
	}

	#[test]
	fn malformed_asset_is_a_parse_error() {
		let mut decoder = StreamDecoder::new();
		let event = decoder.decode_line("a3:[{oops");
		assert!(matches!(event, Some(StreamEvent::ParseError { .. })));
		assert!(!decoder.state().has_content);
	}

	#[test]
	fn unrecognized_lines_are_ignored() {
		let mut decoder = StreamDecoder::new();
		for line in ["", "   ", "e:{}", "hello", r#"a0:"unterminated"#, "a0:42"] {
			assert_eq!(decoder.decode_line(line), None, "line {line:?}");
		}
		assert_eq!(decoder.into_state(), StreamState::default());
	}

	#[test]
	fn sse_prefix_and_done_marker() {
		let mut decoder = StreamDecoder::new();
		assert_eq!(
			decoder.decode_line(r#"data: a0:"x""#),
			Some(StreamEvent::TextDelta("x".into()))
		);
		assert_eq!(
			decoder.decode_line("data: [DONE]"),
			Some(StreamEvent::Completion {
				finish_reason: FinishReason::Stop
			})
		);
	}
}
