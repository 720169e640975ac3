//! Turns decoded stream events into the caller-facing chunk and response contract.

use tabrelay_protocol::{
	AssistantMessage, CHAT_COMPLETION_CHUNK_OBJECT, CHAT_COMPLETION_OBJECT, ChatCompletionChunk,
	ChatCompletionResponse, ChatMessage, Choice, ChunkChoice, Delta, Usage,
};

use crate::decoder::{FinishReason, StreamEvent, StreamState, render_assets};
use crate::error::RelayError;

const ASSISTANT_ROLE: &str = "assistant";
const ERROR_FINISH_REASON: &str = "error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyMode {
	/// One chunk per delta, then a terminal chunk.
	Incremental,
	/// A single aggregate response at completion.
	Buffered,
}

/// Output of the assembler for one event.
#[derive(Debug)]
pub enum Assembled {
	Delta(ChatCompletionChunk),
	/// Terminal chunk carrying the finish reason.
	FinalChunk(ChatCompletionChunk),
	Response(ChatCompletionResponse),
	/// Terminal failure. Incremental mode also carries the error chunk to emit.
	Failure {
		error: RelayError,
		chunk: Option<ChatCompletionChunk>,
	},
}

impl Assembled {
	pub fn is_terminal(&self) -> bool {
		!matches!(self, Assembled::Delta(_))
	}
}

/// Whitespace token count, the relay's usage estimate.
pub fn count_tokens(text: &str) -> u64 {
	text.split_whitespace().count() as u64
}

pub fn prompt_tokens(messages: &[ChatMessage]) -> u64 {
	messages.iter().map(|m| count_tokens(&m.text())).sum()
}

#[derive(Debug)]
pub struct ResponseAssembler {
	mode: AssemblyMode,
	chunk_id: String,
	model: String,
	created: u64,
	prompt_tokens: u64,
	next_index: u64,
}

impl ResponseAssembler {
	pub fn new(
		mode: AssemblyMode,
		request_id: &str,
		model: impl Into<String>,
		prompt_tokens: u64,
	) -> Self {
		Self {
			mode,
			chunk_id: format!("chatcmpl-{request_id}"),
			model: model.into(),
			created: crate::unix_now(),
			prompt_tokens,
			next_index: 0,
		}
	}

	pub fn mode(&self) -> AssemblyMode {
		self.mode
	}

	pub fn chunk_id(&self) -> &str {
		&self.chunk_id
	}

	/// Maps one decoded event. `state` is the decoder state after the event was decoded.
	pub fn apply(&mut self, event: StreamEvent, state: &StreamState) -> Option<Assembled> {
		match event {
			StreamEvent::TextDelta(text) => self.delta(text),
			StreamEvent::AssetDelta(assets) => self.delta(render_assets(&assets)),
			StreamEvent::Completion { finish_reason } => Some(self.finish(&finish_reason, state)),
			StreamEvent::Challenge { message } => Some(self.fail(RelayError::Challenge { message })),
			StreamEvent::ParseError { .. } => None,
		}
	}

	/// Terminal output for a completion. No accumulated content fails with
	/// [`RelayError::EmptyResponse`].
	pub fn finish(&mut self, reason: &FinishReason, state: &StreamState) -> Assembled {
		if !state.has_content {
			return self.fail(RelayError::EmptyResponse);
		}
		match self.mode {
			AssemblyMode::Incremental => {
				Assembled::FinalChunk(self.chunk(Delta::default(), Some(reason.as_str().to_string()), None))
			}
			AssemblyMode::Buffered => {
				let completion_tokens = count_tokens(&state.text);
				Assembled::Response(ChatCompletionResponse {
					id: self.chunk_id.clone(),
					object: CHAT_COMPLETION_OBJECT.to_string(),
					created: self.created,
					model: self.model.clone(),
					choices: vec![Choice {
						index: 0,
						message: AssistantMessage {
							role: ASSISTANT_ROLE.to_string(),
							content: state.text.clone(),
						},
						finish_reason: Some(reason.as_str().to_string()),
					}],
					usage: Usage {
						prompt_tokens: self.prompt_tokens,
						completion_tokens,
						total_tokens: self.prompt_tokens + completion_tokens,
					},
				})
			}
		}
	}

	/// Terminal failure output.
	pub fn fail(&mut self, error: RelayError) -> Assembled {
		let chunk = match self.mode {
			AssemblyMode::Incremental => Some(self.chunk(
				Delta::default(),
				Some(ERROR_FINISH_REASON.to_string()),
				Some(error.to_error_detail()),
			)),
			AssemblyMode::Buffered => None,
		};
		Assembled::Failure { error, chunk }
	}

	fn delta(&mut self, content: String) -> Option<Assembled> {
		if self.mode == AssemblyMode::Buffered || content.is_empty() {
			return None;
		}
		let role = (self.next_index == 0).then(|| ASSISTANT_ROLE.to_string());
		let delta = Delta {
			role,
			content: Some(content),
		};
		Some(Assembled::Delta(self.chunk(delta, None, None)))
	}

	fn chunk(
		&mut self,
		delta: Delta,
		finish_reason: Option<String>,
		error: Option<tabrelay_protocol::ErrorDetail>,
	) -> ChatCompletionChunk {
		let chunk_index = self.next_index;
		self.next_index += 1;
		ChatCompletionChunk {
			id: self.chunk_id.clone(),
			object: CHAT_COMPLETION_CHUNK_OBJECT.to_string(),
			created: self.created,
			model: self.model.clone(),
			chunk_index,
			choices: vec![ChunkChoice {
				index: 0,
				delta,
				finish_reason,
			}],
			error,
		}
	}
}
