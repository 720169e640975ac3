//! OpenAI-compatible chat completion types.

use serde::{Deserialize, Serialize};

/// Inbound chat completion request.
///
/// Unknown fields are ignored so newer client SDKs keep working.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionRequest {
	pub model: String,
	pub messages: Vec<ChatMessage>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub top_p: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub n: Option<u32>,
	#[serde(default)]
	pub stream: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stop: Option<StopSequences>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_tokens: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub presence_penalty: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub frequency_penalty: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user: Option<String>,
}

/// `stop` accepts either a single string or a list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StopSequences {
	One(String),
	Many(Vec<String>),
}

/// One conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
	pub role: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content: Option<MessageContent>,
}

impl ChatMessage {
	pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
		Self {
			role: role.into(),
			content: Some(MessageContent::Text(content.into())),
		}
	}

	/// Plain text of the message; multimodal parts contribute their text segments only.
	pub fn text(&self) -> String {
		match &self.content {
			Some(content) => content.text(),
			None => String::new(),
		}
	}
}

/// Message content: a plain string or a list of multimodal parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
	Text(String),
	Parts(Vec<ContentPart>),
}

impl MessageContent {
	pub fn text(&self) -> String {
		match self {
			MessageContent::Text(text) => text.clone(),
			MessageContent::Parts(parts) => parts
				.iter()
				.filter_map(|part| match part {
					ContentPart::Text { text } => Some(text.as_str()),
					_ => None,
				})
				.collect::<Vec<_>>()
				.join(" "),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
	Text {
		text: String,
	},
	ImageUrl {
		image_url: ImageUrl,
	},
	#[serde(other)]
	Unsupported,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
	pub url: String,
}

/// Buffered (non-streaming) completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionResponse {
	pub id: String,
	pub object: String,
	pub created: u64,
	pub model: String,
	pub choices: Vec<Choice>,
	pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Choice {
	pub index: u32,
	pub message: AssistantMessage,
	pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantMessage {
	pub role: String,
	pub content: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
	pub prompt_tokens: u64,
	pub completion_tokens: u64,
	pub total_tokens: u64,
}

/// One incremental unit of a streamed completion.
///
/// `chunk_index` counts chunks within one request starting at 0. `error` is only present on the
/// terminal chunk of a failed stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionChunk {
	pub id: String,
	pub object: String,
	pub created: u64,
	pub model: String,
	pub chunk_index: u64,
	pub choices: Vec<ChunkChoice>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorDetail>,
}

impl ChatCompletionChunk {
	/// True when the chunk carries a finish reason or an error.
	pub fn is_terminal(&self) -> bool {
		self.error.is_some() || self.choices.iter().any(|c| c.finish_reason.is_some())
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkChoice {
	pub index: u32,
	pub delta: Delta,
	pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Delta {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub role: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
}

/// OpenAI error envelope: `{"error": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
	pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetail {
	pub message: String,
	#[serde(rename = "type")]
	pub kind: String,
	pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelList {
	pub object: String,
	pub data: Vec<ModelObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelObject {
	pub id: String,
	pub object: String,
	pub created: u64,
	pub owned_by: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metadata: Option<ModelMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
	pub upstream_id: String,
	pub model_type: String,
}
