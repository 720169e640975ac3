//! Wire types shared by the tabrelay server and its execution sessions.
//!
//! - [`chat`]: the OpenAI-compatible request, response, chunk and model types exposed to callers
//! - [`session`]: frames exchanged with a browser-resident execution session over WebSocket

pub mod chat;
pub mod session;

pub use chat::{
	AssistantMessage, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
	ChatMessage, Choice, ChunkChoice, ContentPart, Delta, ErrorBody, ErrorDetail, ImageUrl,
	MessageContent, ModelList, ModelMetadata, ModelObject, StopSequences, Usage,
};
pub use session::{
	JobEnvelope, JobPayload, ModelKind, ReplyFrame, ServerMessage, SessionControl, SessionMessage,
	SessionReply,
};

/// Object tag of a buffered chat completion.
pub const CHAT_COMPLETION_OBJECT: &str = "chat.completion";

/// Object tag of a streamed chat completion chunk.
pub const CHAT_COMPLETION_CHUNK_OBJECT: &str = "chat.completion.chunk";

/// Terminal marker of an OpenAI-style SSE stream.
pub const SSE_DONE: &str = "[DONE]";
