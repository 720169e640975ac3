//! Request validation and job payload construction.

use tabrelay_protocol::{ChatCompletionRequest, ChatMessage, JobPayload, MessageContent};

use crate::catalog::ModelCatalog;
use crate::error::{RelayError, Result};
use crate::settings::Settings;

const DEFAULT_TEMPERATURE: f64 = 1.0;
const DEFAULT_TOP_P: f64 = 1.0;

/// Rejects requests the session could never serve.
pub fn validate_request(request: &ChatCompletionRequest) -> Result<()> {
	if request.model.trim().is_empty() {
		return Err(RelayError::Validation("model must not be empty".into()));
	}
	if request.messages.is_empty() {
		return Err(RelayError::Validation("messages must not be empty".into()));
	}
	if let Some(t) = request.temperature.filter(|t| !(0.0..=2.0).contains(t)) {
		return Err(RelayError::Validation(format!(
			"temperature must be between 0 and 2, got {t}"
		)));
	}
	if let Some(p) = request.top_p.filter(|p| !(0.0..=1.0).contains(p)) {
		return Err(RelayError::Validation(format!(
			"top_p must be between 0 and 1, got {p}"
		)));
	}
	Ok(())
}

/// Merges every system message into a single leading one, joined by newlines.
pub fn apply_tavern_mode(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
	let (system, rest): (Vec<_>, Vec<_>) = messages.into_iter().partition(|m| m.role == "system");
	if system.is_empty() {
		return rest;
	}

	let merged = system
		.iter()
		.map(ChatMessage::text)
		.collect::<Vec<_>>()
		.join("\n");
	let mut shaped = Vec::with_capacity(rest.len() + 1);
	shaped.push(ChatMessage::new("system", merged));
	shaped.extend(rest);
	shaped
}

/// Inserts an empty user message right before the last user message.
pub fn apply_bypass_mode(mut messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
	if let Some(idx) = messages.iter().rposition(|m| m.role == "user") {
		messages.insert(
			idx,
			ChatMessage {
				role: "user".to_string(),
				content: Some(MessageContent::Text(String::new())),
			},
		);
	}
	messages
}

/// Builds the job payload for a validated request: resolves the model, shapes the messages, and
/// merges the per-model endpoint override over the default conversation ids.
pub fn build_job(
	request: &ChatCompletionRequest,
	catalog: &ModelCatalog,
	settings: &Settings,
) -> Result<JobPayload> {
	let spec = catalog.resolve(&request.model)?;

	let mut messages = request.messages.clone();
	if settings.tavern_mode_enabled {
		messages = apply_tavern_mode(messages);
	}
	if settings.bypass_enabled {
		messages = apply_bypass_mode(messages);
	}

	let mut session_id = settings.session_id.clone();
	let mut message_id = settings.message_id.clone();
	let mut mode = settings.mode.clone();
	let mut battle_target = settings.battle_target.clone();
	match catalog.endpoint(&request.model) {
		Some(endpoint) => {
			session_id = endpoint.session_id.clone().or(session_id);
			message_id = endpoint.message_id.clone().or(message_id);
			mode = endpoint.mode.clone().unwrap_or(mode);
			battle_target = endpoint.battle_target.clone().or(battle_target);
		}
		None if !settings.use_default_ids_if_mapping_not_found => {
			return Err(RelayError::Validation(format!(
				"no endpoint mapping for model '{}' and default ids are disabled",
				request.model
			)));
		}
		None => {}
	}

	Ok(JobPayload {
		model: spec.upstream_id.clone(),
		model_name: request.model.clone(),
		model_kind: spec.kind,
		messages,
		temperature: request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
		top_p: request.top_p.unwrap_or(DEFAULT_TOP_P),
		max_tokens: request.max_tokens,
		stop: request.stop.clone(),
		stream: request.stream,
		session_id,
		message_id,
		mode,
		battle_target,
	})
}
