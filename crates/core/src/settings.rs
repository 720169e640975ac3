//! Relay settings loaded from a JSON file.
//!
//! Every field has a default, so a missing file or a partial file both produce a usable
//! configuration. Lookup order for the file is: explicit path, `$TABRELAY_CONFIG`, then
//! `<config dir>/tabrelay/config.json`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming an explicit settings file.
pub const CONFIG_ENV: &str = "TABRELAY_CONFIG";

pub const MODE_DIRECT_CHAT: &str = "direct_chat";
pub const MODE_BATTLE: &str = "battle";

#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("failed to read settings file {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse settings file {path}: {source}")]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("invalid settings: {0}")]
	Invalid(String),
}

/// Per-model overrides of the upstream conversation identifiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EndpointOverride {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mode: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub battle_target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
	pub server_host: String,
	pub server_port: u16,
	/// Bearer token callers must present; unset or empty disables the check.
	pub api_key: Option<String>,
	pub stream_response_timeout_seconds: u64,
	/// Delay between streamed chunks, clamped to the request deadline.
	pub chunk_pacing_ms: u64,
	/// Merge all system messages into one leading system message.
	pub tavern_mode_enabled: bool,
	/// Insert an empty user turn before the last user message.
	pub bypass_enabled: bool,
	pub session_id: Option<String>,
	pub message_id: Option<String>,
	pub mode: String,
	pub battle_target: Option<String>,
	pub use_default_ids_if_mapping_not_found: bool,
	/// Model name to `"<upstream id>[:text|:image]"`.
	pub models: BTreeMap<String, String>,
	pub endpoints: BTreeMap<String, EndpointOverride>,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			server_host: "127.0.0.1".to_string(),
			server_port: 5102,
			api_key: None,
			stream_response_timeout_seconds: 360,
			chunk_pacing_ms: 0,
			tavern_mode_enabled: false,
			bypass_enabled: false,
			session_id: None,
			message_id: None,
			mode: MODE_DIRECT_CHAT.to_string(),
			battle_target: Some("A".to_string()),
			use_default_ids_if_mapping_not_found: true,
			models: BTreeMap::new(),
			endpoints: BTreeMap::new(),
		}
	}
}

impl Settings {
	/// Default settings file location.
	pub fn default_path() -> Option<PathBuf> {
		dirs::config_dir().map(|dir| dir.join("tabrelay").join("config.json"))
	}

	/// Resolves the settings file path from an explicit path, the environment, or the default.
	pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
		explicit
			.map(Path::to_path_buf)
			.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
			.or_else(Self::default_path)
	}

	/// Loads and validates settings. A missing file yields validated defaults.
	pub fn load(explicit: Option<&Path>) -> Result<Self, SettingsError> {
		let settings = match Self::resolve_path(explicit) {
			Some(path) if path.exists() => Self::from_file(&path)?,
			_ => Self::default(),
		};
		settings.validate()?;
		Ok(settings)
	}

	pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
		let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
			path: path.to_path_buf(),
			source,
		})
	}

	pub fn validate(&self) -> Result<(), SettingsError> {
		if self.server_port == 0 {
			return Err(SettingsError::Invalid("server_port must be between 1 and 65535".into()));
		}
		if self.stream_response_timeout_seconds == 0 {
			return Err(SettingsError::Invalid(
				"stream_response_timeout_seconds must be positive".into(),
			));
		}
		validate_mode(&self.mode)?;
		if let Some(target) = &self.battle_target {
			validate_battle_target(target)?;
		}
		if self.mode == MODE_BATTLE && self.battle_target.is_none() {
			return Err(SettingsError::Invalid(
				"battle_target must be set when mode is \"battle\"".into(),
			));
		}
		for (field, value) in [("session_id", &self.session_id), ("message_id", &self.message_id)] {
			if let Some(value) = value {
				validate_uuid(field, value)?;
			}
		}
		for (model, endpoint) in &self.endpoints {
			if let Some(mode) = &endpoint.mode {
				validate_mode(mode)
					.map_err(|e| SettingsError::Invalid(format!("endpoint '{model}': {e}")))?;
			}
			if let Some(target) = &endpoint.battle_target {
				validate_battle_target(target)
					.map_err(|e| SettingsError::Invalid(format!("endpoint '{model}': {e}")))?;
			}
		}
		Ok(())
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.stream_response_timeout_seconds)
	}

	pub fn chunk_pacing(&self) -> Duration {
		Duration::from_millis(self.chunk_pacing_ms)
	}

	/// The configured bearer token, treating an empty string as unset.
	pub fn api_key(&self) -> Option<&str> {
		self.api_key.as_deref().filter(|key| !key.is_empty())
	}

	pub fn bind_address(&self) -> String {
		format!("{}:{}", self.server_host, self.server_port)
	}

	/// JSON view of the settings with secrets reduced to a presence flag.
	pub fn redacted(&self) -> serde_json::Value {
		serde_json::json!({
			"server_host": self.server_host,
			"server_port": self.server_port,
			"has_api_key": self.api_key().is_some(),
			"stream_response_timeout_seconds": self.stream_response_timeout_seconds,
			"chunk_pacing_ms": self.chunk_pacing_ms,
			"tavern_mode_enabled": self.tavern_mode_enabled,
			"bypass_enabled": self.bypass_enabled,
			"session_id": self.session_id,
			"message_id": self.message_id,
			"mode": self.mode,
			"battle_target": self.battle_target,
			"use_default_ids_if_mapping_not_found": self.use_default_ids_if_mapping_not_found,
			"model_count": self.models.len(),
			"endpoint_count": self.endpoints.len(),
		})
	}
}

fn validate_mode(mode: &str) -> Result<(), SettingsError> {
	if mode == MODE_DIRECT_CHAT || mode == MODE_BATTLE {
		Ok(())
	} else {
		Err(SettingsError::Invalid(format!(
			"mode must be \"{MODE_DIRECT_CHAT}\" or \"{MODE_BATTLE}\", got \"{mode}\""
		)))
	}
}

fn validate_battle_target(target: &str) -> Result<(), SettingsError> {
	if target == "A" || target == "B" {
		Ok(())
	} else {
		Err(SettingsError::Invalid(format!(
			"battle_target must be \"A\" or \"B\", got \"{target}\""
		)))
	}
}

fn validate_uuid(field: &str, value: &str) -> Result<(), SettingsError> {
	uuid::Uuid::parse_str(value)
		.map(|_| ())
		.map_err(|_| SettingsError::Invalid(format!("{field} is not a valid UUID: {value}")))
}
