//! Model catalog: caller-facing model names mapped to upstream ids.

use std::collections::BTreeMap;

use tabrelay_protocol::{ModelKind, ModelList, ModelMetadata, ModelObject};

use crate::error::{RelayError, Result};
use crate::settings::{EndpointOverride, Settings};

const OWNED_BY: &str = "tabrelay";

/// Parsed `"<upstream id>[:text|:image]"` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
	pub upstream_id: String,
	pub kind: ModelKind,
}

impl ModelSpec {
	/// Parses a catalog entry. Only a trailing `:text` or `:image` is read as a kind, so upstream
	/// ids that contain colons survive intact.
	pub fn parse(raw: &str) -> Self {
		let raw = raw.trim();
		match raw.rsplit_once(':') {
			Some((id, "image")) => Self {
				upstream_id: id.to_string(),
				kind: ModelKind::Image,
			},
			Some((id, "text")) => Self {
				upstream_id: id.to_string(),
				kind: ModelKind::Text,
			},
			_ => Self {
				upstream_id: raw.to_string(),
				kind: ModelKind::Text,
			},
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
	models: BTreeMap<String, ModelSpec>,
	endpoints: BTreeMap<String, EndpointOverride>,
	created: u64,
}

impl ModelCatalog {
	pub fn from_settings(settings: &Settings) -> Self {
		let models = settings
			.models
			.iter()
			.map(|(name, raw)| (name.clone(), ModelSpec::parse(raw)))
			.collect();
		Self {
			models,
			endpoints: settings.endpoints.clone(),
			created: crate::unix_now(),
		}
	}

	pub fn len(&self) -> usize {
		self.models.len()
	}

	pub fn is_empty(&self) -> bool {
		self.models.is_empty()
	}

	pub fn get(&self, name: &str) -> Option<&ModelSpec> {
		self.models.get(name)
	}

	/// Looks up a model, failing with [`RelayError::ModelNotFound`].
	pub fn resolve(&self, name: &str) -> Result<&ModelSpec> {
		self.get(name)
			.ok_or_else(|| RelayError::ModelNotFound(name.to_string()))
	}

	pub fn endpoint(&self, name: &str) -> Option<&EndpointOverride> {
		self.endpoints.get(name)
	}

	pub fn model_object(&self, name: &str) -> Option<ModelObject> {
		self.get(name).map(|spec| ModelObject {
			id: name.to_string(),
			object: "model".to_string(),
			created: self.created,
			owned_by: OWNED_BY.to_string(),
			metadata: Some(ModelMetadata {
				upstream_id: spec.upstream_id.clone(),
				model_type: spec.kind.to_string(),
			}),
		})
	}

	pub fn to_model_list(&self) -> ModelList {
		ModelList {
			object: "list".to_string(),
			data: self
				.models
				.keys()
				.filter_map(|name| self.model_object(name))
				.collect(),
		}
	}
}
