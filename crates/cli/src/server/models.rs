use axum::Json;
use axum::extract::{Path, State};
use tabrelay::RelayError;
use tabrelay_protocol::{ModelList, ModelObject};

use super::AppState;
use crate::error::ApiError;

/// GET /v1/models
pub async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
	Json(state.relay.catalog().to_model_list())
}

/// GET /v1/models/{model}
pub async fn get_model(
	State(state): State<AppState>,
	Path(model): Path<String>,
) -> Result<Json<ModelObject>, ApiError> {
	state
		.relay
		.catalog()
		.model_object(&model)
		.map(Json)
		.ok_or_else(|| RelayError::ModelNotFound(model).into())
}
