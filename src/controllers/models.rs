use crate::app_error::ApiError;
use crate::controllers::api_response::ApiResponse;
use crate::model::ModelInfo;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Serialize)]
pub struct ModelList {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
pub struct SupportedFeatures {
    sliding_window: bool,
    tea_cache: bool,
    mag_cache: bool,
}

#[derive(Debug, Serialize)]
pub struct ModelDetails {
    #[serde(flatten)]
    info: ModelInfo,
    default_settings: Map<String, Value>,
    supported_features: SupportedFeatures,
}

fn model_not_found(model_type: &str) -> ApiError {
    ApiError::NotFound(format!("Model '{}' not found", model_type))
}

pub async fn get_models(State(state): State<AppState>) -> Json<ApiResponse<ModelList>> {
    let models = state.config.get_all_models();
    ApiResponse::ok(
        format!("Found {} models", models.len()),
        ModelList { models },
    )
}

pub async fn get_model(
    State(state): State<AppState>,
    Path(model_type): Path<String>,
) -> Result<Json<ApiResponse<ModelDetails>>, ApiError> {
    let definition = state
        .config
        .get_model_definition(&model_type)
        .ok_or_else(|| model_not_found(&model_type))?;

    Ok(ApiResponse::ok(
        format!("Model info for '{}'", model_type),
        ModelDetails {
            info: ModelInfo::from_definition(&model_type, definition),
            default_settings: definition.default_settings.clone(),
            supported_features: SupportedFeatures {
                sliding_window: definition.sliding_window,
                tea_cache: definition.tea_cache,
                mag_cache: definition.mag_cache,
            },
        },
    ))
}

pub async fn get_model_settings(
    State(state): State<AppState>,
    Path(model_type): Path<String>,
) -> Result<Json<ApiResponse<Map<String, Value>>>, ApiError> {
    let definition = state
        .config
        .get_model_definition(&model_type)
        .ok_or_else(|| model_not_found(&model_type))?;

    Ok(ApiResponse::ok(
        format!("Default settings for '{}'", model_type),
        definition.default_settings.clone(),
    ))
}
