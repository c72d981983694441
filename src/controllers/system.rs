use crate::controllers::api_response::ApiResponse;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use chrono::Local;
use serde::Serialize;
use serde_json::{Value, json};

pub const API_VERSION: &str = "1.0.0";

pub async fn get_api_root(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    ApiResponse::ok(
        "WanGP API is running",
        json!({
            "version": state.config.server.version,
            "api_version": API_VERSION,
            "endpoints": {
                "models": "/api/v1/models",
                "generate": "/api/v1/generate",
                "queue": "/api/v1/queue",
                "status": "/api/v1/status/{task_id}",
                "download": "/api/v1/download/{filename}",
                "outputs": "/api/v1/outputs",
            }
        }),
    )
}

#[derive(Debug, Serialize)]
pub struct PublicConfig {
    save_path: String,
    attention_mode: String,
    profile: u8,
    transformer_quantization: String,
    vae_config: u32,
    mmaudio_enabled: u32,
}

/// Only non-sensitive values are exposed.
pub async fn get_config(State(state): State<AppState>) -> Json<ApiResponse<PublicConfig>> {
    let server = &state.config.server;
    ApiResponse::ok(
        "Server configuration",
        PublicConfig {
            save_path: server.save_path.to_string_lossy().into_owned(),
            attention_mode: state.runtime.attention.to_string(),
            profile: state.runtime.profile,
            transformer_quantization: server.transformer_quantization.clone(),
            vae_config: server.vae_config,
            mmaudio_enabled: server.mmaudio_enabled,
        },
    )
}

pub async fn get_health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Local::now().to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config::{AttentionMode, Config};
    use crate::state::RuntimeSettings;

    fn state() -> AppState {
        let mut config = Config::default();
        config.server.version = "8.0".to_string();
        AppState::new(
            config,
            RuntimeSettings {
                profile: 4,
                attention: AttentionMode::Sage,
            },
        )
    }

    #[tokio::test]
    async fn root_lists_endpoints() {
        let Json(response) = get_api_root(State(state())).await;
        assert!(response.success);
        let data = response.data.unwrap();
        assert_eq!(data["version"], "8.0");
        assert_eq!(data["api_version"], API_VERSION);
        assert_eq!(data["endpoints"]["queue"], "/api/v1/queue");
    }

    #[tokio::test]
    async fn config_reports_resolved_settings() {
        let Json(response) = get_config(State(state())).await;
        let data = serde_json::to_value(response.data.unwrap()).unwrap();
        assert_eq!(data["attention_mode"], "sage");
        assert_eq!(data["profile"], 4);
        assert_eq!(data["save_path"], "outputs");
        assert_eq!(data["transformer_quantization"], "int8");
    }

    #[tokio::test]
    async fn health_has_no_envelope() {
        let Json(body) = get_health().await;
        assert_eq!(body["status"], "healthy");
        assert!(body.get("success").is_none());
    }
}
