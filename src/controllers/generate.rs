use crate::app_error::ApiError;
use crate::config::resolution::Resolution;
use crate::controllers::api_response::ApiResponse;
use crate::services::generation_queue::{NewTask, Submitted};
use crate::services::input_images::{DecodedImage, decode_image, discard_images, stage_image};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct GenerationRequest {
    prompt: Option<String>,
    negative_prompt: String,
    model_type: Option<String>,
    resolution: Resolution,
    video_length: i64,
    num_inference_steps: i64,
    guidance_scale: f64,
    seed: i64,
    batch_size: i64,
    repeat_generation: i64,
    image_start: Option<String>,
    image_end: Option<String>,
    image_refs: Option<Vec<String>>,
    flow_shift: f64,
    embedded_guidance_scale: f64,
    use_model_defaults: bool,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            prompt: None,
            negative_prompt: String::new(),
            model_type: None,
            resolution: Resolution::default(),
            video_length: 81,
            num_inference_steps: 30,
            guidance_scale: 5.0,
            seed: -1,
            batch_size: 1,
            repeat_generation: 1,
            image_start: None,
            image_end: None,
            image_refs: None,
            flow_shift: 5.0,
            embedded_guidance_scale: 0.0,
            use_model_defaults: true,
        }
    }
}

fn check_range<T: PartialOrd + Display>(
    field: &str,
    value: T,
    range: RangeInclusive<T>,
) -> Result<(), ApiError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!(
            "{} must be between {} and {}",
            field,
            range.start(),
            range.end()
        )))
    }
}

impl GenerationRequest {
    fn validate(&self) -> Result<&str, ApiError> {
        let prompt = self
            .prompt
            .as_deref()
            .ok_or_else(|| ApiError::BadRequest("prompt is required".to_string()))?;
        check_range("video_length", self.video_length, 1..=1000)?;
        check_range("num_inference_steps", self.num_inference_steps, 1..=100)?;
        check_range("guidance_scale", self.guidance_scale, 0.0..=20.0)?;
        check_range("batch_size", self.batch_size, 1..=10)?;
        check_range("repeat_generation", self.repeat_generation, 1..=10)?;
        Ok(prompt)
    }

    /// Request values always win over model defaults.
    fn apply_to(&self, params: &mut Map<String, Value>, prompt: &str, model_type: &str) {
        let overrides = [
            ("prompt", Value::from(prompt)),
            ("negative_prompt", Value::from(self.negative_prompt.as_str())),
            ("resolution", Value::from(self.resolution.to_string())),
            ("video_length", Value::from(self.video_length)),
            ("num_inference_steps", Value::from(self.num_inference_steps)),
            ("guidance_scale", Value::from(self.guidance_scale)),
            ("seed", Value::from(self.seed)),
            ("batch_size", Value::from(self.batch_size)),
            ("repeat_generation", Value::from(self.repeat_generation)),
            ("flow_shift", Value::from(self.flow_shift)),
            (
                "embedded_guidance_scale",
                Value::from(self.embedded_guidance_scale),
            ),
            ("model_type", Value::from(model_type)),
            ("model_filename", Value::from("")),
            ("mode", Value::from("")),
        ];
        for (key, value) in overrides {
            params.insert(key.to_string(), value);
        }
    }
}

pub async fn post_generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Submitted>>, ApiError> {
    let Json(request) = payload?;
    let prompt = request.validate()?.to_string();

    let model_type = request
        .model_type
        .clone()
        .or_else(|| state.config.default_model().map(str::to_string))
        .ok_or_else(|| {
            ApiError::BadRequest("No model type specified and no default model set".to_string())
        })?;
    let definition = state
        .config
        .get_model_definition(&model_type)
        .ok_or_else(|| ApiError::NotFound(format!("Model '{}' not found", model_type)))?;

    let mut params = if request.use_model_defaults {
        definition.default_settings.clone()
    } else {
        Map::new()
    };
    request.apply_to(&mut params, &prompt, &model_type);

    // Decode everything before touching the disk so a bad image rejects the
    // whole request.
    let image_start = request
        .image_start
        .as_deref()
        .map(decode_image)
        .transpose()
        .map_err(|err| ApiError::BadRequest(format!("Invalid image_start: {}", err)))?;
    let image_end = request
        .image_end
        .as_deref()
        .map(decode_image)
        .transpose()
        .map_err(|err| ApiError::BadRequest(format!("Invalid image_end: {}", err)))?;
    let image_refs = request
        .image_refs
        .as_ref()
        .map(|refs| {
            refs.iter()
                .map(|encoded| decode_image(encoded))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()
        .map_err(|err| ApiError::BadRequest(format!("Invalid image_refs: {}", err)))?;

    let mut inputs = Vec::new();
    if let Err(err) = stage_inputs(
        &state.config.server.inputs_path,
        image_start,
        image_end,
        image_refs,
        &mut params,
        &mut inputs,
    )
    .await
    {
        discard_images(&inputs);
        return Err(ApiError::Internal(format!("Error adding task: {}", err)));
    }

    let submitted = state.queue.lock().await.submit(NewTask {
        params,
        prompt,
        repeats: request.repeat_generation as u32,
        length: request.video_length as u32,
        steps: request.num_inference_steps as u32,
        inputs,
    });
    state.worker_notify.notify_one();

    Ok(ApiResponse::ok("Generation task added to queue", submitted))
}

/// Writes the decoded images below `dir` and references them from `params`.
/// Every file written is recorded in `staged`, even when a later one fails.
async fn stage_inputs(
    dir: &Path,
    image_start: Option<DecodedImage>,
    image_end: Option<DecodedImage>,
    image_refs: Option<Vec<DecodedImage>>,
    params: &mut Map<String, Value>,
    staged: &mut Vec<PathBuf>,
) -> std::io::Result<()> {
    for (label, image) in [("image_start", image_start), ("image_end", image_end)] {
        if let Some(image) = image {
            let path = stage_image(dir, label, &image).await?;
            params.insert(label.to_string(), Value::from(path.to_string_lossy()));
            staged.push(path);
        }
    }
    if let Some(images) = image_refs {
        let mut paths = Vec::with_capacity(images.len());
        for (index, image) in images.iter().enumerate() {
            let path = stage_image(dir, &format!("image_ref{}", index), image).await?;
            paths.push(Value::from(path.to_string_lossy()));
            staged.push(path);
        }
        params.insert("image_refs".to_string(), Value::Array(paths));
    }
    Ok(())
}
